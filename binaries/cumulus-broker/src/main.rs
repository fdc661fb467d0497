mod config;
mod rpc;

use std::time::Duration;

use axum::{Router, routing::post};
use clap::Parser;
use cumulus_core::Core;
use cumulus_core::orphan::sweep_orphans;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::rpc::BrokerRpc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cumulus_broker=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = config::Args::parse();
    let config = config::load(&args.config)?;

    let core = Core::open(config.core).await?;
    tokio::spawn(run_janitor(
        core.clone(),
        Duration::from_secs(config.janitor_interval_secs),
    ));

    let app = Router::new()
        .route("/", post(rpc::handle_rpc))
        .with_state(BrokerRpc::new(core, config.default_encoding));
    tracing::info!(listen = %config.listen, "broker ready");
    let listener = TcpListener::bind(config.listen).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Background reclamation of orphaned fragments' remote blobs.
async fn run_janitor(core: Core, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if let Err(err) = sweep_orphans(&core).await {
            tracing::error!(error = %err, "orphan sweep failed");
        }
    }
}
