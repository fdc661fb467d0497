mod config;
mod rpc;
mod store;

use std::sync::Arc;

use axum::{Router, routing::post};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::rpc::HubRpc;
use crate::store::FragmentStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cumulus_hub=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = config::Args::parse();
    let config = config::load(&args.config)?;

    let store = Arc::new(FragmentStore::new(
        config.storage_dir.clone(),
        config.reserve_mb,
        config.reserve_ratio,
    ));
    tracing::info!(
        listen = %config.listen,
        storage_dir = %config.storage_dir.display(),
        "hub ready"
    );

    let app = Router::new()
        .route("/", post(rpc::handle_rpc))
        .with_state(HubRpc { store });
    let listener = TcpListener::bind(config.listen).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
