pub mod blob;
pub mod catalog;
mod coder;
pub mod config;
pub mod error;
pub mod file;
pub mod fragment;
pub mod orphan;
mod placement;
pub mod repair;
mod stage;
#[cfg(test)]
pub(crate) mod testing;
pub mod verify;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use cumulus_rpc_pool::RpcPool;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub use crate::config::CoreConfig;
pub use crate::error::{CoreError, RemoteError};

/// Handle to the file lifecycle engine: configuration, the catalog pool
/// and the RPC pool, bundled once at startup and cloned freely after.
#[derive(Clone)]
pub struct Core {
    inner: Arc<CoreInner>,
}

struct CoreInner {
    config: CoreConfig,
    catalog: SqlitePool,
    rpc: RpcPool,
}

impl Core {
    /// Open the catalog, apply migrations and prepare the staging area.
    pub async fn open(config: CoreConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.staging_dir)
            .await
            .with_context(|| format!("create staging dir {}", config.staging_dir.display()))?;

        let options = SqliteConnectOptions::from_str(&config.db_path)
            .with_context(|| format!("invalid catalog path {}", config.db_path))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let catalog = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&catalog).await?;

        Ok(Self {
            inner: Arc::new(CoreInner {
                config,
                catalog,
                rpc: RpcPool::new(),
            }),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    pub(crate) fn catalog(&self) -> &SqlitePool {
        &self.inner.catalog
    }

    pub(crate) fn rpc(&self) -> &RpcPool {
        &self.inner.rpc
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.inner.config.request_timeout_secs)
    }
}
