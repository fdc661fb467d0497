use std::path::PathBuf;

use serde::Deserialize;

/// Configuration of the lifecycle engine, deserialized from the `[core]`
/// section of a binary's TOML config.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// Catalog database path, or `:memory:`.
    pub db_path: String,
    /// Directory for per-session staging files.
    pub staging_dir: PathBuf,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_repair_lock_path")]
    pub repair_lock_path: PathBuf,
    /// Fraction of files checked by a `random`-scope verification sweep.
    #[serde(default = "default_verify_fraction")]
    pub verify_fraction: f64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_repair_lock_path() -> PathBuf {
    PathBuf::from("/tmp/cumulus/reconstruct.lock")
}

fn default_verify_fraction() -> f64 {
    0.1
}
