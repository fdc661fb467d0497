use std::{fs, net::SocketAddr, path::PathBuf};

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "cumulus-hub")]
pub struct Args {
    #[arg(long)]
    pub config: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub listen: SocketAddr,
    pub storage_dir: PathBuf,
    /// Megabytes of disk kept free regardless of usage.
    #[serde(default = "default_reserve_mb")]
    pub reserve_mb: u64,
    /// Fraction of the total disk never given to fragments.
    #[serde(default = "default_reserve_ratio")]
    pub reserve_ratio: f64,
}

fn default_reserve_mb() -> u64 {
    128
}

fn default_reserve_ratio() -> f64 {
    0.01
}

pub fn load(path: &PathBuf) -> anyhow::Result<Config> {
    let raw = fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("failed to read config {}: {err}", path.display()))?;
    toml::from_str(&raw)
        .map_err(|err| anyhow::anyhow!("failed to parse config {}: {err}", path.display()))
}
