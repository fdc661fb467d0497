use std::{fs, net::SocketAddr, path::PathBuf};

use clap::Parser;
use cumulus_core::CoreConfig;
use cumulus_structs::encoding::Encoding;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "cumulus-broker")]
pub struct Args {
    #[arg(long)]
    pub config: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub listen: SocketAddr,
    pub core: CoreConfig,
    /// Encoding applied to files stored for the first time.
    #[serde(default = "default_encoding")]
    pub default_encoding: Encoding,
    /// Seconds between orphan-reclamation sweeps.
    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,
}

fn default_encoding() -> Encoding {
    Encoding::new("rs_vand", 2, 3)
}

fn default_janitor_interval_secs() -> u64 {
    300
}

pub fn load(path: &PathBuf) -> anyhow::Result<Config> {
    let raw = fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("failed to read config {}: {err}", path.display()))?;
    toml::from_str(&raw)
        .map_err(|err| anyhow::anyhow!("failed to parse config {}: {err}", path.display()))
}
