use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::Args;
use cumulus_core::{Core, CoreConfig};
use serde::{Deserialize, Serialize};

#[derive(Args, Clone)]
pub struct GlobalArgs {
    /// TOML config carrying a `[core]` section (the broker's config works).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Deserialize)]
struct ToolConfig {
    core: CoreConfig,
}

pub async fn build_core(global: &GlobalArgs) -> anyhow::Result<Core> {
    let path = global
        .config
        .clone()
        .context("missing --config for catalog access")?;
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: ToolConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    Core::open(config.core).await
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
