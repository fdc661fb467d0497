use cumulus_core::repair::repair_files;

use crate::shared::{GlobalArgs, build_core, print_json};

#[derive(clap::Args)]
pub struct Args {}

pub async fn run(_args: Args, global: &GlobalArgs) -> anyhow::Result<()> {
    let core = build_core(global).await?;
    let report = repair_files(&core).await?;
    print_json(&report)
}
