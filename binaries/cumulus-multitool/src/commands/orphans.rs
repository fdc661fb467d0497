use cumulus_core::orphan::sweep_orphans;

use crate::shared::{GlobalArgs, build_core, print_json};

#[derive(clap::Args)]
pub struct Args {}

pub async fn run(_args: Args, global: &GlobalArgs) -> anyhow::Result<()> {
    let core = build_core(global).await?;
    let report = sweep_orphans(&core).await?;
    print_json(&report)
}
