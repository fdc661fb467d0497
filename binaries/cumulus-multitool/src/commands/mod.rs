pub mod hub;
pub mod orphans;
pub mod repair;
pub mod verify;

use clap::Subcommand;

use crate::shared::GlobalArgs;

#[derive(Subcommand)]
pub enum Command {
    /// Manage storage hubs.
    Hub(hub::Args),
    /// Reconstruct files with dirty fragments.
    Repair(repair::Args),
    /// Run a verification sweep.
    Verify(verify::Args),
    /// Reclaim orphaned fragments' remote blobs.
    Orphans(orphans::Args),
}

impl Command {
    pub async fn run(self, global: &GlobalArgs) -> anyhow::Result<()> {
        match self {
            Command::Hub(args) => hub::run(args, global).await,
            Command::Repair(args) => repair::run(args, global).await,
            Command::Verify(args) => verify::run(args, global).await,
            Command::Orphans(args) => orphans::run(args, global).await,
        }
    }
}
