use clap::Subcommand;
use cumulus_core::blob::BlobClient;
use cumulus_core::catalog::{self, Hub};
use cumulus_structs::id::HubId;
use smol_str::SmolStr;
use url::Url;

use crate::shared::{GlobalArgs, build_core, print_json};

#[derive(clap::Args)]
pub struct Args {
    #[command(subcommand)]
    command: HubCommand,
}

#[derive(Subcommand)]
enum HubCommand {
    /// Register a hub and seed its capacity from a live stats call.
    Add {
        #[arg(long)]
        reference: String,
        #[arg(long)]
        endpoint: Url,
    },
    /// List registered hubs.
    List,
}

pub async fn run(args: Args, global: &GlobalArgs) -> anyhow::Result<()> {
    let core = build_core(global).await?;
    match args.command {
        HubCommand::Add {
            reference,
            endpoint,
        } => {
            let hub = Hub {
                hub_id: HubId::generate(),
                reference: SmolStr::new(reference),
                endpoint,
                available_bytes: 0,
            };
            catalog::insert_hub(&core, &hub).await?;
            // the stats call writes the hub's own figure into the catalog
            let stats = BlobClient::new(&core, hub.clone()).stats().await?;
            tracing::info!(hub_id = %hub.hub_id, available_bytes = stats.available_bytes, "hub registered");
            print_json(&catalog::get_hub(&core, &hub.hub_id).await?)
        }
        HubCommand::List => print_json(&catalog::list_hubs(&core).await?),
    }
}
