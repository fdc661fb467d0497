use clap::ValueEnum;
use cumulus_core::verify::{VerifyMode, VerifyScope, verify_files};

use crate::shared::{GlobalArgs, build_core, print_json};

#[derive(clap::Args)]
pub struct Args {
    #[arg(long, value_enum, default_value_t = ModeArg::Hash)]
    mode: ModeArg,
    #[arg(long, value_enum, default_value_t = ScopeArg::All)]
    scope: ScopeArg,
    /// Fraction of files for `--scope random`; defaults to the config value.
    #[arg(long)]
    fraction: Option<f64>,
}

#[derive(ValueEnum, Clone, Copy)]
enum ModeArg {
    Full,
    Hash,
}

#[derive(ValueEnum, Clone, Copy)]
enum ScopeArg {
    All,
    Random,
}

pub async fn run(args: Args, global: &GlobalArgs) -> anyhow::Result<()> {
    let core = build_core(global).await?;
    let mode = match args.mode {
        ModeArg::Full => VerifyMode::Full,
        ModeArg::Hash => VerifyMode::Hash,
    };
    let scope = match args.scope {
        ScopeArg::All => VerifyScope::All,
        ScopeArg::Random => {
            VerifyScope::Random(args.fraction.unwrap_or(core.config().verify_fraction))
        }
    };
    let report = verify_files(&core, mode, scope).await?;
    print_json(&report)
}
