//! cip - promotes container images between registries as declared by
//! promoter manifests.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "cip=debug" } else { "cip=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Promote(args) => commands::promote::run(&args).await,
        Commands::Snapshot(args) => commands::snapshot::run(&args).await,
        Commands::Validate(args) => commands::validate::run(&args),
        Commands::Gc(args) => commands::gc::run(&args).await,
        Commands::Audit(args) => commands::audit::run(&args).await,
        Commands::Version => {
            println!("cip {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
