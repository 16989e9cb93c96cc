//! Garbage collection command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use cip_core::RegistryName;
use cip_sync::{clear_repository, garbage_collect, CraneCopier, Executor, SyncContext};

use super::{ManifestArgs, RegistryArgs};

/// Arguments for the gc command.
#[derive(Args)]
pub struct GcArgs {
    #[command(flatten)]
    pub manifests: ManifestArgs,

    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Actually delete; without this only the plan is printed
    #[arg(long)]
    pub confirm: bool,

    /// Delete every image in this destination registry instead of only
    /// untagged ones
    #[arg(long)]
    pub clear: Option<String>,

    /// Copy tool, unused by deletions but required by the executor
    #[arg(long, env = "CIP_CRANE", default_value = "crane", hide = true)]
    pub crane: PathBuf,
}

/// Runs the gc command.
///
/// # Errors
///
/// Returns an error if the manifests are invalid, `--clear` names a source
/// registry, or any deletion failed.
pub async fn run(args: &GcArgs) -> Result<()> {
    let dry_run = !args.confirm;
    let manifests = args.manifests.load()?;

    let client = args.registry.client()?;
    let config = args.registry.sync_config(dry_run);
    let context = SyncContext::from_manifests(&manifests, client.clone(), config.clone());
    context.read_all().await.context("Failed to read registries")?;

    let executor = Executor::new(config, Arc::new(CraneCopier::new().with_binary(&args.crane)))
        .with_writer(client);

    let report = match &args.clear {
        Some(registry) => {
            let name: RegistryName = registry
                .parse()
                .with_context(|| format!("Invalid registry name: {registry}"))?;
            info!(registry = %name, dry_run, "clearing registry");
            clear_repository(&name, &context, &executor)
                .await
                .with_context(|| format!("Failed to clear {name}"))?
        }
        None => {
            info!(dry_run, "collecting garbage");
            garbage_collect(&manifests, &context, &executor)
                .await
                .context("Garbage collection failed")?
        }
    };

    if dry_run {
        for (request, count) in report.recorded() {
            println!("{request} (x{count})");
        }
    }
    println!("{}", report.summary());

    if !report.is_success() {
        anyhow::bail!("{} deletions failed", report.failed());
    }
    Ok(())
}
