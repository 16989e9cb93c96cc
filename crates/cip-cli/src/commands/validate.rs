//! Validate command implementation.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use cip_core::to_promotion_edges;

use super::ManifestArgs;

/// Arguments for the validate command.
#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub manifests: ManifestArgs,

    /// Show detailed output
    #[arg(long)]
    pub detail: bool,
}

/// Runs the validate command.
///
/// Loading checks each manifest on its own; computing the edges checks that
/// no two manifests promote different digests to the same tag.
///
/// # Errors
///
/// Returns an error if any manifest is invalid or edges overlap.
pub fn run(args: &ValidateArgs) -> Result<()> {
    let manifests = args.manifests.load()?;
    let edges = to_promotion_edges(&manifests).context("Manifests conflict")?;
    info!(manifests = manifests.len(), edges = edges.len(), "manifests valid");

    if args.detail {
        for manifest in &manifests {
            let path = manifest
                .path()
                .map_or_else(|| "<memory>".to_string(), |p| p.display().to_string());
            println!(
                "{path}: {} -> {} registries, {} images",
                manifest.source_registry().name,
                manifest.destination_registries().count(),
                manifest.images().len()
            );
        }
    }

    println!(
        "✓ {} manifests valid, {} promotion edges",
        manifests.len(),
        edges.len()
    );
    Ok(())
}
