//! Snapshot command implementation.

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use cip_core::snapshot::{minimal, to_csv, to_yaml};
use cip_core::{RegInvImage, RegistryContext, RegistryName};
use cip_sync::SyncContext;

use super::RegistryArgs;

/// Arguments for the snapshot command.
#[derive(Args)]
pub struct SnapshotArgs {
    /// Registry to read, e.g. `gcr.io/project`
    #[arg(long)]
    pub registry: String,

    /// Output format
    #[arg(short, long, default_value = "yaml")]
    pub output: OutputFormat,

    /// Drop untagged digests that belong to a manifest list in the same image
    #[arg(long)]
    pub minimal: bool,

    #[command(flatten)]
    pub connection: RegistryArgs,
}

/// Output format for the snapshot command.
#[derive(Clone, Debug, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Csv,
}

/// Runs the snapshot command.
///
/// # Errors
///
/// Returns an error if the registry name is invalid or the crawl fails.
pub async fn run(args: &SnapshotArgs) -> Result<()> {
    let name: RegistryName = args
        .registry
        .parse()
        .with_context(|| format!("Invalid registry name: {}", args.registry))?;
    info!(registry = %name, "taking snapshot");

    let context = SyncContext::new(
        vec![RegistryContext::new(name.clone(), false)],
        args.connection.client()?,
        args.connection.sync_config(true),
    );
    context.read_all().await.context("Failed to read registry")?;

    let rii = context.with_state(|state| {
        for failure in &state.errors {
            warn!(context = %failure.context, message = %failure.message, "registry read failed");
        }
        let rii = state.inventory.get(&name).cloned().unwrap_or_default();
        if args.minimal {
            minimal(&rii, &state.parent_digests)
        } else {
            rii
        }
    });

    print!("{}", render(&rii, &args.output));
    Ok(())
}

fn render(rii: &RegInvImage, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Yaml => to_yaml(rii),
        OutputFormat::Csv => to_csv(rii),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cip_core::{insert_tag, Digest, ImageName, Tag};

    fn rii() -> RegInvImage {
        let mut rii = RegInvImage::new();
        let digest = Digest::parse(format!("sha256:{}", "a".repeat(64))).unwrap();
        insert_tag(
            rii.entry(ImageName::new("foo").unwrap()).or_default(),
            digest,
            Some(Tag::parse("1.0").unwrap()),
        );
        rii
    }

    #[test]
    fn test_render_formats() {
        let yaml = render(&rii(), &OutputFormat::Yaml);
        assert!(yaml.contains("name: foo"));
        let csv = render(&rii(), &OutputFormat::Csv);
        assert!(csv.contains("1.0"));
    }
}
