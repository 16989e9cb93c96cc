//! CLI commands and argument parsing.

pub mod audit;
pub mod gc;
pub mod promote;
pub mod snapshot;
pub mod validate;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cip_core::{load_manifests_dir, load_thin_manifests, Manifest};
use cip_registry::{RegistryAuth, RegistryClient, RegistryConfig};
use cip_sync::SyncConfig;
use tracing::info;

/// cip - container image promoter
#[derive(Parser)]
#[command(name = "cip")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Promote images declared in the manifests
    Promote(promote::PromoteArgs),

    /// Print the images of one registry
    Snapshot(snapshot::SnapshotArgs),

    /// Validate manifests without contacting any registry
    Validate(validate::ValidateArgs),

    /// Delete untagged images from destination registries
    Gc(gc::GcArgs),

    /// Serve the registry change auditor
    Audit(audit::AuditArgs),

    /// Print version information
    Version,
}

/// Where manifests are read from.
#[derive(Args, Clone, Debug)]
pub struct ManifestArgs {
    /// Root of a thin-manifest tree (`manifests/` and `images/`)
    #[arg(long, required_unless_present = "manifest_dir", conflicts_with = "manifest_dir")]
    pub thin_manifest_dir: Option<PathBuf>,

    /// Directory of full manifests (`*.yaml`)
    #[arg(long)]
    pub manifest_dir: Option<PathBuf>,
}

impl ManifestArgs {
    /// Loads and validates every manifest.
    pub fn load(&self) -> Result<Vec<Manifest>> {
        let manifests = match (&self.thin_manifest_dir, &self.manifest_dir) {
            (Some(dir), _) => load_thin_manifests(dir)
                .with_context(|| format!("Failed to load thin manifests from {}", dir.display()))?,
            (None, Some(dir)) => load_manifests_dir(dir)
                .with_context(|| format!("Failed to load manifests from {}", dir.display()))?,
            (None, None) => anyhow::bail!("Either --thin-manifest-dir or --manifest-dir is required"),
        };
        info!(count = manifests.len(), "loaded manifests");
        Ok(manifests)
    }
}

/// How registries are reached.
#[derive(Args, Clone)]
pub struct RegistryArgs {
    /// Bearer token (an `OAuth2` access token) sent to every registry
    #[arg(long, env = "CIP_REGISTRY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Send every registry request to this base URL instead of `https://<host>`
    #[arg(long, env = "CIP_REGISTRY_ENDPOINT")]
    pub registry_endpoint: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "60")]
    pub timeout: u64,

    /// Number of concurrent registry workers
    #[arg(long, env = "CIP_THREADS", default_value = "10")]
    pub threads: usize,
}

impl RegistryArgs {
    /// Builds a registry client from the arguments.
    pub fn client(&self) -> Result<Arc<RegistryClient>> {
        let mut config = RegistryConfig::new()
            .with_auth(determine_auth(self))
            .with_timeout(Duration::from_secs(self.timeout));
        if let Some(endpoint) = &self.registry_endpoint {
            config = config.with_endpoint(endpoint.clone());
        }
        let client = RegistryClient::new(config).context("Failed to create registry client")?;
        Ok(Arc::new(client))
    }

    /// Sync configuration with the requested worker count.
    pub fn sync_config(&self, dry_run: bool) -> SyncConfig {
        SyncConfig::builder()
            .workers(self.threads)
            .dry_run(dry_run)
            .build()
    }
}

fn determine_auth(args: &RegistryArgs) -> RegistryAuth {
    match &args.token {
        Some(token) => RegistryAuth::bearer(token.clone()),
        None => RegistryAuth::None,
    }
}
