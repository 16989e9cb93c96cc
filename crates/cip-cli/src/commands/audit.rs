//! Audit command implementation.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use cip_audit::{serve, Auditor, ThinManifestDir};

use super::RegistryArgs;

/// Arguments for the audit command.
#[derive(Args)]
pub struct AuditArgs {
    /// Root of the thin-manifest tree, re-read on every notification
    #[arg(long)]
    pub thin_manifest_dir: PathBuf,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    #[command(flatten)]
    pub registry: RegistryArgs,
}

/// Runs the audit command.
///
/// # Errors
///
/// Returns an error if the registry client cannot be built or the server
/// cannot listen.
pub async fn run(args: &AuditArgs) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(
        manifests = %args.thin_manifest_dir.display(),
        %addr,
        "starting auditor"
    );

    let auditor = Auditor::new(
        Arc::new(ThinManifestDir::new(&args.thin_manifest_dir)),
        args.registry.client()?,
    );
    serve(addr, Arc::new(auditor))
        .await
        .context("Auditor stopped")
}
