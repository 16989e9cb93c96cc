//! Promote command implementation.
//!
//! Reads every registry the manifests name, works out which edges still need
//! copying, optionally runs the pre-promotion checks, then copies.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use cip_checks::{
    run_checks, GitRevisionSource, GrafeasProvider, ImageRemovalCheck, ImageSizeCheck,
    ImageVulnerabilityCheck, PreCheck, Severity,
};
use cip_core::{get_promotion_candidates, to_promotion_edges, PromotionEdge};
use cip_sync::{CraneCopier, Executor, SyncConfig, SyncContext, SyncState};

use super::{ManifestArgs, RegistryArgs};

/// Arguments for the promote command.
#[derive(Args)]
pub struct PromoteArgs {
    #[command(flatten)]
    pub manifests: ManifestArgs,

    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Actually copy images; without this only the plan is printed
    #[arg(long)]
    pub confirm: bool,

    /// Run the pre-promotion checks before copying
    #[arg(long)]
    pub checks: bool,

    /// Fail the checks if this revision promotes images the manifests no longer do
    #[arg(long, requires = "checks")]
    pub target_revision: Option<String>,

    /// Git repository holding the manifests, for --target-revision
    #[arg(long, default_value = ".")]
    pub git_repo: PathBuf,

    /// Manifest tree path inside the git repository, for --target-revision
    #[arg(long)]
    pub git_manifest_path: Option<PathBuf>,

    /// Largest image allowed, in MiB
    #[arg(long, default_value = "2048")]
    pub max_image_size_mib: i64,

    /// Project holding vulnerability occurrences; enables the vulnerability check
    #[arg(long, requires = "checks")]
    pub vuln_project: Option<String>,

    /// Lowest severity that fails the vulnerability check
    #[arg(long, default_value = "HIGH")]
    pub vuln_severity: Severity,

    /// Copy tool invoked as `<crane> copy SRC DST`
    #[arg(long, env = "CIP_CRANE", default_value = "crane")]
    pub crane: PathBuf,
}

/// Runs the promote command.
///
/// # Errors
///
/// Returns an error if:
/// - The manifests are invalid or their edges overlap
/// - A pre-promotion check fails
/// - A tag move was refused
/// - Any copy failed
pub async fn run(args: &PromoteArgs) -> Result<()> {
    let dry_run = !args.confirm;
    info!(dry_run, "promoting images");

    let manifests = args.manifests.load()?;
    let edges = to_promotion_edges(&manifests).context("Failed to compute promotion edges")?;

    let config = args.registry.sync_config(dry_run);
    let context = SyncContext::from_manifests(&manifests, args.registry.client()?, config.clone());
    context.read_all().await.context("Failed to read registries")?;

    let state = context.state();
    for failure in &state.errors {
        warn!(context = %failure.context, message = %failure.message, "registry read failed");
    }
    let candidates = get_promotion_candidates(&edges, &state.view());
    info!(
        edges = edges.len(),
        candidates = candidates.edges.len(),
        clean = candidates.clean,
        "computed promotion candidates"
    );

    if args.checks {
        let checks = build_checks(args, &edges, &candidates.edges, &state, &config)?;
        run_checks(&checks).await.context("Pre-promotion checks failed")?;
        println!("✓ {} checks passed", checks.len());
    }

    let copier = CraneCopier::new().with_binary(&args.crane);
    let report = Executor::new(config, Arc::new(copier))
        .promote(&candidates.edges)
        .await
        .context("Promotion failed")?;

    if dry_run {
        for (request, count) in report.recorded() {
            println!("{request} (x{count})");
        }
    }
    println!("{}", report.summary());

    if !candidates.clean {
        anyhow::bail!("Refused to move existing tags; see the log for details");
    }
    if !report.is_success() {
        anyhow::bail!("{} promotions failed", report.failed());
    }
    Ok(())
}

fn build_checks(
    args: &PromoteArgs,
    edges: &BTreeSet<PromotionEdge>,
    candidates: &BTreeSet<PromotionEdge>,
    state: &SyncState,
    config: &SyncConfig,
) -> Result<Vec<Box<dyn PreCheck>>> {
    let mut checks: Vec<Box<dyn PreCheck>> = vec![Box::new(ImageSizeCheck::new(
        args.max_image_size_mib,
        candidates.clone(),
        state.sizes.clone(),
    ))];

    if let Some(revision) = &args.target_revision {
        let source = GitRevisionSource::new(
            &args.git_repo,
            args.git_manifest_path.clone().unwrap_or_default(),
        );
        checks.push(Box::new(ImageRemovalCheck::new(
            Arc::new(source),
            revision.clone(),
            edges.clone(),
        )));
    }

    if let Some(project) = &args.vuln_project {
        let mut provider =
            GrafeasProvider::new(project.clone()).context("Failed to create vulnerability client")?;
        if let Some(token) = &args.registry.token {
            provider = provider.with_token(token.clone());
        }
        checks.push(Box::new(
            ImageVulnerabilityCheck::new(Arc::new(provider), candidates.clone(), args.vuln_severity)
                .with_config(config.clone()),
        ));
    }

    Ok(checks)
}
