//! Image removal check.
//!
//! Compares the images promoted by a target revision of the manifest
//! repository with those promoted by a proposed change. Anything the target
//! promotes that the proposal no longer does is a removal, and fails the
//! check.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use cip_core::{load_thin_manifests, to_promotion_edges, Digest, Manifest, PromotionEdge};
use tokio::process::Command;
use tracing::{debug, info};

use crate::check::PreCheck;
use crate::error::{CheckError, Result};

/// Loads thin manifests as they were at a given revision.
#[async_trait]
pub trait ManifestRevisionSource: Send + Sync {
    /// Returns the manifests at `revision`.
    async fn manifests(&self, revision: &str) -> Result<Vec<Manifest>>;
}

/// Revisions stored side by side as `<root>/<revision>/`, each a
/// thin-manifest tree.
#[derive(Debug, Clone)]
pub struct DirRevisionSource {
    root: PathBuf,
}

impl DirRevisionSource {
    /// Creates a source rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ManifestRevisionSource for DirRevisionSource {
    async fn manifests(&self, revision: &str) -> Result<Vec<Manifest>> {
        check_revision(revision)?;
        Ok(load_thin_manifests(&self.root.join(revision))?)
    }
}

/// Revisions of a git repository, materialised with `git archive`.
#[derive(Debug, Clone)]
pub struct GitRevisionSource {
    repo: PathBuf,
    manifest_dir: PathBuf,
    git: PathBuf,
}

impl GitRevisionSource {
    /// Creates a source for the thin-manifest tree at `manifest_dir`
    /// (relative to the repository root) of the repository at `repo`.
    #[must_use]
    pub fn new(repo: impl Into<PathBuf>, manifest_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            manifest_dir: manifest_dir.into(),
            git: PathBuf::from("git"),
        }
    }

    /// Uses the given `git` binary.
    #[must_use]
    pub fn with_git(mut self, git: impl Into<PathBuf>) -> Self {
        self.git = git.into();
        self
    }

    fn unpack(&self, revision: &str, archive: &[u8], into: &Path) -> Result<()> {
        tar::Archive::new(archive)
            .unpack(into)
            .map_err(|e| CheckError::Revision {
                revision: revision.to_string(),
                message: format!("cannot unpack archive: {e}"),
            })
    }
}

#[async_trait]
impl ManifestRevisionSource for GitRevisionSource {
    async fn manifests(&self, revision: &str) -> Result<Vec<Manifest>> {
        check_revision(revision)?;
        debug!(repo = %self.repo.display(), revision, "archiving revision");

        let mut command = Command::new(&self.git);
        command
            .arg("-C")
            .arg(&self.repo)
            .args(["archive", "--format=tar", revision]);
        if !self.manifest_dir.as_os_str().is_empty() {
            command.arg("--").arg(&self.manifest_dir);
        }
        let output = command.output().await.map_err(|e| CheckError::Revision {
            revision: revision.to_string(),
            message: format!("failed to run {}: {e}", self.git.display()),
        })?;
        if !output.status.success() {
            return Err(CheckError::Revision {
                revision: revision.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let dir = tempfile::tempdir().map_err(|source| CheckError::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        self.unpack(revision, &output.stdout, dir.path())?;
        Ok(load_thin_manifests(&dir.path().join(&self.manifest_dir))?)
    }
}

fn check_revision(revision: &str) -> Result<()> {
    if revision.is_empty() || revision.starts_with('-') || revision.contains("..") {
        return Err(CheckError::Revision {
            revision: revision.to_string(),
            message: "not a valid revision name".to_string(),
        });
    }
    Ok(())
}

/// Fails if the proposal stops promoting an image the target promotes.
pub struct ImageRemovalCheck {
    source: Arc<dyn ManifestRevisionSource>,
    target_revision: String,
    proposed: BTreeSet<PromotionEdge>,
}

impl std::fmt::Debug for ImageRemovalCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRemovalCheck")
            .field("target_revision", &self.target_revision)
            .field("proposed", &self.proposed.len())
            .finish_non_exhaustive()
    }
}

impl ImageRemovalCheck {
    /// Compares `target_revision` in `source` against `proposed` edges.
    #[must_use]
    pub fn new(
        source: Arc<dyn ManifestRevisionSource>,
        target_revision: impl Into<String>,
        proposed: BTreeSet<PromotionEdge>,
    ) -> Self {
        Self {
            source,
            target_revision: target_revision.into(),
            proposed,
        }
    }

    /// Compares two revisions of the same source.
    ///
    /// # Errors
    ///
    /// Returns an error if the proposed revision cannot be loaded or its
    /// edges overlap.
    pub async fn between_revisions(
        source: Arc<dyn ManifestRevisionSource>,
        target_revision: impl Into<String>,
        proposed_revision: &str,
    ) -> Result<Self> {
        let manifests = source.manifests(proposed_revision).await?;
        let proposed = to_promotion_edges(&manifests)?;
        Ok(Self::new(source, target_revision, proposed))
    }
}

fn promoted(edges: &BTreeSet<PromotionEdge>) -> BTreeSet<(String, &Digest)> {
    edges
        .iter()
        .map(|edge| (edge.dst_reference(), &edge.digest))
        .collect()
}

#[async_trait]
impl PreCheck for ImageRemovalCheck {
    fn name(&self) -> &str {
        "image-removal"
    }

    async fn run(&self) -> Result<()> {
        let manifests = self.source.manifests(&self.target_revision).await?;
        let target = to_promotion_edges(&manifests)?;

        let proposed = promoted(&self.proposed);
        let removed: Vec<String> = promoted(&target)
            .difference(&proposed)
            .map(|(reference, digest)| format!("{reference} ({digest})"))
            .collect();

        info!(
            target = target.len(),
            proposed = self.proposed.len(),
            removed = removed.len(),
            "compared manifest revisions"
        );
        if removed.is_empty() {
            return Ok(());
        }
        Err(CheckError::failed(
            self.name(),
            format!(
                "images promoted on {} would no longer be promoted: {}",
                self.target_revision,
                removed.join(", ")
            ),
        ))
    }
}
