//! Where the auditor reads manifests from.

use std::path::PathBuf;

use cip_core::{load_thin_manifests, Manifest};

/// Supplies the manifests changes are judged against.
pub trait ManifestSource: Send + Sync {
    /// Loads the current manifests.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifests cannot be read or are invalid.
    fn load(&self) -> cip_core::Result<Vec<Manifest>>;
}

/// A thin-manifest tree on disk, re-read on every call so edits are picked
/// up without a restart.
#[derive(Debug, Clone)]
pub struct ThinManifestDir {
    root: PathBuf,
}

impl ThinManifestDir {
    /// Creates a source for the tree at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ManifestSource for ThinManifestDir {
    fn load(&self) -> cip_core::Result<Vec<Manifest>> {
        load_thin_manifests(&self.root)
    }
}

/// A fixed set of manifests.
#[derive(Debug, Clone, Default)]
pub struct StaticManifests(pub Vec<Manifest>);

impl ManifestSource for StaticManifests {
    fn load(&self) -> cip_core::Result<Vec<Manifest>> {
        Ok(self.0.clone())
    }
}
