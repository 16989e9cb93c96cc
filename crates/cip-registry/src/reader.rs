//! Capabilities the promoter needs from a registry.
//!
//! Repositories are addressed by their full path including the host,
//! e.g. `gcr.io/project/image`. [`RegistryClient`](crate::RegistryClient)
//! implements both traits over HTTP and
//! [`InMemoryRegistry`](crate::InMemoryRegistry) implements them for tests.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ManifestList, TagsList};

/// Read access to repositories.
#[async_trait]
pub trait RepositoryReader: Send + Sync {
    /// Lists digests, tags and child repositories of one repository.
    async fn read_tags(&self, repository: &str) -> Result<TagsList>;

    /// Fetches the manifest list stored under `digest`.
    async fn read_manifest_list(&self, repository: &str, digest: &str) -> Result<ManifestList>;
}

/// Destructive access to repositories.
#[async_trait]
pub trait RepositoryWriter: Send + Sync {
    /// Deletes a tag or a digest.
    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()>;
}
