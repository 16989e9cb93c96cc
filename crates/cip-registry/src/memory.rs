//! In-memory registry for tests and dry runs against fixtures.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{RegistryError, Result};
use crate::reader::{RepositoryReader, RepositoryWriter};
use crate::types::{ManifestInfo, ManifestList, ManifestListEntry, MediaType, TagsList};

/// A registry held in memory.
///
/// Behaves like GCR where it matters to the promoter: parents list their
/// child repositories, a tagged digest cannot be deleted, and a digest
/// referenced by a manifest list in the same repository cannot be deleted
/// before the list.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    state: RwLock<State>,
    reads: AtomicUsize,
}

#[derive(Debug, Default)]
struct State {
    repos: BTreeMap<String, TagsList>,
    lists: BTreeMap<(String, String), ManifestList>,
    failing: BTreeSet<String>,
    deletions: Vec<(String, String)>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `digest` with `tags` to `repository`, creating parent links.
    pub fn insert(
        &self,
        repository: &str,
        digest: &str,
        tags: &[&str],
        media_type: &str,
        size: i64,
    ) {
        let mut state = self.state.write();
        state.link_parents(repository);
        let repo = state.repos.entry(repository.to_string()).or_default();
        let info = repo.manifest.entry(digest.to_string()).or_insert_with(|| ManifestInfo {
            media_type: MediaType::new(media_type),
            image_size_bytes: size,
            ..ManifestInfo::default()
        });
        for tag in tags {
            if !info.tag.iter().any(|t| t == tag) {
                info.tag.push((*tag).to_string());
            }
        }
        for tag in tags {
            if !repo.tags.iter().any(|t| t == tag) {
                repo.tags.push((*tag).to_string());
            }
        }
    }

    /// Adds a manifest list with the given children to `repository`.
    pub fn insert_manifest_list(&self, repository: &str, digest: &str, tags: &[&str], children: &[&str]) {
        self.insert(repository, digest, tags, MediaType::DOCKER_MANIFEST_LIST, 0);
        let list = ManifestList {
            schema_version: 2,
            media_type: MediaType::new(MediaType::DOCKER_MANIFEST_LIST),
            manifests: children
                .iter()
                .map(|child| ManifestListEntry {
                    digest: (*child).to_string(),
                    media_type: MediaType::new(MediaType::DOCKER_MANIFEST),
                    ..ManifestListEntry::default()
                })
                .collect(),
        };
        self.state
            .write()
            .lists
            .insert((repository.to_string(), digest.to_string()), list);
    }

    /// Makes every read of `repository` fail as if retries ran out.
    pub fn fail_reads(&self, repository: &str) {
        self.state.write().failing.insert(repository.to_string());
    }

    /// Returns the `tags/list` view of a repository.
    #[must_use]
    pub fn repository(&self, repository: &str) -> Option<TagsList> {
        self.state.read().repos.get(repository).cloned()
    }

    /// Every successful deletion, in order, as `(repository, reference)`.
    #[must_use]
    pub fn deletions(&self) -> Vec<(String, String)> {
        self.state.read().deletions.clone()
    }

    /// Number of reads served, failed ones included.
    #[must_use]
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn check_failing(&self, repository: &str) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.state.read().failing.contains(repository) {
            let url = format!("memory://{repository}");
            return Err(RegistryError::RetriesExhausted {
                attempts: 1,
                source: Box::new(RegistryError::Timeout { url: url.clone() }),
                url,
            });
        }
        Ok(())
    }
}

impl State {
    fn link_parents(&mut self, repository: &str) {
        let parts: Vec<&str> = repository.split('/').collect();
        for i in 2..parts.len() {
            let parent = parts[..i].join("/");
            let child = parts[i].to_string();
            let entry = self.repos.entry(parent).or_default();
            if !entry.child.contains(&child) {
                entry.child.push(child);
            }
        }
    }

    fn delete(&mut self, repository: &str, reference: &str) -> Result<()> {
        let url = format!("memory://{repository}/manifests/{reference}");
        let Some(repo) = self.repos.get_mut(repository) else {
            return Err(RegistryError::NotFound { url });
        };

        if !reference.starts_with("sha256:") {
            let mut found = false;
            for info in repo.manifest.values_mut() {
                let before = info.tag.len();
                info.tag.retain(|t| t != reference);
                found |= info.tag.len() != before;
            }
            repo.tags.retain(|t| t != reference);
            return if found { Ok(()) } else { Err(RegistryError::NotFound { url }) };
        }

        let Some(info) = repo.manifest.get(reference) else {
            return Err(RegistryError::NotFound { url });
        };
        if !info.tag.is_empty() {
            return Err(RegistryError::Http {
                url,
                status: 400,
                message: "manifest is still tagged".to_string(),
            });
        }
        let referenced = self.lists.iter().any(|((repo_name, list_digest), list)| {
            repo_name == repository
                && repo.manifest.contains_key(list_digest)
                && list.manifests.iter().any(|m| m.digest == reference)
        });
        if referenced {
            return Err(RegistryError::Http {
                url,
                status: 400,
                message: "manifest is referenced by a manifest list".to_string(),
            });
        }
        repo.manifest.remove(reference);
        self.lists.remove(&(repository.to_string(), reference.to_string()));
        Ok(())
    }
}

#[async_trait]
impl RepositoryReader for InMemoryRegistry {
    async fn read_tags(&self, repository: &str) -> Result<TagsList> {
        self.check_failing(repository)?;
        let mut list = self.repository(repository).ok_or_else(|| RegistryError::NotFound {
            url: format!("memory://{repository}"),
        })?;
        list.name = repository.to_string();
        Ok(list)
    }

    async fn read_manifest_list(&self, repository: &str, digest: &str) -> Result<ManifestList> {
        self.check_failing(repository)?;
        self.state
            .read()
            .lists
            .get(&(repository.to_string(), digest.to_string()))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                url: format!("memory://{repository}/manifests/{digest}"),
            })
    }
}

#[async_trait]
impl RepositoryWriter for InMemoryRegistry {
    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        let mut state = self.state.write();
        state.delete(repository, reference)?;
        state
            .deletions
            .push((repository.to_string(), reference.to_string()));
        Ok(())
    }
}
