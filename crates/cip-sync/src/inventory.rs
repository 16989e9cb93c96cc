//! Concurrent registry crawl.
//!
//! [`SyncContext`] reads every registry named by a set of manifests into
//! one [`MasterInventory`], recording media types, sizes and manifest-list
//! children along the way. Reads go through the worker pool; repositories
//! that cannot be read are put on the ignore list instead of aborting the
//! run.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cip_core::{
    insert_tag, sort_registries_longest_first, split_registry_image_path, Digest, DigestTags,
    IgnoreSet, ImageName, InventoryView, Manifest, MasterInventory, ParentDigests,
    RegistryContext, RegistryName, Tag,
};
use cip_registry::{MediaType, RegistryError, RepositoryReader, TagsList};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::pool::{JobHandler, JobQueue, WorkerPool};

/// A failure recorded during a crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    /// Repository or reference the failure concerns.
    pub context: String,
    /// Rendered error.
    pub message: String,
}

impl SyncFailure {
    fn new(context: impl Into<String>, message: impl ToString) -> Self {
        Self {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

/// Everything learned about the registries during one run.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    /// Digests and tags per registry and image.
    pub inventory: MasterInventory,
    /// Media type of every digest seen.
    pub media_types: BTreeMap<Digest, MediaType>,
    /// Size in bytes of every digest seen.
    pub sizes: BTreeMap<Digest, i64>,
    /// Manifest-list children.
    pub parent_digests: ParentDigests,
    /// Images and repository subtrees that could not be read.
    pub ignored: IgnoreSet,
    /// Read failures and skipped entries.
    pub errors: Vec<SyncFailure>,
}

impl SyncState {
    /// Borrows the facts the diff engine needs.
    #[must_use]
    pub const fn view(&self) -> InventoryView<'_> {
        InventoryView::new(&self.inventory, &self.ignored, &self.parent_digests)
    }

    fn merge(&mut self, registry: RegistryName, image: ImageName, dmap: DigestTags) {
        let target = self
            .inventory
            .entry(registry)
            .or_default()
            .entry(image)
            .or_default();
        for (digest, tags) in dmap {
            if tags.is_empty() {
                insert_tag(target, digest, None);
            } else {
                for tag in tags {
                    insert_tag(target, digest.clone(), Some(tag));
                }
            }
        }
    }
}

/// One unit of crawl work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadJob {
    /// List a repository by full path.
    Repository(String),
    /// Fetch a manifest list and record its children.
    ManifestList {
        /// Registry holding the list.
        registry: RegistryName,
        /// Image holding the list.
        image: ImageName,
        /// Digest of the list.
        digest: Digest,
    },
}

/// Shared state of a crawl over a set of registries.
#[derive(Clone)]
pub struct SyncContext {
    inner: Arc<Inner>,
}

struct Inner {
    registries: Vec<RegistryContext>,
    names: Vec<RegistryName>,
    reader: Arc<dyn RepositoryReader>,
    config: SyncConfig,
    state: Mutex<SyncState>,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("registries", &self.inner.registries)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Creates a context over `registries`. Duplicate names are merged,
    /// keeping the first entry.
    #[must_use]
    pub fn new(
        registries: Vec<RegistryContext>,
        reader: Arc<dyn RepositoryReader>,
        config: SyncConfig,
    ) -> Self {
        let mut unique: Vec<RegistryContext> = Vec::with_capacity(registries.len());
        for registry in registries {
            if !unique.iter().any(|r| r.name == registry.name) {
                unique.push(registry);
            }
        }
        let mut names: Vec<RegistryName> = unique.iter().map(|r| r.name.clone()).collect();
        sort_registries_longest_first(&mut names);

        Self {
            inner: Arc::new(Inner {
                registries: unique,
                names,
                reader,
                config,
                state: Mutex::new(SyncState::default()),
            }),
        }
    }

    /// Creates a context over every registry named by `manifests`.
    #[must_use]
    pub fn from_manifests(
        manifests: &[Manifest],
        reader: Arc<dyn RepositoryReader>,
        config: SyncConfig,
    ) -> Self {
        let registries = manifests
            .iter()
            .flat_map(|m| m.registries().iter().cloned())
            .collect();
        Self::new(registries, reader, config)
    }

    /// Registries this context crawls.
    #[must_use]
    pub fn registries(&self) -> &[RegistryContext] {
        &self.inner.registries
    }

    /// Configuration of this context.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        self.inner.state.lock().clone()
    }

    /// Runs `f` with the current state locked.
    pub fn with_state<T>(&self, f: impl FnOnce(&SyncState) -> T) -> T {
        f(&self.inner.state.lock())
    }

    /// Crawls every registry, then every manifest list found.
    ///
    /// # Errors
    ///
    /// Returns an error only if a worker panicked. Read failures are
    /// recorded in the state.
    pub async fn read_all(&self) -> Result<()> {
        self.read_registries().await?;
        self.read_manifest_lists().await
    }

    /// Crawls every registry root and, if configured, its children.
    ///
    /// # Errors
    ///
    /// Returns an error only if a worker panicked.
    pub async fn read_registries(&self) -> Result<()> {
        let roots: Vec<String> = self
            .inner
            .registries
            .iter()
            .map(|r| r.name.as_str().to_string())
            .collect();
        info!(registries = roots.len(), "reading registries");

        WorkerPool::from_config(&self.inner.config)
            .run(Arc::clone(&self.inner), |queue| {
                for root in roots {
                    queue.push(ReadJob::Repository(root));
                }
            })
            .await?;

        self.with_state(|state| {
            info!(
                images = state.inventory.values().map(BTreeMap::len).sum::<usize>(),
                ignored = state.ignored.len(),
                errors = state.errors.len(),
                "finished reading registries"
            );
        });
        Ok(())
    }

    /// Fetches every manifest list in the inventory and records which
    /// digests are its children.
    ///
    /// # Errors
    ///
    /// Returns an error only if a worker panicked.
    pub async fn read_manifest_lists(&self) -> Result<()> {
        let jobs: Vec<ReadJob> = self.with_state(|state| {
            state
                .inventory
                .iter()
                .flat_map(|(registry, rii)| {
                    rii.iter().flat_map(move |(image, dmap)| {
                        dmap.keys().map(move |digest| (registry, image, digest))
                    })
                })
                .filter(|(_, _, digest)| {
                    state
                        .media_types
                        .get(*digest)
                        .is_some_and(MediaType::is_manifest_list)
                })
                .map(|(registry, image, digest)| ReadJob::ManifestList {
                    registry: registry.clone(),
                    image: image.clone(),
                    digest: digest.clone(),
                })
                .collect()
        });
        info!(lists = jobs.len(), "reading manifest lists");

        WorkerPool::from_config(&self.inner.config)
            .run(Arc::clone(&self.inner), |queue| {
                for job in jobs {
                    queue.push(job);
                }
            })
            .await
    }
}

impl Inner {
    async fn read_repository(&self, path: String, queue: &JobQueue<ReadJob>) {
        let is_root = self.names.iter().any(|n| n.as_str() == path);
        let located = if is_root {
            None
        } else {
            split_registry_image_path(&path, &self.names)
        };

        let tags = match self.reader.read_tags(&path).await {
            Ok(tags) => tags,
            Err(RegistryError::NotFound { .. }) => {
                debug!(repository = %path, "repository does not exist");
                return;
            }
            Err(source) => {
                warn!(repository = %path, error = %source, "failed to read repository");
                let mut state = self.state.lock();
                if let Some((_, image)) = &located {
                    state.ignored.insert(image.clone());
                }
                // Children of an unread repository were never listed.
                state.ignored.insert_path(path.clone());
                let error = SyncError::Registry {
                    repository: path.clone(),
                    source,
                };
                state.errors.push(SyncFailure::new(path, error));
                return;
            }
        };

        if let Some((registry, image)) = located {
            self.record(registry, image, &path, &tags);
        }

        if self.config.recurse {
            for child in &tags.child {
                let child_path = format!("{path}/{child}");
                // Nested registries are crawled from their own root.
                if self.names.iter().any(|n| n.as_str() == child_path) {
                    continue;
                }
                queue.push(ReadJob::Repository(child_path));
            }
        }
    }

    fn record(&self, registry: RegistryName, image: ImageName, path: &str, tags: &TagsList) {
        let mut state = self.state.lock();
        let mut dmap = DigestTags::new();

        for (raw, facts) in &tags.manifest {
            let digest = match Digest::parse(raw.as_str()) {
                Ok(digest) => digest,
                Err(e) => {
                    warn!(repository = %path, digest = %raw, "skipping invalid digest");
                    state.errors.push(SyncFailure::new(format!("{path}@{raw}"), e));
                    continue;
                }
            };

            if !facts.media_type.is_supported() {
                warn!(
                    repository = %path,
                    digest = %digest,
                    media_type = %facts.media_type,
                    "unsupported media type"
                );
                state.errors.push(SyncFailure::new(
                    format!("{path}@{digest}"),
                    format!("unsupported media type {}", facts.media_type),
                ));
            }
            state
                .media_types
                .insert(digest.clone(), facts.media_type.clone());
            state.sizes.insert(digest.clone(), facts.image_size_bytes);

            insert_tag(&mut dmap, digest.clone(), None);
            for raw_tag in &facts.tag {
                match Tag::parse(raw_tag.as_str()) {
                    Ok(tag) => insert_tag(&mut dmap, digest.clone(), Some(tag)),
                    Err(e) => {
                        warn!(repository = %path, tag = %raw_tag, "skipping invalid tag");
                        state.errors.push(SyncFailure::new(format!("{path}:{raw_tag}"), e));
                    }
                }
            }
        }

        if dmap.is_empty() {
            return;
        }
        debug!(repository = %path, digests = dmap.len(), "recorded repository");
        state.merge(registry, image, dmap);
    }

    async fn read_manifest_list(&self, registry: RegistryName, image: ImageName, digest: Digest) {
        let repository = format!("{registry}/{image}");
        match self
            .reader
            .read_manifest_list(&repository, digest.as_str())
            .await
        {
            Ok(list) => {
                let mut state = self.state.lock();
                for entry in &list.manifests {
                    match Digest::parse(entry.digest.as_str()) {
                        Ok(child) => {
                            state.parent_digests.insert(child, digest.clone());
                        }
                        Err(e) => state
                            .errors
                            .push(SyncFailure::new(format!("{repository}@{digest}"), e)),
                    }
                }
            }
            Err(source) => {
                warn!(
                    repository = %repository,
                    digest = %digest,
                    error = %source,
                    "failed to read manifest list"
                );
                let mut state = self.state.lock();
                state.ignored.insert(image);
                let error = SyncError::Registry {
                    repository: repository.clone(),
                    source,
                };
                state
                    .errors
                    .push(SyncFailure::new(format!("{repository}@{digest}"), error));
            }
        }
    }
}

#[async_trait]
impl JobHandler<ReadJob> for Inner {
    async fn handle(&self, job: ReadJob, queue: &JobQueue<ReadJob>) {
        match job {
            ReadJob::Repository(path) => self.read_repository(path, queue).await,
            ReadJob::ManifestList {
                registry,
                image,
                digest,
            } => self.read_manifest_list(registry, image, digest).await,
        }
    }
}
