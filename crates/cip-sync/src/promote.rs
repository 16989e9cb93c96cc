//! Promotion executor.
//!
//! Turns promotion edges into requests and runs them on the worker pool.
//! In dry-run mode requests are only recorded. Every request's outcome is
//! kept in a [`PromotionReport`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cip_core::{Digest, ImageName, PromotionEdge, RegistryName, Tag};
use cip_registry::RepositoryWriter;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::copier::ImageCopier;
use crate::error::{Result, SyncError};
use crate::pool::{JobHandler, JobQueue, WorkerPool};

/// What a request does to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestKind {
    /// Write a digest, optionally under a tag.
    Add,
    /// Repoint an existing tag. Never executed by the promoter.
    Move,
    /// Remove a digest and its tags.
    Delete,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "Add"),
            Self::Move => write!(f, "Move"),
            Self::Delete => write!(f, "Delete"),
        }
    }
}

/// One registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PromotionRequest {
    /// Kind of mutation.
    pub kind: RequestKind,
    /// FQIN copied from. `None` for deletions.
    pub source: Option<String>,
    /// Destination repository, `registry/image`.
    pub repository: String,
    /// Tag or digest written or deleted.
    pub reference: String,
    /// Tags removed before a digest is deleted.
    pub untag: Vec<String>,
}

impl PromotionRequest {
    /// An `Add` request executing `edge`.
    #[must_use]
    pub fn add(edge: &PromotionEdge) -> Self {
        Self::from_edge(RequestKind::Add, edge)
    }

    /// A `Move` request for `edge`'s tag.
    #[must_use]
    pub fn tag_move(edge: &PromotionEdge) -> Self {
        Self::from_edge(RequestKind::Move, edge)
    }

    fn from_edge(kind: RequestKind, edge: &PromotionEdge) -> Self {
        let reference = edge.dst_image_tag.tag.as_ref().map_or_else(
            || edge.digest.as_str().to_string(),
            |tag| tag.as_str().to_string(),
        );
        Self {
            kind,
            source: Some(edge.src_fqin()),
            repository: format!("{}/{}", edge.dst_registry.name, edge.dst_image_tag.name),
            reference,
            untag: Vec::new(),
        }
    }

    /// A `Delete` request removing `tags`, then `digest`.
    #[must_use]
    pub fn delete(registry: &RegistryName, image: &ImageName, digest: &Digest, tags: &[Tag]) -> Self {
        Self {
            kind: RequestKind::Delete,
            source: None,
            repository: format!("{registry}/{image}"),
            reference: digest.as_str().to_string(),
            untag: tags.iter().map(|t| t.as_str().to_string()).collect(),
        }
    }

    /// The destination as a full reference.
    #[must_use]
    pub fn destination(&self) -> String {
        if self.reference.starts_with("sha256:") {
            format!("{}@{}", self.repository, self.reference)
        } else {
            format!("{}:{}", self.repository, self.reference)
        }
    }
}

impl fmt::Display for PromotionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{} {source} -> {}", self.kind, self.destination()),
            None => write!(f, "{} {}", self.kind, self.destination()),
        }
    }
}

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    /// Recorded without touching any registry.
    DryRun,
    /// Executed.
    Succeeded,
    /// Executed and failed.
    Failed(String),
    /// Refused before execution.
    Rejected(String),
}

/// A request and how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    /// The request.
    pub request: PromotionRequest,
    /// Its outcome.
    pub status: RequestStatus,
}

/// Outcome of an executor run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionReport {
    /// Whether the run was a dry run.
    pub dry_run: bool,
    /// Every request, ordered by request.
    pub outcomes: Vec<RequestOutcome>,
}

impl PromotionReport {
    /// Dry-run requests and how often each was recorded.
    #[must_use]
    pub fn recorded(&self) -> BTreeMap<&PromotionRequest, usize> {
        let mut counts = BTreeMap::new();
        for outcome in &self.outcomes {
            if outcome.status == RequestStatus::DryRun {
                *counts.entry(&outcome.request).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Number of requests of each kind.
    #[must_use]
    pub fn counts_by_kind(&self) -> BTreeMap<RequestKind, usize> {
        let mut counts = BTreeMap::new();
        for outcome in &self.outcomes {
            *counts.entry(outcome.request.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Requests that were executed successfully.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.count(|s| *s == RequestStatus::Succeeded)
    }

    /// Requests that failed or were rejected.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, RequestStatus::Failed(_) | RequestStatus::Rejected(_)))
    }

    /// True if no request failed or was rejected.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Appends another report's outcomes.
    pub fn merge(&mut self, other: Self) {
        self.dry_run |= other.dry_run;
        self.outcomes.extend(other.outcomes);
    }

    /// One-line summary for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.dry_run {
            return format!(
                "dry run: {} requests recorded, {} rejected",
                self.recorded().values().sum::<usize>(),
                self.failed()
            );
        }
        format!(
            "{} requests: {} succeeded, {} failed",
            self.outcomes.len(),
            self.succeeded(),
            self.failed()
        )
    }

    fn count(&self, predicate: impl Fn(&RequestStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.status)).count()
    }
}

/// Executes promotion and deletion requests.
#[derive(Clone)]
pub struct Executor {
    config: SyncConfig,
    copier: Arc<dyn ImageCopier>,
    writer: Option<Arc<dyn RepositoryWriter>>,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("writer", &self.writer.is_some())
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Creates an executor copying with `copier`.
    #[must_use]
    pub fn new(config: SyncConfig, copier: Arc<dyn ImageCopier>) -> Self {
        Self {
            config,
            copier,
            writer: None,
        }
    }

    /// Enables deletions through `writer`.
    #[must_use]
    pub fn with_writer(mut self, writer: Arc<dyn RepositoryWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Configuration of this executor.
    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Copies every edge to its destination.
    ///
    /// # Errors
    ///
    /// Returns an error only if a worker panicked. Failed copies are
    /// reported in the [`PromotionReport`].
    pub async fn promote(&self, edges: &BTreeSet<PromotionEdge>) -> Result<PromotionReport> {
        self.execute(edges.iter().map(PromotionRequest::add).collect())
            .await
    }

    /// Runs promotion requests. Only `Add` is supported; `Move` and
    /// `Delete` are rejected.
    ///
    /// # Errors
    ///
    /// Returns an error only if a worker panicked.
    pub async fn execute(&self, requests: Vec<PromotionRequest>) -> Result<PromotionReport> {
        self.run(requests, RequestKind::Add).await
    }

    /// Runs deletion requests. Anything but `Delete` is rejected.
    ///
    /// # Errors
    ///
    /// Returns an error only if a worker panicked.
    pub async fn delete(&self, requests: Vec<PromotionRequest>) -> Result<PromotionReport> {
        self.run(requests, RequestKind::Delete).await
    }

    async fn run(&self, requests: Vec<PromotionRequest>, allowed: RequestKind) -> Result<PromotionReport> {
        let dry_run = self.config.dry_run;
        info!(requests = requests.len(), kind = %allowed, dry_run, "executing requests");

        let runner = Arc::new(RequestRunner {
            copier: Arc::clone(&self.copier),
            writer: self.writer.clone(),
            allowed,
            dry_run,
            outcomes: Mutex::new(Vec::with_capacity(requests.len())),
        });

        WorkerPool::from_config(&self.config)
            .run(Arc::clone(&runner), |queue| {
                for request in requests {
                    queue.push(request);
                }
            })
            .await?;

        let mut outcomes = std::mem::take(&mut *runner.outcomes.lock());
        outcomes.sort_by(|a, b| a.request.cmp(&b.request));
        let report = PromotionReport { dry_run, outcomes };
        info!(summary = %report.summary(), "requests finished");
        Ok(report)
    }
}

struct RequestRunner {
    copier: Arc<dyn ImageCopier>,
    writer: Option<Arc<dyn RepositoryWriter>>,
    allowed: RequestKind,
    dry_run: bool,
    outcomes: Mutex<Vec<RequestOutcome>>,
}

impl RequestRunner {
    async fn perform(&self, request: &PromotionRequest) -> Result<()> {
        match request.kind {
            RequestKind::Add | RequestKind::Move => {
                let source = request.source.as_deref().ok_or_else(|| SyncError::Copy {
                    src: String::new(),
                    dst: request.destination(),
                    message: "request has no source".to_string(),
                })?;
                self.copier.copy(source, &request.destination()).await
            }
            RequestKind::Delete => {
                let writer = self.writer.as_ref().ok_or(SyncError::NoWriter)?;
                let registry_error = |source| SyncError::Registry {
                    repository: request.repository.clone(),
                    source,
                };
                for tag in &request.untag {
                    writer
                        .delete_manifest(&request.repository, tag)
                        .await
                        .map_err(registry_error)?;
                }
                writer
                    .delete_manifest(&request.repository, &request.reference)
                    .await
                    .map_err(registry_error)
            }
        }
    }
}

#[async_trait]
impl JobHandler<PromotionRequest> for RequestRunner {
    async fn handle(&self, request: PromotionRequest, _queue: &JobQueue<PromotionRequest>) {
        let status = if request.kind != self.allowed {
            let reason = SyncError::UnsupportedRequest {
                kind: request.kind.to_string(),
            };
            warn!(request = %request, "rejected request");
            RequestStatus::Rejected(reason.to_string())
        } else if self.dry_run {
            info!(request = %request, "dry run");
            RequestStatus::DryRun
        } else {
            match self.perform(&request).await {
                Ok(()) => {
                    info!(request = %request, "request succeeded");
                    RequestStatus::Succeeded
                }
                Err(e) => {
                    error!(request = %request, error = %e, "request failed");
                    RequestStatus::Failed(e.to_string())
                }
            }
        };
        self.outcomes.lock().push(RequestOutcome { request, status });
    }
}
