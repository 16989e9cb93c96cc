//! Error types for registry sync operations.

use thiserror::Error;

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while crawling or mutating registries.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A registry call failed.
    #[error("registry call for {repository} failed: {source}")]
    Registry {
        /// Repository path the call addressed.
        repository: String,
        /// Underlying registry error.
        #[source]
        source: cip_registry::RegistryError,
    },

    /// The copy tool failed.
    #[error("copy {src} -> {dst} failed: {message}")]
    Copy {
        /// Source reference.
        src: String,
        /// Destination reference.
        dst: String,
        /// Tool output or spawn error.
        message: String,
    },

    /// A request kind is not allowed on this path.
    #[error("{kind} requests are not supported here")]
    UnsupportedRequest {
        /// The refused kind.
        kind: String,
    },

    /// A delete was requested without a registry writer.
    #[error("no registry writer configured for deletions")]
    NoWriter,

    /// A destructive operation targeted a source registry.
    #[error("refusing to modify source registry {registry}")]
    SourceRegistry {
        /// The source registry.
        registry: String,
    },

    /// One or more job handlers panicked.
    #[error("{count} job handler(s) panicked")]
    HandlerPanicked {
        /// Number of panicked jobs.
        count: usize,
    },

    /// A worker task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// Returns true if the error came from a registry that could not be
    /// reached after retries.
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Registry {
                source: cip_registry::RegistryError::RetriesExhausted { .. }
                    | cip_registry::RegistryError::ConnectionFailed { .. }
                    | cip_registry::RegistryError::Timeout { .. },
                ..
            }
        )
    }
}
