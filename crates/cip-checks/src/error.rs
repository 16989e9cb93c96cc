//! Error types for pre-promotion checks.

use std::fmt::Write as _;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for check operations.
pub type Result<T> = std::result::Result<T, CheckError>;

/// Errors raised by checks and the sources they read.
#[derive(Error, Debug)]
pub enum CheckError {
    /// A check ran and found a violation.
    #[error("{check} failed: {message}")]
    Failed {
        /// Name of the check.
        check: String,
        /// What was found.
        message: String,
    },

    /// One or more checks failed.
    #[error("{}", render_failures(.failures))]
    Aggregate {
        /// Failures in the order the checks ran.
        failures: Vec<CheckError>,
    },

    /// Manifests could not be loaded.
    #[error(transparent)]
    Manifest(#[from] cip_core::CoreError),

    /// Running a worker pool failed.
    #[error(transparent)]
    Sync(#[from] cip_sync::SyncError),

    /// A manifest revision could not be materialised.
    #[error("cannot read revision {revision}: {message}")]
    Revision {
        /// Requested revision.
        revision: String,
        /// Cause.
        message: String,
    },

    /// I/O error with path context.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path involved in the operation.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The vulnerability provider could not be queried.
    #[error("vulnerability lookup for {resource} failed: {message}")]
    Provider {
        /// Resource queried.
        resource: String,
        /// Cause.
        message: String,
    },
}

impl CheckError {
    /// Creates a violation error.
    pub fn failed(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            check: check.into(),
            message: message.into(),
        }
    }

    /// Number of individual failures this error carries.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        match self {
            Self::Aggregate { failures } => failures.iter().map(Self::failure_count).sum(),
            _ => 1,
        }
    }
}

fn render_failures(failures: &[CheckError]) -> String {
    let mut out = format!("{} check(s) failed", failures.len());
    for failure in failures {
        let _ = write!(out, "\n  - {failure}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_display() {
        let err = CheckError::failed("image-size", "too big");
        assert_eq!(err.to_string(), "image-size failed: too big");
    }

    #[test]
    fn test_aggregate_display() {
        let err = CheckError::Aggregate {
            failures: vec![
                CheckError::failed("a", "one"),
                CheckError::failed("b", "two"),
            ],
        };
        let text = err.to_string();
        assert!(text.starts_with("2 check(s) failed"));
        assert!(text.contains("a failed: one"));
        assert!(text.contains("b failed: two"));
        assert_eq!(err.failure_count(), 2);
    }
}
