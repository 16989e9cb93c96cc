//! Error types for manifest loading and edge computation.

use std::path::PathBuf;

use thiserror::Error;

use crate::validation::ValidationErrors;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised before any registry is touched. All of them abort a run.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A manifest file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A manifest is not well-formed YAML or has unknown fields.
    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        /// Path of the manifest, or `<bytes>` when parsed from memory.
        path: PathBuf,
        /// Underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },

    /// A manifest parsed but violates semantic rules.
    #[error("invalid manifest {path}: {errors}")]
    Invalid {
        /// Path of the manifest, or `<bytes>` when parsed from memory.
        path: PathBuf,
        /// Every violation found.
        errors: ValidationErrors,
    },

    /// A thin-manifest directory tree does not follow the required layout.
    #[error("invalid thin-manifest directory {root}: {errors}")]
    Layout {
        /// Root directory that was checked.
        root: PathBuf,
        /// Every layout violation found.
        errors: ValidationErrors,
    },

    /// Two or more edges claim the same destination tag with different digests.
    #[error("overlapping edges detected: {}", conflicts.join("; "))]
    OverlappingEdges {
        /// One description per conflicting destination PQIN.
        conflicts: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationError;

    #[test]
    fn test_overlapping_edges_display() {
        let err = CoreError::OverlappingEdges {
            conflicts: vec!["gcr.io/b/a:0.9".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "overlapping edges detected: gcr.io/b/a:0.9"
        );
    }

    #[test]
    fn test_invalid_display_includes_errors() {
        let err = CoreError::Invalid {
            path: PathBuf::from("m.yaml"),
            errors: ValidationError::required("registries").into(),
        };
        let s = err.to_string();
        assert!(s.contains("m.yaml"));
        assert!(s.contains("registries"));
    }
}
