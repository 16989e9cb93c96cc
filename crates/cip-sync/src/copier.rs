//! Image copy backends.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Copies an image between registries.
#[async_trait]
pub trait ImageCopier: Send + Sync {
    /// Copies `src` (an FQIN) to `dst` (an FQIN or PQIN).
    async fn copy(&self, src: &str, dst: &str) -> Result<()>;
}

/// Copies images by running `crane copy <src> <dst>`.
///
/// Credentials come from the environment crane runs in.
#[derive(Debug, Clone)]
pub struct CraneCopier {
    binary: PathBuf,
    args: Vec<String>,
}

impl Default for CraneCopier {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("crane"),
            args: Vec::new(),
        }
    }
}

impl CraneCopier {
    /// Uses `crane` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the given binary instead of `crane` from `PATH`.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Appends extra arguments after the destination, e.g. `--platform`.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl ImageCopier for CraneCopier {
    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        debug!(binary = %self.binary.display(), src, dst, "running copy");
        let output = Command::new(&self.binary)
            .arg("copy")
            .arg(src)
            .arg(dst)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| SyncError::Copy {
                src: src.to_string(),
                dst: dst.to_string(),
                message: format!("failed to run {}: {e}", self.binary.display()),
            })?;

        if output.status.success() {
            return Ok(());
        }
        Err(SyncError::Copy {
            src: src.to_string(),
            dst: dst.to_string(),
            message: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_exit() {
        let copier = CraneCopier::new().with_binary("true");
        copier.copy("gcr.io/src/a@sha256:00", "gcr.io/dst/a:1.0").await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_exit() {
        let copier = CraneCopier::new().with_binary("false");
        let err = copier
            .copy("gcr.io/src/a@sha256:00", "gcr.io/dst/a:1.0")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Copy { ref dst, .. } if dst == "gcr.io/dst/a:1.0"));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let copier = CraneCopier::new().with_binary("/nonexistent/crane");
        let err = copier.copy("a", "b").await.unwrap_err();
        assert!(err.to_string().contains("failed to run"));
    }
}
