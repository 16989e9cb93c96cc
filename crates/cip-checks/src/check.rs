//! The check interface and pipeline.

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::{CheckError, Result};

/// A validation run before promotion.
#[async_trait]
pub trait PreCheck: Send + Sync {
    /// Short name used in reports.
    fn name(&self) -> &str;

    /// Runs the check.
    ///
    /// # Errors
    ///
    /// Returns an error describing every violation found.
    async fn run(&self) -> Result<()>;
}

/// Runs every check in order and aggregates their failures.
///
/// A failing check never stops the ones after it.
///
/// # Errors
///
/// Returns [`CheckError::Aggregate`] holding each failure if any check
/// failed.
pub async fn run_checks(checks: &[Box<dyn PreCheck>]) -> Result<()> {
    let mut failures = Vec::new();
    for check in checks {
        info!(check = check.name(), "running check");
        match check.run().await {
            Ok(()) => info!(check = check.name(), "check passed"),
            Err(e) => {
                error!(check = check.name(), error = %e, "check failed");
                failures.push(e);
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(CheckError::Aggregate { failures })
    }
}
