//! # cip-checks
//!
//! Checks run before a promotion is allowed to proceed.
//!
//! Every check implements [`PreCheck`]; [`run_checks`] runs them all and
//! reports every failure together.
//!
//! - [`ImageRemovalCheck`] - a change must not stop promoting images that
//!   are already promoted
//! - [`ImageSizeCheck`] - source images must have a sane size
//! - [`ImageVulnerabilityCheck`] - no fixable vulnerabilities at or above a
//!   severity threshold
//!
//! ## Example
//!
//! ```rust
//! use std::collections::{BTreeMap, BTreeSet};
//!
//! use cip_checks::{run_checks, ImageSizeCheck, PreCheck};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let checks: Vec<Box<dyn PreCheck>> = vec![Box::new(ImageSizeCheck::new(
//!     2048,
//!     BTreeSet::new(),
//!     BTreeMap::new(),
//! ))];
//! run_checks(&checks).await.unwrap();
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod check;
pub mod error;
pub mod removal;
pub mod size;
pub mod vuln;

pub use check::{run_checks, PreCheck};
pub use error::{CheckError, Result};
pub use removal::{DirRevisionSource, GitRevisionSource, ImageRemovalCheck, ManifestRevisionSource};
pub use size::ImageSizeCheck;
pub use vuln::{GrafeasProvider, ImageVulnerabilityCheck, Occurrence, Severity, VulnerabilityProvider};
