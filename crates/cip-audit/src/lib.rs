//! # cip-audit
//!
//! Checks every change made to production registries against the promoter
//! manifests. GCR publishes a notification for each write; this crate
//! receives them from a Pub/Sub push subscription and decides whether a
//! manifest sanctions the change.
//!
//! ## Components
//!
//! - [`Auditor`] - judges notifications, logs every judgement, escalates
//!   rejections
//! - [`AuditLogger`] - fans records out to [`LoggerBackend`]s
//! - [`ErrorReporter`] - where rejections go
//! - [`router`] and [`serve`] - the HTTP surface
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cip_audit::{serve, Auditor, ThinManifestDir};
//! use cip_registry::{RegistryClient, RegistryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Arc::new(RegistryClient::new(RegistryConfig::new())?);
//!     let auditor = Auditor::new(Arc::new(ThinManifestDir::new("manifests")), client);
//!     serve("0.0.0.0:8080".parse()?, Arc::new(auditor)).await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auditor;
pub mod error;
pub mod logger;
pub mod payload;
pub mod record;
pub mod server;
pub mod source;

pub use auditor::Auditor;
pub use error::{AuditError, Result};
pub use logger::{
    AuditLogger, AuditLoggerBuilder, ErrorReporter, InMemoryBackend, InMemoryReporter,
    LoggerBackend, LoggerError, TracingBackend, TracingReporter,
};
pub use payload::{Action, GcrPayload, ParsedPayload, PubSubEnvelope, PubSubMessage};
pub use record::{AuditRecord, EventSeverity, Rejection, Verdict};
pub use server::{router, serve};
pub use source::{ManifestSource, StaticManifests, ThinManifestDir};
