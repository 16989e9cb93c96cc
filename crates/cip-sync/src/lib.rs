//! # cip-sync
//!
//! Everything in the image promoter that touches live registries.
//!
//! ## Components
//!
//! - [`WorkerPool`] - bounded queue drained by a fixed number of workers
//! - [`SyncContext`] - concurrent crawl of registries into a
//!   [`MasterInventory`](cip_core::MasterInventory)
//! - [`Executor`] - runs promotion and deletion requests, honoring dry run
//! - [`garbage_collect`] and [`clear_repository`] - destination cleanup
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cip_core::{get_promotion_candidates, load_thin_manifests, to_promotion_edges};
//! use cip_registry::{RegistryClient, RegistryConfig};
//! use cip_sync::{CraneCopier, Executor, SyncConfig, SyncContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manifests = load_thin_manifests("manifests".as_ref())?;
//!     let edges = to_promotion_edges(&manifests)?;
//!
//!     let client = Arc::new(RegistryClient::new(RegistryConfig::new())?);
//!     let config = SyncConfig::builder().dry_run(true).build();
//!     let context = SyncContext::from_manifests(&manifests, client, config.clone());
//!     context.read_all().await?;
//!
//!     let candidates = context.with_state(|s| get_promotion_candidates(&edges, &s.view()));
//!     let report = Executor::new(config, Arc::new(CraneCopier::new()))
//!         .promote(&candidates.edges)
//!         .await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod copier;
pub mod error;
pub mod gc;
pub mod inventory;
pub mod pool;
pub mod promote;

pub use config::{SyncConfig, SyncConfigBuilder};
pub use copier::{CraneCopier, ImageCopier};
pub use error::{Result, SyncError};
pub use gc::{clear_repository, clear_repository_requests, garbage_collect, garbage_collection_requests};
pub use inventory::{ReadJob, SyncContext, SyncFailure, SyncState};
pub use pool::{JobHandler, JobQueue, WorkerPool};
pub use promote::{
    Executor, PromotionReport, PromotionRequest, RequestKind, RequestOutcome, RequestStatus,
};
