//! # cip-registry
//!
//! Docker Registry v2 client used by the image promoter to crawl and clean
//! registries.
//!
//! ## Features
//!
//! - **GCR extensions**: `tags/list` responses with per-digest manifest
//!   facts and child repositories
//! - **Manifest lists**: fetches Docker manifest lists and OCI indexes
//! - **Retry**: exponential backoff with jitter on connection errors,
//!   timeouts, 429 and 5xx
//! - **Auth**: none, basic, or bearer token
//! - **In-memory registry**: an implementation of the same capabilities
//!   for tests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cip_registry::{RegistryAuth, RegistryClient, RegistryConfig, RepositoryReader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RegistryConfig::new().with_auth(RegistryAuth::bearer("ya29.token"));
//!     let client = RegistryClient::new(config)?;
//!
//!     let tags = client.read_tags("gcr.io/k8s-artifacts-prod/pause").await?;
//!     for (digest, info) in &tags.manifest {
//!         println!("{digest} {:?}", info.tag);
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod error;
mod memory;
mod reader;
mod retry;
mod types;

pub use client::RegistryClient;
pub use config::{RegistryAuth, RegistryConfig};
pub use error::{RegistryError, Result};
pub use memory::InMemoryRegistry;
pub use reader::{RepositoryReader, RepositoryWriter};
pub use retry::RetryPolicy;
pub use types::{ManifestInfo, ManifestList, ManifestListEntry, MediaType, Platform, TagsList};
