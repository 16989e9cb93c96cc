//! # cip-core
//!
//! Manifest model and pure reconciliation logic for the image promoter.
//!
//! Nothing in this crate talks to a registry. It provides:
//!
//! - [`Manifest`] - validated desired state, loaded from full or thin manifests
//! - [`PromotionEdge`] and [`to_promotion_edges`] - atomic copy intents with
//!   overlap detection
//! - [`MasterInventory`] - the live-state snapshot other crates fill in
//! - [`get_promotion_candidates`] - the desired/actual diff
//! - [`snapshot`] - YAML and CSV renderings of an inventory
//!
//! ## Example
//!
//! ```rust
//! use cip_core::{get_promotion_candidates, to_promotion_edges, InventoryView, Manifest};
//! use cip_core::{IgnoreSet, MasterInventory, ParentDigests};
//!
//! let digest = format!("sha256:{}", "0".repeat(64));
//! let yaml = format!(
//!     "registries:\n\
//!      - name: gcr.io/src\n  src: true\n\
//!      - name: gcr.io/dst\n\
//!      images:\n\
//!      - name: a\n  dmap:\n    \"{digest}\": [\"0.9\"]\n"
//! );
//! let manifest = Manifest::parse(yaml.as_bytes()).unwrap();
//! let edges = to_promotion_edges(&[manifest]).unwrap();
//!
//! let inventory = MasterInventory::new();
//! let (ignored, parents) = (IgnoreSet::new(), ParentDigests::new());
//! let result = get_promotion_candidates(&edges, &InventoryView::new(&inventory, &ignored, &parents));
//! // The source does not hold the digest yet, so nothing can be promoted.
//! assert!(result.edges.is_empty());
//! assert!(result.clean);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod diff;
pub mod edge;
pub mod error;
pub mod inventory;
pub mod manifest;
pub mod name;
pub mod snapshot;
pub mod validation;

#[cfg(test)]
mod proptest_tests;

pub use diff::{classify, get_promotion_candidates, EdgeDecision, PromotionCandidates, VertexProperty};
pub use edge::{check_overlapping_edges, to_promotion_edges, ImageTag, PromotionEdge};
pub use error::{CoreError, Result};
pub use inventory::{
    digest_for_tag, insert_tag, DigestTags, IgnoreSet, InventoryView, MasterInventory,
    ParentDigests, RegInvImage,
};
pub use manifest::{
    load_manifests_dir, load_thin_manifests, validate_thin_manifest_layout, Image, Manifest,
    RegistryContext, ThinManifestPaths,
};
pub use name::{
    fqin, pqin, sort_registries_longest_first, split_registry_image_path, Digest, ImageName,
    ImageReference, RegistryName, Tag,
};
pub use validation::{Validate, ValidationError, ValidationErrorKind, ValidationErrors};
