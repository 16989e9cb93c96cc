//! Image size check.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use cip_core::{Digest, PromotionEdge};
use tracing::debug;

use crate::check::PreCheck;
use crate::error::{CheckError, Result};

const MIB: i64 = 1024 * 1024;

/// Fails if a source image is larger than a ceiling, or reports a size of
/// zero or less.
#[derive(Debug, Clone)]
pub struct ImageSizeCheck {
    max_mib: i64,
    edges: BTreeSet<PromotionEdge>,
    sizes: BTreeMap<Digest, i64>,
}

impl ImageSizeCheck {
    /// Creates a check over `edges`, with `sizes` as read from the source
    /// registry. Digests without a recorded size count as zero bytes.
    #[must_use]
    pub const fn new(
        max_mib: i64,
        edges: BTreeSet<PromotionEdge>,
        sizes: BTreeMap<Digest, i64>,
    ) -> Self {
        Self {
            max_mib,
            edges,
            sizes,
        }
    }
}

#[async_trait]
impl PreCheck for ImageSizeCheck {
    fn name(&self) -> &str {
        "image-size"
    }

    async fn run(&self) -> Result<()> {
        let max_bytes = self.max_mib.saturating_mul(MIB);
        let mut too_large = BTreeSet::new();
        let mut invalid = BTreeSet::new();

        for edge in &self.edges {
            let size = self.sizes.get(&edge.digest).copied().unwrap_or(0);
            debug!(image = %edge.src_fqin(), size, "checking size");
            if size <= 0 {
                invalid.insert(format!("{} ({size} bytes)", edge.src_fqin()));
            } else if size > max_bytes {
                too_large.insert(format!("{} ({} MiB)", edge.src_fqin(), size / MIB));
            }
        }

        if too_large.is_empty() && invalid.is_empty() {
            return Ok(());
        }

        let mut parts = Vec::new();
        if !too_large.is_empty() {
            parts.push(format!(
                "images larger than {} MiB: {}",
                self.max_mib,
                too_large.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
        if !invalid.is_empty() {
            parts.push(format!(
                "images with invalid size: {}",
                invalid.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
        Err(CheckError::failed(self.name(), parts.join("; ")))
    }
}
