//! Promotion edges: atomic "copy this digest (and tag) from src to dst" intents.
//!
//! Edges are computed from manifests alone. Overlap detection runs over
//! the whole set so two manifests can never claim one destination tag
//! with different digests.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::info;

use crate::error::{CoreError, Result};
use crate::manifest::{Manifest, RegistryContext};
use crate::name::{fqin, pqin, Digest, ImageName, RegistryName, Tag};

/// An image name with an optional tag. A missing tag means a digest-only
/// (tagless) promotion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageTag {
    /// Image name relative to the registry.
    pub name: ImageName,
    /// Tag, if any.
    pub tag: Option<Tag>,
}

impl ImageTag {
    /// Creates an image tag.
    #[must_use]
    pub const fn new(name: ImageName, tag: Option<Tag>) -> Self {
        Self { name, tag }
    }
}

/// One intended copy from a source registry to a destination registry.
///
/// Ordering follows field order, so the first edge of a group in a
/// `BTreeSet` has the lexicographically smallest source registry and image.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PromotionEdge {
    /// Registry the content is copied from.
    pub src_registry: RegistryContext,
    /// Source image and tag.
    pub src_image_tag: ImageTag,
    /// Content digest being promoted.
    pub digest: Digest,
    /// Registry the content is copied to.
    pub dst_registry: RegistryContext,
    /// Destination image and tag.
    pub dst_image_tag: ImageTag,
}

impl PromotionEdge {
    /// True for digest-only promotions.
    #[must_use]
    pub const fn is_tagless(&self) -> bool {
        self.dst_image_tag.tag.is_none()
    }

    /// `src/image@digest`.
    #[must_use]
    pub fn src_fqin(&self) -> String {
        fqin(&self.src_registry.name, &self.src_image_tag.name, &self.digest)
    }

    /// `dst/image@digest`.
    #[must_use]
    pub fn dst_fqin(&self) -> String {
        fqin(&self.dst_registry.name, &self.dst_image_tag.name, &self.digest)
    }

    /// `dst/image:tag`, or `None` for tagless edges.
    #[must_use]
    pub fn dst_pqin(&self) -> Option<String> {
        self.dst_image_tag
            .tag
            .as_ref()
            .map(|tag| pqin(&self.dst_registry.name, &self.dst_image_tag.name, tag))
    }

    /// The reference a copy writes to: the PQIN, or the FQIN when tagless.
    #[must_use]
    pub fn dst_reference(&self) -> String {
        self.dst_pqin().unwrap_or_else(|| self.dst_fqin())
    }
}

impl fmt::Display for PromotionEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src_fqin(), self.dst_reference())
    }
}

/// Expands manifests into promotion edges and rejects overlapping claims.
///
/// Every (image, digest, destination) triple yields one edge per tag, or a
/// single tagless edge when the digest has no tags. The result is a set so
/// it does not depend on the order manifests or images were listed in.
///
/// # Errors
///
/// Returns [`CoreError::OverlappingEdges`] if a destination tag is claimed
/// by more than one digest.
pub fn to_promotion_edges(manifests: &[Manifest]) -> Result<BTreeSet<PromotionEdge>> {
    let mut edges = BTreeSet::new();

    for manifest in manifests {
        let src = manifest.source_registry();
        for image in manifest.images() {
            for (digest, tags) in &image.dmap {
                for dst in manifest.destination_registries() {
                    if tags.is_empty() {
                        edges.insert(edge(src, dst, &image.name, digest, None));
                    }
                    for tag in tags {
                        edges.insert(edge(src, dst, &image.name, digest, Some(tag.clone())));
                    }
                }
            }
        }
    }

    check_overlapping_edges(edges)
}

fn edge(
    src: &RegistryContext,
    dst: &RegistryContext,
    image: &ImageName,
    digest: &Digest,
    tag: Option<Tag>,
) -> PromotionEdge {
    PromotionEdge {
        src_registry: src.clone(),
        src_image_tag: ImageTag::new(image.clone(), tag.clone()),
        digest: digest.clone(),
        dst_registry: dst.clone(),
        dst_image_tag: ImageTag::new(image.clone(), tag),
    }
}

/// Groups edges by destination and collapses redundant ones.
///
/// Tagged edges are grouped by destination PQIN. A group carrying two or
/// more digests is a conflict; a group sharing one digest keeps only its
/// first edge (smallest source registry, then source image). Tagless edges
/// cannot collide on a tag and are only collapsed per destination FQIN.
///
/// # Errors
///
/// Returns [`CoreError::OverlappingEdges`] listing every conflicting PQIN.
pub fn check_overlapping_edges(edges: BTreeSet<PromotionEdge>) -> Result<BTreeSet<PromotionEdge>> {
    let mut by_pqin: BTreeMap<(&RegistryName, &ImageName, &Tag), Vec<&PromotionEdge>> =
        BTreeMap::new();
    let mut by_fqin: BTreeMap<(&RegistryName, &ImageName, &Digest), Vec<&PromotionEdge>> =
        BTreeMap::new();

    for edge in &edges {
        let dst = &edge.dst_image_tag;
        match &dst.tag {
            Some(tag) => by_pqin
                .entry((&edge.dst_registry.name, &dst.name, tag))
                .or_default()
                .push(edge),
            None => by_fqin
                .entry((&edge.dst_registry.name, &dst.name, &edge.digest))
                .or_default()
                .push(edge),
        }
    }

    let mut conflicts = Vec::new();
    let mut kept = BTreeSet::new();

    for ((registry, image, tag), group) in by_pqin {
        let digests: BTreeSet<&Digest> = group.iter().map(|e| &e.digest).collect();
        if digests.len() > 1 {
            let claimed: Vec<&str> = digests.iter().map(|d| d.as_str()).collect();
            conflicts.push(format!(
                "{} claimed by digests [{}]",
                pqin(registry, image, tag),
                claimed.join(", ")
            ));
            continue;
        }
        kept.extend(keep_first(&group));
    }

    for (_, group) in by_fqin {
        kept.extend(keep_first(&group));
    }

    if conflicts.is_empty() {
        Ok(kept.into_iter().cloned().collect())
    } else {
        Err(CoreError::OverlappingEdges { conflicts })
    }
}

fn keep_first<'a>(group: &[&'a PromotionEdge]) -> Option<&'a PromotionEdge> {
    let (first, rest) = group.split_first()?;
    for redundant in rest {
        info!(
            kept = %first,
            redundant = %redundant,
            "dropping redundant edge with identical destination and digest"
        );
    }
    Some(*first)
}
