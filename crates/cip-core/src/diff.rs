//! Desired-versus-actual reconciliation.
//!
//! Each edge is classified against the live inventory. Only edges that
//! add a missing tag or digest become candidates; an edge that would move
//! an existing tag is refused and marks the whole run unclean.

use std::collections::BTreeSet;

use tracing::{error, info, warn};

use crate::edge::PromotionEdge;
use crate::inventory::{digest_for_tag, InventoryView};
use crate::name::{Digest, ImageName, RegistryName, Tag};

/// Existence facts about one endpoint of an edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexProperty {
    /// The tag exists in the image, pointing anywhere.
    pub pqin_exists: bool,
    /// The digest exists in the image.
    pub digest_exists: bool,
    /// The tag exists and points at the wanted digest.
    pub pqin_digest_match: bool,
    /// The digest the tag currently points at, when it is not the wanted one.
    pub bad_digest: Option<Digest>,
    /// Tags already on the wanted digest, other than the wanted tag.
    pub other_tags: Vec<Tag>,
}

impl VertexProperty {
    /// Computes the facts for `registry/image[:tag]@digest`.
    #[must_use]
    pub fn compute(
        view: &InventoryView<'_>,
        registry: &RegistryName,
        image: &ImageName,
        tag: Option<&Tag>,
        digest: &Digest,
    ) -> Self {
        let Some(dmap) = view.digest_tags(registry, image) else {
            return Self::default();
        };

        let current = tag.and_then(|t| digest_for_tag(dmap, t));
        let other_tags = dmap
            .get(digest)
            .map(|tags| tags.iter().filter(|t| Some(*t) != tag).cloned().collect())
            .unwrap_or_default();

        Self {
            pqin_exists: current.is_some(),
            digest_exists: dmap.contains_key(digest),
            pqin_digest_match: current == Some(digest),
            bad_digest: current.filter(|d| *d != digest).cloned(),
            other_tags,
        }
    }

    /// Facts about the source side of an edge.
    #[must_use]
    pub fn source(view: &InventoryView<'_>, edge: &PromotionEdge) -> Self {
        Self::compute(
            view,
            &edge.src_registry.name,
            &edge.src_image_tag.name,
            edge.src_image_tag.tag.as_ref(),
            &edge.digest,
        )
    }

    /// Facts about the destination side of an edge.
    #[must_use]
    pub fn destination(view: &InventoryView<'_>, edge: &PromotionEdge) -> Self {
        Self::compute(
            view,
            &edge.dst_registry.name,
            &edge.dst_image_tag.name,
            edge.dst_image_tag.tag.as_ref(),
            &edge.digest,
        )
    }
}

/// How the diff engine treated one edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeDecision {
    /// The source or destination image could not be read.
    Ignored,
    /// The destination tag already points at the digest.
    AlreadyPromoted,
    /// Tagless edge whose digest is already at the destination. `lost` is
    /// set when the source no longer has the digest.
    AlreadyPromotedTagless {
        /// The source lacks the digest.
        lost: bool,
    },
    /// Tagless manifest-list child whose parent is, or will be, at the destination.
    ChildOfPromotedParent {
        /// The manifest list the child belongs to.
        parent: Digest,
    },
    /// The source does not have the digest.
    Lost,
    /// The destination tag points at another digest. Never auto-corrected.
    Rejected {
        /// Digest the destination tag currently points at.
        existing: Digest,
    },
    /// The edge must be executed.
    Candidate,
}

/// Result of a diff run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionCandidates {
    /// Edges that must be executed.
    pub edges: BTreeSet<PromotionEdge>,
    /// False if any edge was refused as a tag move. Callers must treat an
    /// unclean result as failure.
    pub clean: bool,
}

/// Classifies one edge. `parents_in_flight` holds the `(dst registry, dst
/// image, digest)` triples some edge of the same run will write.
#[must_use]
pub fn classify(
    view: &InventoryView<'_>,
    edge: &PromotionEdge,
    parents_in_flight: &BTreeSet<(&RegistryName, &ImageName, &Digest)>,
) -> EdgeDecision {
    if view.ignored.covers(&edge.src_registry.name, &edge.src_image_tag.name)
        || view.ignored.covers(&edge.dst_registry.name, &edge.dst_image_tag.name)
    {
        return EdgeDecision::Ignored;
    }

    let src = VertexProperty::source(view, edge);
    let dst = VertexProperty::destination(view, edge);

    if dst.pqin_digest_match {
        return EdgeDecision::AlreadyPromoted;
    }

    if edge.is_tagless() {
        if dst.digest_exists {
            return EdgeDecision::AlreadyPromotedTagless {
                lost: !src.digest_exists,
            };
        }
        if let Some(parent) = view.parent_digests.get(&edge.digest) {
            let dst_has_parent = view
                .digest_tags(&edge.dst_registry.name, &edge.dst_image_tag.name)
                .is_some_and(|dmap| dmap.contains_key(parent));
            let parent_key = (&edge.dst_registry.name, &edge.dst_image_tag.name, parent);
            if dst_has_parent || parents_in_flight.contains(&parent_key) {
                return EdgeDecision::ChildOfPromotedParent {
                    parent: parent.clone(),
                };
            }
        }
    }

    if !src.digest_exists {
        return EdgeDecision::Lost;
    }

    if let Some(existing) = dst.bad_digest {
        return EdgeDecision::Rejected { existing };
    }

    EdgeDecision::Candidate
}

/// Filters edges down to the ones that still need promoting.
///
/// Running this twice against an inventory that already reflects a
/// completed promotion yields an empty candidate set.
#[must_use]
pub fn get_promotion_candidates(
    edges: &BTreeSet<PromotionEdge>,
    view: &InventoryView<'_>,
) -> PromotionCandidates {
    // Only parents that will actually be written shelter their children.
    let none = BTreeSet::new();
    let in_flight: BTreeSet<(&RegistryName, &ImageName, &Digest)> = edges
        .iter()
        .filter(|e| classify(view, e, &none) == EdgeDecision::Candidate)
        .map(|e| (&e.dst_registry.name, &e.dst_image_tag.name, &e.digest))
        .collect();

    let mut result = PromotionCandidates {
        edges: BTreeSet::new(),
        clean: true,
    };

    for edge in edges {
        match classify(view, edge, &in_flight) {
            EdgeDecision::Ignored => {
                warn!(edge = %edge, "skipping edge for unreadable image");
            }
            EdgeDecision::AlreadyPromoted => {
                info!(edge = %edge, "skipping edge, already promoted");
            }
            EdgeDecision::AlreadyPromotedTagless { lost } => {
                info!(edge = %edge, "skipping tagless edge, digest already at destination");
                if lost {
                    error!(
                        src = %edge.src_fqin(),
                        "lost digest: present at destination but missing from source"
                    );
                }
            }
            EdgeDecision::ChildOfPromotedParent { parent } => {
                info!(edge = %edge, parent = %parent, "skipping manifest list child");
            }
            EdgeDecision::Lost => {
                error!(src = %edge.src_fqin(), edge = %edge, "lost digest: source does not have it");
            }
            EdgeDecision::Rejected { existing } => {
                error!(
                    edge = %edge,
                    existing = %existing,
                    "refusing to move tag that already points at another digest"
                );
                result.clean = false;
            }
            EdgeDecision::Candidate => {
                result.edges.insert(edge.clone());
            }
        }
    }

    result
}
