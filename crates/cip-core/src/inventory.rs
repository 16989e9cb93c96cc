//! Live registry state as seen by one run.
//!
//! Maps are `BTreeMap`s so every rendering and iteration is ordered.

use std::collections::{BTreeMap, BTreeSet};

use crate::name::{Digest, ImageName, RegistryName, Tag};

/// Digest to the tags that point at it. A digest may carry no tags.
pub type DigestTags = BTreeMap<Digest, Vec<Tag>>;

/// One registry's images.
pub type RegInvImage = BTreeMap<ImageName, DigestTags>;

/// Every crawled registry, keyed by registry name.
pub type MasterInventory = BTreeMap<RegistryName, RegInvImage>;

/// Child digest to the manifest-list digest that references it.
pub type ParentDigests = BTreeMap<Digest, Digest>;

/// Images and repository subtrees excluded from every promotion decision
/// because a read failed.
///
/// An image name is ignored in every registry. A repository path such as
/// `gcr.io/foo` also hides everything nested under it, since a failed read
/// there means none of its children were listed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    images: BTreeSet<ImageName>,
    paths: BTreeSet<String>,
}

impl IgnoreSet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            images: BTreeSet::new(),
            paths: BTreeSet::new(),
        }
    }

    /// Ignores `image` in every registry. Returns false if it was already ignored.
    pub fn insert(&mut self, image: ImageName) -> bool {
        self.images.insert(image)
    }

    /// Ignores the repository at `path` and everything below it. Returns
    /// false if the path was already ignored.
    pub fn insert_path(&mut self, path: impl Into<String>) -> bool {
        self.paths.insert(path.into())
    }

    /// Returns true if `image` is ignored by name.
    #[must_use]
    pub fn contains(&self, image: &ImageName) -> bool {
        self.images.contains(image)
    }

    /// Returns true if `registry/image` is ignored, by name or because it
    /// lies under an ignored path.
    #[must_use]
    pub fn covers(&self, registry: &RegistryName, image: &ImageName) -> bool {
        if self.images.contains(image) {
            return true;
        }
        let full = format!("{}/{}", registry.as_str(), image.as_str());
        self.paths.iter().any(|path| {
            full.strip_prefix(path.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    /// Number of ignored images and paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len() + self.paths.len()
    }

    /// Returns true if nothing is ignored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.paths.is_empty()
    }
}

/// Read-only view over the facts the diff engine needs.
#[derive(Debug, Clone, Copy)]
pub struct InventoryView<'a> {
    /// Live digests and tags.
    pub inventory: &'a MasterInventory,
    /// Images whose state could not be read.
    pub ignored: &'a IgnoreSet,
    /// Manifest-list children.
    pub parent_digests: &'a ParentDigests,
}

impl<'a> InventoryView<'a> {
    /// Creates a view.
    #[must_use]
    pub const fn new(
        inventory: &'a MasterInventory,
        ignored: &'a IgnoreSet,
        parent_digests: &'a ParentDigests,
    ) -> Self {
        Self {
            inventory,
            ignored,
            parent_digests,
        }
    }

    /// Looks up the digest map of one image.
    #[must_use]
    pub fn digest_tags(&self, registry: &RegistryName, image: &ImageName) -> Option<&'a DigestTags> {
        self.inventory.get(registry).and_then(|rii| rii.get(image))
    }
}

/// Adds `tag` under `digest`, keeping the tag list free of duplicates.
pub fn insert_tag(dmap: &mut DigestTags, digest: Digest, tag: Option<Tag>) {
    let tags = dmap.entry(digest).or_default();
    if let Some(tag) = tag {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
}

/// Returns the digest that `tag` currently points at, if any.
#[must_use]
pub fn digest_for_tag<'a>(dmap: &'a DigestTags, tag: &Tag) -> Option<&'a Digest> {
    dmap.iter()
        .find_map(|(digest, tags)| tags.contains(tag).then_some(digest))
}
