//! Property-based tests for edge building and diffing.

use std::collections::BTreeSet;

use proptest::prelude::*;

use crate::{
    get_promotion_candidates, insert_tag, to_promotion_edges, Digest, DigestTags, IgnoreSet,
    Image, ImageName, InventoryView, Manifest, MasterInventory, ParentDigests, RegistryContext,
    RegistryName, Tag,
};

/// Strategy for generating digests.
fn digest_strategy() -> impl Strategy<Value = Digest> {
    "[0-9a-f]{64}".prop_map(|hex| Digest::parse(format!("sha256:{hex}")).unwrap())
}

/// Strategy for generating tags.
fn tag_strategy() -> impl Strategy<Value = Tag> {
    "[a-z0-9][a-z0-9.-]{0,10}".prop_map(|t| Tag::parse(t).unwrap())
}

/// Strategy for generating one image with unique tags across its digests.
fn image_strategy() -> impl Strategy<Value = Image> {
    (
        "[a-z][a-z0-9-]{0,12}",
        prop::collection::btree_map(
            digest_strategy(),
            prop::collection::btree_set(tag_strategy(), 0..3),
            1..4,
        ),
    )
        .prop_map(|(name, raw)| {
            let mut seen = BTreeSet::new();
            let dmap: DigestTags = raw
                .into_iter()
                .map(|(digest, tags)| {
                    let tags = tags.into_iter().filter(|t| seen.insert(t.clone())).collect();
                    (digest, tags)
                })
                .collect();
            Image {
                name: ImageName::new(name).unwrap(),
                dmap,
            }
        })
}

/// Strategy for generating a manifest with two destinations.
fn manifest_strategy() -> impl Strategy<Value = Manifest> {
    prop::collection::vec(image_strategy(), 1..4).prop_map(|images| {
        let mut unique = BTreeSet::new();
        let images = images
            .into_iter()
            .filter(|i| unique.insert(i.name.clone()))
            .collect();
        let registries = ["gcr.io/src", "gcr.io/dst-a", "gcr.io/dst-b"]
            .iter()
            .enumerate()
            .map(|(i, name)| RegistryContext::new(RegistryName::new(*name).unwrap(), i == 0))
            .collect();
        Manifest::new(registries, images).unwrap()
    })
}

fn source_inventory(manifest: &Manifest) -> MasterInventory {
    let mut inv = MasterInventory::new();
    let src = inv.entry(manifest.source_registry().name.clone()).or_default();
    for image in manifest.images() {
        let dmap = src.entry(image.name.clone()).or_default();
        for (digest, tags) in &image.dmap {
            insert_tag(dmap, digest.clone(), None);
            for tag in tags {
                insert_tag(dmap, digest.clone(), Some(tag.clone()));
            }
        }
    }
    inv
}

proptest! {
    #[test]
    fn edges_independent_of_image_order(manifest in manifest_strategy()) {
        let mut reversed: Vec<Image> = manifest.images().to_vec();
        reversed.reverse();
        let other = Manifest::new(manifest.registries().to_vec(), reversed).unwrap();

        let a = to_promotion_edges(&[manifest]).unwrap();
        let b = to_promotion_edges(&[other]).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn every_edge_leaves_the_source(manifest in manifest_strategy()) {
        let edges = to_promotion_edges(&[manifest]).unwrap();
        for edge in &edges {
            prop_assert!(edge.src_registry.src);
            prop_assert!(!edge.dst_registry.src);
        }
    }

    #[test]
    fn diff_is_idempotent(manifest in manifest_strategy()) {
        let mut inv = source_inventory(&manifest);
        let edges = to_promotion_edges(&[manifest]).unwrap();
        let (ignored, parents) = (IgnoreSet::new(), ParentDigests::new());

        let first = get_promotion_candidates(&edges, &InventoryView::new(&inv, &ignored, &parents));
        prop_assert!(first.clean);
        prop_assert_eq!(first.edges.len(), edges.len());

        for edge in &first.edges {
            let dmap = inv
                .entry(edge.dst_registry.name.clone())
                .or_default()
                .entry(edge.dst_image_tag.name.clone())
                .or_default();
            insert_tag(dmap, edge.digest.clone(), edge.dst_image_tag.tag.clone());
        }

        for _ in 0..2 {
            let again = get_promotion_candidates(&edges, &InventoryView::new(&inv, &ignored, &parents));
            prop_assert!(again.edges.is_empty());
            prop_assert!(again.clean);
        }
    }

    #[test]
    fn conflicting_tag_always_detected(
        manifest in manifest_strategy(),
        other_digest in digest_strategy(),
    ) {
        let image = manifest.images()[0].clone();
        let Some((digest, tag)) = image
            .dmap
            .iter()
            .find_map(|(d, tags)| tags.first().map(|t| (d.clone(), t.clone())))
        else {
            return Ok(());
        };
        prop_assume!(other_digest != digest);

        let mut dmap = DigestTags::new();
        dmap.insert(other_digest, vec![tag]);
        let rival = Manifest::new(
            vec![
                RegistryContext::new(RegistryName::new("gcr.io/rival").unwrap(), true),
                RegistryContext::new(RegistryName::new("gcr.io/dst-a").unwrap(), false),
            ],
            vec![Image { name: image.name, dmap }],
        )
        .unwrap();

        prop_assert!(to_promotion_edges(&[manifest, rival]).is_err());
    }
}
