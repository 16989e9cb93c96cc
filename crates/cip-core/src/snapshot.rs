//! Text renderings of one registry's inventory.

use std::fmt::Write as _;

use crate::inventory::{DigestTags, ParentDigests, RegInvImage};
use crate::name::Tag;

/// Renders images as YAML, sorted by image name then digest.
///
/// The output has the shape of a thin-manifest `images.yaml`:
///
/// ```text
/// - name: foo
///   dmap:
///     "sha256:...": ["1.0", "latest"]
/// ```
#[must_use]
pub fn to_yaml(rii: &RegInvImage) -> String {
    if rii.is_empty() {
        return "[]\n".to_string();
    }

    let mut out = String::new();
    for (image, dmap) in rii {
        let _ = writeln!(out, "- name: {image}");
        let _ = writeln!(out, "  dmap:");
        for (digest, tags) in dmap {
            let mut tags: Vec<&str> = tags.iter().map(Tag::as_str).collect();
            tags.sort_unstable();
            let quoted: Vec<String> = tags.iter().map(|t| format!("\"{t}\"")).collect();
            let _ = writeln!(out, "    \"{digest}\": [{}]", quoted.join(", "));
        }
    }
    out
}

/// Renders images as CSV lines `image@digest,image:tag`, or
/// `image@digest,-` for untagged digests.
#[must_use]
pub fn to_csv(rii: &RegInvImage) -> String {
    let mut out = String::new();
    for (image, dmap) in rii {
        for (digest, tags) in dmap {
            if tags.is_empty() {
                let _ = writeln!(out, "{image}@{digest},-");
                continue;
            }
            let mut tags: Vec<&str> = tags.iter().map(Tag::as_str).collect();
            tags.sort_unstable();
            for tag in tags {
                let _ = writeln!(out, "{image}@{digest},{image}:{tag}");
            }
        }
    }
    out
}

/// Drops tagless digests that are children of a manifest list present in
/// the same image. Images left without digests are dropped too.
#[must_use]
pub fn minimal(rii: &RegInvImage, parent_digests: &ParentDigests) -> RegInvImage {
    rii.iter()
        .filter_map(|(image, dmap)| {
            let kept: DigestTags = dmap
                .iter()
                .filter(|(digest, tags)| {
                    let is_child = parent_digests
                        .get(*digest)
                        .is_some_and(|parent| dmap.contains_key(parent));
                    !(tags.is_empty() && is_child)
                })
                .map(|(d, t)| (d.clone(), t.clone()))
                .collect();
            (!kept.is_empty()).then(|| (image.clone(), kept))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::insert_tag;
    use crate::name::{Digest, ImageName};

    fn digest(c: char) -> Digest {
        Digest::parse(format!("sha256:{}", c.to_string().repeat(64))).unwrap()
    }

    fn sample() -> RegInvImage {
        let mut rii = RegInvImage::new();
        let foo = rii.entry(ImageName::new("foo").unwrap()).or_default();
        insert_tag(foo, digest('a'), Some(Tag::parse("latest").unwrap()));
        insert_tag(foo, digest('a'), Some(Tag::parse("1.0").unwrap()));
        insert_tag(foo, digest('b'), None);
        let bar = rii.entry(ImageName::new("bar").unwrap()).or_default();
        insert_tag(bar, digest('c'), Some(Tag::parse("v2").unwrap()));
        rii
    }

    #[test]
    fn test_to_yaml_sorted() {
        let a = "a".repeat(64);
        let b = "b".repeat(64);
        let c = "c".repeat(64);
        let expected = format!(
            "- name: bar\n  dmap:\n    \"sha256:{c}\": [\"v2\"]\n\
             - name: foo\n  dmap:\n    \"sha256:{a}\": [\"1.0\", \"latest\"]\n    \"sha256:{b}\": []\n"
        );
        assert_eq!(to_yaml(&sample()), expected);
    }

    #[test]
    fn test_to_yaml_empty() {
        assert_eq!(to_yaml(&RegInvImage::new()), "[]\n");
    }

    #[test]
    fn test_yaml_parses_as_images_file() {
        let registries = "registries:\n- name: gcr.io/src\n  src: true\n";
        let m = crate::Manifest::parse_thin(registries.as_bytes(), to_yaml(&sample()).as_bytes())
            .unwrap();
        assert_eq!(m.images().len(), 2);
    }

    #[test]
    fn test_to_csv() {
        let a = "a".repeat(64);
        let csv = to_csv(&sample());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], format!("foo@sha256:{a},foo:1.0"));
        assert!(lines[3].ends_with(",-"));
    }

    #[test]
    fn test_minimal_drops_tagless_children() {
        let mut parents = ParentDigests::new();
        parents.insert(digest('b'), digest('a'));
        parents.insert(digest('d'), digest('e'));
        let mut rii = sample();
        let orphan = rii.entry(ImageName::new("orphan").unwrap()).or_default();
        insert_tag(orphan, digest('d'), None);

        let min = minimal(&rii, &parents);
        let foo = &min[&ImageName::new("foo").unwrap()];
        assert_eq!(foo.len(), 1);
        assert!(min.contains_key(&ImageName::new("orphan").unwrap()));
    }
}
