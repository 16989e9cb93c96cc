//! Validated name types for registries, images, digests and tags.
//!
//! All four are opaque strings checked once at construction. Digest
//! equality is content equality, which is what every promotion safety
//! rule builds on.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::validation::ValidationError;

/// Maximum length of a tag, as accepted by Docker registries.
pub const MAX_TAG_LEN: usize = 128;

const SHA256_PREFIX: &str = "sha256:";
const SHA256_HEX_LEN: usize = 64;

/// Name of a registry, including any path prefix (e.g. `gcr.io/k8s-staging-foo`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RegistryName(String);

impl RegistryName {
    /// Creates a registry name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or has a leading or trailing `/`.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::empty("registry name"));
        }
        if name.starts_with('/') || name.ends_with('/') {
            return Err(ValidationError::format(
                "registry name",
                format!("'{name}' must not start or end with '/'"),
            ));
        }
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the host part of the registry (everything before the first `/`).
    #[must_use]
    pub fn host(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// Returns the repository prefix below the host, if any.
    #[must_use]
    pub fn repository_prefix(&self) -> Option<&str> {
        self.0.split_once('/').map(|(_, rest)| rest)
    }
}

/// Name of an image relative to its registry (e.g. `pause` or `foo/bar`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ImageName(String);

impl ImageName {
    /// Creates an image name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty or has a leading or trailing `/`.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::empty("image name"));
        }
        if name.starts_with('/') || name.ends_with('/') {
            return Err(ValidationError::format(
                "image name",
                format!("'{name}' must not start or end with '/'"),
            ));
        }
        Ok(Self(name))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A content digest of the form `sha256:<64 lowercase hex chars>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Parses a digest.
    ///
    /// # Errors
    ///
    /// Returns a format error if the string is not `sha256:[0-9a-f]{64}`.
    ///
    /// # Examples
    ///
    /// ```
    /// use cip_core::Digest;
    ///
    /// let hex = "a".repeat(64);
    /// assert!(Digest::parse(format!("sha256:{hex}")).is_ok());
    /// assert!(Digest::parse("sha256:000").is_err());
    /// ```
    pub fn parse(digest: impl Into<String>) -> Result<Self, ValidationError> {
        let digest = digest.into();
        let valid = digest.strip_prefix(SHA256_PREFIX).is_some_and(|hex| {
            hex.len() == SHA256_HEX_LEN
                && hex
                    .bytes()
                    .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        });
        if valid {
            Ok(Self(digest))
        } else {
            Err(ValidationError::format(
                "digest",
                format!("'{digest}' does not match sha256:[0-9a-f]{{64}}"),
            ))
        }
    }

    /// Returns the digest as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the hex part without the algorithm prefix.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.0[SHA256_PREFIX.len()..]
    }
}

/// An image tag matching `[\w][\w.-]{0,127}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Parses a tag.
    ///
    /// # Errors
    ///
    /// Returns a format error if the tag is empty, too long or contains
    /// characters outside `[A-Za-z0-9_.-]` (first character: no `.` or `-`).
    pub fn parse(tag: impl Into<String>) -> Result<Self, ValidationError> {
        let tag = tag.into();
        let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
        let bytes = tag.as_bytes();
        let valid = !bytes.is_empty()
            && bytes.len() <= MAX_TAG_LEN
            && is_word(bytes[0])
            && bytes[1..]
                .iter()
                .all(|&b| is_word(b) || b == b'.' || b == b'-');
        if valid {
            Ok(Self(tag))
        } else {
            Err(ValidationError::format(
                "tag",
                format!("'{tag}' does not match [\\w][\\w.-]{{0,127}}"),
            ))
        }
    }

    /// Returns the tag as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! impl_name_traits {
    ($($ty:ident => $ctor:ident),* $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl AsRef<str> for $ty {
                fn as_ref(&self) -> &str {
                    &self.0
                }
            }

            impl std::str::FromStr for $ty {
                type Err = ValidationError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    Self::$ctor(s)
                }
            }

            impl<'de> Deserialize<'de> for $ty {
                fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
                where
                    D: Deserializer<'de>,
                {
                    let s = String::deserialize(deserializer)?;
                    Self::$ctor(s).map_err(serde::de::Error::custom)
                }
            }
        )*
    };
}

impl_name_traits!(
    RegistryName => new,
    ImageName => new,
    Digest => parse,
    Tag => parse,
);

/// Formats a fully-qualified image name, `registry/image@digest`.
#[must_use]
pub fn fqin(registry: &RegistryName, image: &ImageName, digest: &Digest) -> String {
    format!("{registry}/{image}@{digest}")
}

/// Formats a partially-qualified image name, `registry/image:tag`.
#[must_use]
pub fn pqin(registry: &RegistryName, image: &ImageName, tag: &Tag) -> String {
    format!("{registry}/{image}:{tag}")
}

/// Sorts registry names longest first, then alphabetically.
///
/// Prefix resolution walks this order so the most specific registry wins
/// when one registry name is a prefix of another.
pub fn sort_registries_longest_first(registries: &mut [RegistryName]) {
    registries.sort_by(|a, b| {
        b.as_str()
            .len()
            .cmp(&a.as_str().len())
            .then_with(|| a.cmp(b))
    });
}

/// Splits a full repository path into the registry it lives under and the
/// image name below it.
///
/// `registries` must already be sorted with [`sort_registries_longest_first`].
/// Returns `None` if no registry is a proper prefix of `path`.
#[must_use]
pub fn split_registry_image_path(
    path: &str,
    registries: &[RegistryName],
) -> Option<(RegistryName, ImageName)> {
    registries.iter().find_map(|registry| {
        let rest = path
            .strip_prefix(registry.as_str())
            .and_then(|rest| rest.strip_prefix('/'))?;
        ImageName::new(rest)
            .ok()
            .map(|image| (registry.clone(), image))
    })
}

/// Components of an image reference such as `gcr.io/foo/bar@sha256:...`
/// or `gcr.io/foo/bar:1.0`. Components are left unvalidated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageReference {
    /// Repository path without tag or digest.
    pub path: String,
    /// Digest component, if present.
    pub digest: Option<String>,
    /// Tag component, if present.
    pub tag: Option<String>,
}

impl ImageReference {
    /// Splits a reference into path, digest and tag.
    ///
    /// The tag separator is the last `:` after the last `/`, so registry
    /// ports (`localhost:5000/foo`) are not mistaken for tags.
    #[must_use]
    pub fn split(reference: &str) -> Self {
        let (rest, digest) = match reference.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.to_string())),
            None => (reference, None),
        };
        let last_slash = rest.rfind('/').map_or(0, |i| i + 1);
        let (path, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split_at = last_slash + i;
                (&rest[..split_at], Some(rest[split_at + 1..].to_string()))
            }
            None => (rest, None),
        };
        Self {
            path: path.to_string(),
            digest,
            tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(c: char) -> String {
        std::iter::repeat(c).take(64).collect()
    }

    #[test]
    fn test_digest_parse_valid() {
        let d = Digest::parse(format!("sha256:{}", hex('a'))).unwrap();
        assert_eq!(d.hex(), hex('a'));
    }

    #[test]
    fn test_digest_parse_rejects_short_and_uppercase() {
        assert!(Digest::parse("sha256:000").is_err());
        assert!(Digest::parse(format!("sha256:{}", hex('A'))).is_err());
        assert!(Digest::parse(format!("sha512:{}", hex('a'))).is_err());
        assert!(Digest::parse(hex('a')).is_err());
    }

    #[test]
    fn test_tag_parse() {
        assert!(Tag::parse("1.0").is_ok());
        assert!(Tag::parse("v1.2.3-rc.1").is_ok());
        assert!(Tag::parse("_internal").is_ok());
        assert!(Tag::parse("").is_err());
        assert!(Tag::parse(".hidden").is_err());
        assert!(Tag::parse("-dash").is_err());
        assert!(Tag::parse("has/slash").is_err());
        assert!(Tag::parse("a".repeat(128)).is_ok());
        assert!(Tag::parse("a".repeat(129)).is_err());
    }

    #[test]
    fn test_image_name_slashes() {
        assert!(ImageName::new("foo/bar").is_ok());
        assert!(ImageName::new("/foo").is_err());
        assert!(ImageName::new("foo/").is_err());
        assert!(ImageName::new("").is_err());
    }

    #[test]
    fn test_registry_host_and_prefix() {
        let r = RegistryName::new("gcr.io/k8s-staging/sub").unwrap();
        assert_eq!(r.host(), "gcr.io");
        assert_eq!(r.repository_prefix(), Some("k8s-staging/sub"));

        let bare = RegistryName::new("localhost:5000").unwrap();
        assert_eq!(bare.host(), "localhost:5000");
        assert_eq!(bare.repository_prefix(), None);
    }

    #[test]
    fn test_sort_registries_longest_first() {
        let mut regs: Vec<RegistryName> = ["gcr.io/a", "gcr.io/a/b", "gcr.io/c", "gcr.io/zz/y"]
            .iter()
            .map(|s| RegistryName::new(*s).unwrap())
            .collect();
        sort_registries_longest_first(&mut regs);
        let names: Vec<_> = regs.iter().map(RegistryName::as_str).collect();
        assert_eq!(names, vec!["gcr.io/zz/y", "gcr.io/a/b", "gcr.io/a", "gcr.io/c"]);
    }

    #[test]
    fn test_split_registry_image_path_prefers_longest() {
        let mut regs = vec![
            RegistryName::new("gcr.io/foo").unwrap(),
            RegistryName::new("gcr.io/foo/bar").unwrap(),
        ];
        sort_registries_longest_first(&mut regs);

        let (reg, img) = split_registry_image_path("gcr.io/foo/bar/baz", &regs).unwrap();
        assert_eq!(reg.as_str(), "gcr.io/foo/bar");
        assert_eq!(img.as_str(), "baz");

        let (reg, img) = split_registry_image_path("gcr.io/foo/qux", &regs).unwrap();
        assert_eq!(reg.as_str(), "gcr.io/foo");
        assert_eq!(img.as_str(), "qux");

        assert!(split_registry_image_path("gcr.io/foo", &regs).is_none());
        assert!(split_registry_image_path("gcr.io/foobar/x", &regs).is_none());
    }

    #[test]
    fn test_image_reference_split() {
        let d = format!("sha256:{}", hex('b'));
        let r = ImageReference::split(&format!("gcr.io/foo/bar@{d}"));
        assert_eq!(r.path, "gcr.io/foo/bar");
        assert_eq!(r.digest.as_deref(), Some(d.as_str()));
        assert_eq!(r.tag, None);

        let r = ImageReference::split("gcr.io/foo/bar:1.0");
        assert_eq!(r.path, "gcr.io/foo/bar");
        assert_eq!(r.tag.as_deref(), Some("1.0"));

        let r = ImageReference::split("localhost:5000/bar");
        assert_eq!(r.path, "localhost:5000/bar");
        assert_eq!(r.tag, None);
    }

    #[test]
    fn test_deserialize_rejects_invalid_digest() {
        let res: Result<Digest, _> = serde_yaml::from_str("\"sha256:xyz\"");
        assert!(res.is_err());
    }

    #[test]
    fn test_fqin_pqin_format() {
        let r = RegistryName::new("gcr.io/foo").unwrap();
        let i = ImageName::new("bar").unwrap();
        let t = Tag::parse("1.0").unwrap();
        let d = Digest::parse(format!("sha256:{}", hex('c'))).unwrap();
        assert_eq!(pqin(&r, &i, &t), "gcr.io/foo/bar:1.0");
        assert_eq!(fqin(&r, &i, &d), format!("gcr.io/foo/bar@{d}"));
    }
}
