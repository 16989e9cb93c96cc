//! Registry wire types.
//!
//! These follow the Docker Registry v2 API as served by GCR, which extends
//! `tags/list` with a `manifest` map and a `child` list of sub-repositories.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Manifest media type.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaType(String);

impl MediaType {
    /// Docker image manifest, schema 2.
    pub const DOCKER_MANIFEST: &'static str = "application/vnd.docker.distribution.manifest.v2+json";

    /// Docker manifest list (multi-arch).
    pub const DOCKER_MANIFEST_LIST: &'static str =
        "application/vnd.docker.distribution.manifest.list.v2+json";

    /// Docker image manifest, schema 1.
    pub const DOCKER_MANIFEST_V1: &'static str =
        "application/vnd.docker.distribution.manifest.v1+json";

    /// Signed Docker image manifest, schema 1.
    pub const DOCKER_MANIFEST_V1_SIGNED: &'static str =
        "application/vnd.docker.distribution.manifest.v1+prettyjws";

    /// OCI image manifest.
    pub const OCI_MANIFEST: &'static str = "application/vnd.oci.image.manifest.v1+json";

    /// OCI image index (multi-arch).
    pub const OCI_INDEX: &'static str = "application/vnd.oci.image.index.v1+json";

    /// Creates a media type.
    #[must_use]
    pub fn new(media_type: impl Into<String>) -> Self {
        Self(media_type.into())
    }

    /// Returns the media type string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for manifest lists and image indexes.
    ///
    /// # Examples
    ///
    /// ```
    /// use cip_registry::MediaType;
    ///
    /// assert!(MediaType::new(MediaType::OCI_INDEX).is_manifest_list());
    /// assert!(!MediaType::new(MediaType::DOCKER_MANIFEST).is_manifest_list());
    /// ```
    #[must_use]
    pub fn is_manifest_list(&self) -> bool {
        self.0 == Self::DOCKER_MANIFEST_LIST || self.0 == Self::OCI_INDEX
    }

    /// True for the media types the promoter knows how to handle.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        [
            Self::DOCKER_MANIFEST,
            Self::DOCKER_MANIFEST_LIST,
            Self::DOCKER_MANIFEST_V1,
            Self::DOCKER_MANIFEST_V1_SIGNED,
            Self::OCI_MANIFEST,
            Self::OCI_INDEX,
        ]
        .contains(&self.0.as_str())
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MediaType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Response of `GET /v2/<repo>/tags/list`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsList {
    /// Repository name.
    #[serde(default)]
    pub name: String,

    /// Immediate child repositories (names relative to this repository).
    #[serde(default)]
    pub child: Vec<String>,

    /// Digest to manifest facts.
    #[serde(default)]
    pub manifest: BTreeMap<String, ManifestInfo>,

    /// All tags in the repository.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Facts about one digest in a `tags/list` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestInfo {
    /// Tags pointing at the digest.
    #[serde(default)]
    pub tag: Vec<String>,

    /// Manifest media type.
    #[serde(default)]
    pub media_type: MediaType,

    /// Image size in bytes. GCR sends this as a string.
    #[serde(default, deserialize_with = "string_or_number")]
    pub image_size_bytes: i64,

    /// Creation time in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_created_ms: Option<String>,

    /// Upload time in milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_uploaded_ms: Option<String>,
}

/// A manifest list or OCI image index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    /// Schema version (2).
    #[serde(default)]
    pub schema_version: u32,

    /// Media type of the list itself.
    #[serde(default)]
    pub media_type: MediaType,

    /// Referenced per-platform manifests.
    #[serde(default)]
    pub manifests: Vec<ManifestListEntry>,
}

/// One platform manifest referenced by a manifest list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestListEntry {
    /// Child digest.
    pub digest: String,

    /// Child media type.
    #[serde(default)]
    pub media_type: MediaType,

    /// Child size in bytes.
    #[serde(default)]
    pub size: u64,

    /// Target platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

/// Platform of a child manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// CPU architecture.
    #[serde(default)]
    pub architecture: String,

    /// Operating system.
    #[serde(default)]
    pub os: String,

    /// Architecture variant, e.g. `v7`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(i64),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Number(n) => Ok(n),
        Size::Text(s) if s.is_empty() => Ok(0),
        Size::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_list_gcr_shape() {
        let json = r#"{
            "child": ["sub"],
            "manifest": {
                "sha256:aaaa": {
                    "imageSizeBytes": "1024",
                    "layerId": "",
                    "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                    "tag": ["1.0", "latest"],
                    "timeCreatedMs": "0",
                    "timeUploadedMs": "1600000000000"
                }
            },
            "name": "project/foo",
            "tags": ["1.0", "latest"]
        }"#;
        let list: TagsList = serde_json::from_str(json).unwrap();
        assert_eq!(list.child, vec!["sub"]);
        let info = &list.manifest["sha256:aaaa"];
        assert_eq!(info.image_size_bytes, 1024);
        assert_eq!(info.tag, vec!["1.0", "latest"]);
        assert!(info.media_type.is_supported());
    }

    #[test]
    fn test_size_as_number_or_missing() {
        let info: ManifestInfo = serde_json::from_str(r#"{"imageSizeBytes": 12}"#).unwrap();
        assert_eq!(info.image_size_bytes, 12);
        let info: ManifestInfo = serde_json::from_str("{}").unwrap();
        assert_eq!(info.image_size_bytes, 0);
        assert!(serde_json::from_str::<ManifestInfo>(r#"{"imageSizeBytes": "x"}"#).is_err());
    }

    #[test]
    fn test_manifest_list() {
        let json = r#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.list.v2+json",
            "manifests": [
                {"digest": "sha256:bbbb", "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
                 "size": 528, "platform": {"architecture": "arm", "os": "linux", "variant": "v7"}}
            ]
        }"#;
        let list: ManifestList = serde_json::from_str(json).unwrap();
        assert!(list.media_type.is_manifest_list());
        assert_eq!(list.manifests[0].platform.as_ref().unwrap().variant.as_deref(), Some("v7"));
    }

    #[test]
    fn test_unsupported_media_type() {
        assert!(!MediaType::new("application/octet-stream").is_supported());
        assert!(MediaType::new(MediaType::DOCKER_MANIFEST_V1_SIGNED).is_supported());
    }
}
