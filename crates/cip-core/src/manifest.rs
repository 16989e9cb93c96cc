//! The desired-state manifest and its on-disk layouts.
//!
//! A manifest names one source registry, any number of destination
//! registries, and the images (digest to tags) that must exist in every
//! destination. Manifests come either as single "full" YAML files or as
//! thin-manifest pairs where registries and images live in separate files:
//!
//! ```text
//! <root>/manifests/<name>/promoter-manifest.yaml   registries only
//! <root>/images/<name>/images.yaml                 images only
//! ```
//!
//! Parsing is strict: unknown YAML fields are rejected, then every
//! semantic rule is checked and all violations are reported together.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{CoreError, Result};
use crate::inventory::DigestTags;
use crate::name::{Digest, ImageName, RegistryName, Tag};
use crate::validation::{Validate, ValidationError, ValidationErrors};

/// File name of the registries half of a thin manifest.
pub const THIN_MANIFEST_FILE: &str = "promoter-manifest.yaml";

/// File name of the images half of a thin manifest.
pub const THIN_IMAGES_FILE: &str = "images.yaml";

const MANIFESTS_DIR: &str = "manifests";
const IMAGES_DIR: &str = "images";
const IN_MEMORY: &str = "<bytes>";

/// A registry taking part in a promotion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RegistryContext {
    /// Registry name including path prefix.
    pub name: RegistryName,
    /// Service account used to talk to this registry.
    #[serde(rename = "service-account")]
    pub service_account: String,
    /// Whether this is the source registry.
    pub src: bool,
}

impl RegistryContext {
    /// Creates a registry context with no service account.
    #[must_use]
    pub const fn new(name: RegistryName, src: bool) -> Self {
        Self {
            name,
            service_account: String::new(),
            src,
        }
    }

    /// Sets the service account.
    #[must_use]
    pub fn with_service_account(mut self, account: impl Into<String>) -> Self {
        self.service_account = account.into();
        self
    }
}

/// An image and the digests (with tags) that must be promoted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Image {
    /// Image name relative to each registry.
    pub name: ImageName,
    /// Digest to tags.
    pub dmap: DigestTags,
}

/// A validated promotion manifest.
///
/// Construction guarantees at least one registry, exactly one source
/// registry and non-empty digest maps for all images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    registries: Vec<RegistryContext>,
    images: Vec<Image>,
    src_index: usize,
    path: Option<PathBuf>,
}

impl Manifest {
    /// Builds a manifest from already-typed parts, checking cross-field rules.
    ///
    /// # Errors
    ///
    /// Returns every violated rule: no registries, zero or several source
    /// registries, duplicate registry or image names, empty digest maps.
    pub fn new(
        registries: Vec<RegistryContext>,
        images: Vec<Image>,
    ) -> std::result::Result<Self, ValidationErrors> {
        let mut manifest = Self {
            registries,
            images,
            src_index: 0,
            path: None,
        };
        manifest.validate()?;
        manifest.src_index = manifest
            .registries
            .iter()
            .position(|r| r.src)
            .unwrap_or_default();
        Ok(manifest)
    }

    /// Parses and validates a full manifest from YAML bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Parse`] for malformed YAML or unknown fields and
    /// [`CoreError::Invalid`] listing every semantic violation.
    ///
    /// # Examples
    ///
    /// ```
    /// use cip_core::Manifest;
    ///
    /// let digest = format!("sha256:{}", "0".repeat(64));
    /// let yaml = format!(
    ///     "registries:\n\
    ///      - name: gcr.io/src\n  src: true\n\
    ///      - name: gcr.io/dst\n\
    ///      images:\n\
    ///      - name: a\n  dmap:\n    \"{digest}\": [\"0.9\"]\n"
    /// );
    /// let manifest = Manifest::parse(yaml.as_bytes()).unwrap();
    /// assert_eq!(manifest.source_registry().name.as_str(), "gcr.io/src");
    /// ```
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Self::parse_at(bytes, Path::new(IN_MEMORY))
    }

    /// Reads and parses a full manifest file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid manifest.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = read(path)?;
        Self::parse_at(&bytes, path)
    }

    /// Parses the two halves of a thin manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if either half is malformed or the combination is
    /// not a valid manifest.
    pub fn parse_thin(registries_yaml: &[u8], images_yaml: &[u8]) -> Result<Self> {
        Self::parse_thin_at(registries_yaml, images_yaml, Path::new(IN_MEMORY), Path::new(IN_MEMORY))
    }

    fn parse_at(bytes: &[u8], path: &Path) -> Result<Self> {
        let raw: RawManifest = serde_yaml::from_slice(bytes).map_err(|source| CoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_raw(raw.registries, raw.images, path)
    }

    fn parse_thin_at(
        registries_yaml: &[u8],
        images_yaml: &[u8],
        registries_path: &Path,
        images_path: &Path,
    ) -> Result<Self> {
        let thin: RawThinManifest =
            serde_yaml::from_slice(registries_yaml).map_err(|source| CoreError::Parse {
                path: registries_path.to_path_buf(),
                source,
            })?;
        let images: Vec<RawImage> =
            serde_yaml::from_slice(images_yaml).map_err(|source| CoreError::Parse {
                path: images_path.to_path_buf(),
                source,
            })?;
        Self::from_raw(thin.registries, images, registries_path)
    }

    fn from_raw(registries: Vec<RawRegistry>, images: Vec<RawImage>, path: &Path) -> Result<Self> {
        let mut errors = ValidationErrors::new();

        let registries: Vec<RegistryContext> = registries
            .into_iter()
            .enumerate()
            .filter_map(|(i, raw)| {
                let name = errors.check(RegistryName::new(raw.name), &format!("registries[{i}]"))?;
                Some(RegistryContext {
                    name,
                    service_account: raw.service_account,
                    src: raw.src,
                })
            })
            .collect();

        let images: Vec<Image> = images
            .into_iter()
            .enumerate()
            .filter_map(|(i, raw)| raw.into_image(&format!("images[{i}]"), &mut errors))
            .collect();

        let invalid = |errors| CoreError::Invalid {
            path: path.to_path_buf(),
            errors,
        };

        match Self::new(registries, images) {
            Ok(manifest) if errors.is_empty() => Ok(manifest.with_path(path)),
            Ok(_) => Err(invalid(errors)),
            Err(more) => {
                errors.merge(more);
                Err(invalid(errors))
            }
        }
    }

    fn with_path(mut self, path: &Path) -> Self {
        if path != Path::new(IN_MEMORY) {
            self.path = Some(path.to_path_buf());
        }
        self
    }

    /// All registries, in manifest order.
    #[must_use]
    pub fn registries(&self) -> &[RegistryContext] {
        &self.registries
    }

    /// All images, in manifest order.
    #[must_use]
    pub fn images(&self) -> &[Image] {
        &self.images
    }

    /// The single source registry.
    #[must_use]
    pub fn source_registry(&self) -> &RegistryContext {
        &self.registries[self.src_index]
    }

    /// Every registry except the source.
    pub fn destination_registries(&self) -> impl Iterator<Item = &RegistryContext> {
        self.registries.iter().filter(|r| !r.src)
    }

    /// File the manifest was loaded from, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Validate for Manifest {
    fn validate(&self) -> std::result::Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.registries.is_empty() {
            errors.add(ValidationError::empty("registries"));
        }

        match self.registries.iter().filter(|r| r.src).count() {
            1 => {}
            0 if self.registries.is_empty() => {}
            0 => errors.add(ValidationError::constraint(
                "registries",
                "no source registry; exactly one entry must set 'src: true'",
            )),
            n => errors.add(ValidationError::constraint(
                "registries",
                format!("{n} source registries; exactly one entry must set 'src: true'"),
            )),
        }

        let mut seen_registries = BTreeSet::new();
        for (i, registry) in self.registries.iter().enumerate() {
            if !seen_registries.insert(&registry.name) {
                errors.add(ValidationError::constraint(
                    format!("registries[{i}].name"),
                    format!("registry '{}' listed more than once", registry.name),
                ));
            }
        }

        let mut seen_images = BTreeSet::new();
        for (i, image) in self.images.iter().enumerate() {
            if !seen_images.insert(&image.name) {
                errors.add(ValidationError::constraint(
                    format!("images[{i}].name"),
                    format!("image '{}' listed more than once", image.name),
                ));
            }
            if image.dmap.is_empty() {
                errors.add(ValidationError::empty(format!("images[{i}].dmap")));
            }
        }

        errors.into_result(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    #[serde(default)]
    registries: Vec<RawRegistry>,
    #[serde(default)]
    images: Vec<RawImage>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawThinManifest {
    #[serde(default)]
    registries: Vec<RawRegistry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRegistry {
    name: String,
    #[serde(rename = "service-account", default)]
    service_account: String,
    #[serde(default)]
    src: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawImage {
    name: String,
    #[serde(default)]
    dmap: BTreeMap<String, Vec<String>>,
}

impl RawImage {
    fn into_image(self, at: &str, errors: &mut ValidationErrors) -> Option<Image> {
        let name = errors.check(ImageName::new(self.name), at);
        if self.dmap.is_empty() {
            errors.add(ValidationError::empty(format!("{at}.dmap")));
            return None;
        }

        let mut dmap = DigestTags::new();
        let before = errors.len();
        for (digest, tags) in self.dmap {
            let digest = errors.check(Digest::parse(digest), &format!("{at}.dmap"));
            let tags: Vec<Tag> = tags
                .into_iter()
                .filter_map(|t| errors.check(Tag::parse(t), &format!("{at}.dmap")))
                .collect();
            if let Some(digest) = digest {
                dmap.insert(digest, tags);
            }
        }

        if errors.len() != before {
            return None;
        }
        Some(Image { name: name?, dmap })
    }
}

/// Paths of one thin manifest pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinManifestPaths {
    /// Name of the pair (`<name>` in the directory layout).
    pub name: String,
    /// `<root>/manifests/<name>/promoter-manifest.yaml`.
    pub manifest: PathBuf,
    /// `<root>/images/<name>/images.yaml`.
    pub images: PathBuf,
}

/// Checks the thin-manifest directory contract under `root`.
///
/// Every `manifests/<name>/` must hold a `promoter-manifest.yaml` with a
/// matching `images/<name>/images.yaml`, and no `promoter-manifest.yaml`
/// may appear at any other depth. Nothing is parsed.
///
/// # Errors
///
/// Returns [`CoreError::Layout`] listing every violation.
pub fn validate_thin_manifest_layout(root: &Path) -> Result<Vec<ThinManifestPaths>> {
    let mut errors = ValidationErrors::new();
    let manifests_root = root.join(MANIFESTS_DIR);
    let mut pairs = Vec::new();

    if !manifests_root.is_dir() {
        errors.add(ValidationError::layout(
            manifests_root.display().to_string(),
            "directory does not exist",
        ));
        return Err(CoreError::Layout {
            root: root.to_path_buf(),
            errors,
        });
    }

    for entry in WalkDir::new(&manifests_root).sort_by_file_name() {
        let entry = entry.map_err(|e| CoreError::Io {
            path: e.path().map_or_else(|| manifests_root.clone(), Path::to_path_buf),
            source: e.into(),
        })?;
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        if entry.file_type().is_dir() && parts.len() == 2 {
            let name = &parts[1];
            let manifest = entry.path().join(THIN_MANIFEST_FILE);
            let images = root.join(IMAGES_DIR).join(name).join(THIN_IMAGES_FILE);
            if !manifest.is_file() {
                errors.add(ValidationError::layout(
                    manifest.display().to_string(),
                    "missing promoter manifest",
                ));
                continue;
            }
            if !images.is_file() {
                errors.add(ValidationError::layout(
                    images.display().to_string(),
                    format!("missing images file for manifest '{name}'"),
                ));
                continue;
            }
            pairs.push(ThinManifestPaths {
                name: name.clone(),
                manifest,
                images,
            });
        } else if entry.file_type().is_file()
            && entry.file_name() == THIN_MANIFEST_FILE
            && parts.len() != 3
        {
            errors.add(ValidationError::layout(
                entry.path().display().to_string(),
                "promoter manifests must live at manifests/<name>/promoter-manifest.yaml",
            ));
        }
    }

    if errors.is_empty() {
        Ok(pairs)
    } else {
        Err(CoreError::Layout {
            root: root.to_path_buf(),
            errors,
        })
    }
}

/// Loads every thin manifest under `root` after checking the layout.
///
/// # Errors
///
/// Fails on the first layout violation set, unreadable file or invalid
/// manifest; no manifest is returned unless all of them are valid.
pub fn load_thin_manifests(root: &Path) -> Result<Vec<Manifest>> {
    let pairs = validate_thin_manifest_layout(root)?;
    pairs
        .iter()
        .map(|pair| {
            debug!(name = %pair.name, path = %pair.manifest.display(), "loading thin manifest");
            let registries = read(&pair.manifest)?;
            let images = read(&pair.images)?;
            Manifest::parse_thin_at(&registries, &images, &pair.manifest, &pair.images)
        })
        .collect()
}

/// Loads every full manifest (`*.yaml`) directly inside `dir`, sorted by path.
///
/// # Errors
///
/// Fails if the directory cannot be read or any manifest is invalid.
pub fn load_manifests_dir(dir: &Path) -> Result<Vec<Manifest>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| CoreError::Io {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;
        let is_yaml = entry
            .path()
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if entry.file_type().is_file() && is_yaml {
            paths.push(entry.into_path());
        }
    }
    paths.iter().map(|p| Manifest::from_file(p)).collect()
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|source| CoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn digest(c: char) -> String {
        format!("sha256:{}", c.to_string().repeat(64))
    }

    fn manifest_yaml(body: &str) -> String {
        format!(
            "registries:\n\
             - name: gcr.io/src\n  service-account: sa@example.com\n  src: true\n\
             - name: gcr.io/dst\n\
             {body}"
        )
    }

    #[test]
    fn test_parse_valid_manifest() {
        let yaml = manifest_yaml(&format!(
            "images:\n- name: a\n  dmap:\n    \"{}\": [\"0.9\", \"1.0\"]\n    \"{}\": []\n",
            digest('0'),
            digest('1')
        ));
        let m = Manifest::parse(yaml.as_bytes()).unwrap();
        assert_eq!(m.registries().len(), 2);
        assert_eq!(m.source_registry().service_account, "sa@example.com");
        assert_eq!(m.destination_registries().count(), 1);
        assert_eq!(m.images()[0].dmap.len(), 2);
        assert!(m.path().is_none());
    }

    #[test]
    fn test_parse_rejects_unknown_fields() {
        let yaml = manifest_yaml("images: []\nextra: 1\n");
        let err = Manifest::parse(yaml.as_bytes()).unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));

        let yaml = "registries:\n- name: gcr.io/src\n  src: true\n  colour: blue\n";
        assert!(matches!(
            Manifest::parse(yaml.as_bytes()).unwrap_err(),
            CoreError::Parse { .. }
        ));
    }

    #[test]
    fn test_parse_reports_every_violation() {
        let yaml = format!(
            "registries:\n- name: gcr.io/a\n- name: gcr.io/b\n\
             images:\n\
             - name: ok\n  dmap:\n    \"sha256:000\": [\".bad\"]\n\
             - name: empty\n  dmap: {{}}\n\
             - name: \"/slash\"\n  dmap:\n    \"{}\": []\n",
            digest('2')
        );
        let err = Manifest::parse(yaml.as_bytes()).unwrap_err();
        let CoreError::Invalid { errors, .. } = err else {
            panic!("expected invalid manifest, got {err:?}");
        };
        let fields: Vec<_> = errors.iter().map(|e| e.field.clone()).collect();
        assert!(fields.iter().any(|f| f == "images[0].dmap.digest"));
        assert!(fields.iter().any(|f| f == "images[0].dmap.tag"));
        assert!(fields.iter().any(|f| f == "images[1].dmap"));
        assert!(fields.iter().any(|f| f == "images[2].image name"));
        assert!(fields.iter().any(|f| f == "registries"));
        assert!(errors.len() >= 5);
    }

    #[test]
    fn test_parse_requires_registries() {
        let err = Manifest::parse(b"images: []\n").unwrap_err();
        assert!(err.to_string().contains("registries"));
    }

    #[test]
    fn test_parse_rejects_two_sources() {
        let yaml = "registries:\n- name: gcr.io/a\n  src: true\n- name: gcr.io/b\n  src: true\n";
        let err = Manifest::parse(yaml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("2 source registries"));
    }

    #[test]
    fn test_parse_rejects_duplicate_registry() {
        let yaml = "registries:\n- name: gcr.io/a\n  src: true\n- name: gcr.io/a\n";
        let err = Manifest::parse(yaml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_parse_thin() {
        let registries = "registries:\n- name: gcr.io/src\n  src: true\n- name: gcr.io/dst\n";
        let images = format!("- name: foo\n  dmap:\n    \"{}\": [\"1.0\"]\n", digest('a'));
        let m = Manifest::parse_thin(registries.as_bytes(), images.as_bytes()).unwrap();
        assert_eq!(m.images()[0].name.as_str(), "foo");
    }

    #[test]
    fn test_thin_registries_file_rejects_images_key() {
        let registries = "registries:\n- name: gcr.io/src\n  src: true\nimages: []\n";
        let err = Manifest::parse_thin(registries.as_bytes(), b"[]").unwrap_err();
        assert!(matches!(err, CoreError::Parse { .. }));
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn thin_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let registries = "registries:\n- name: gcr.io/src\n  src: true\n- name: gcr.io/dst\n";
        for name in ["alpha", "beta"] {
            write(
                dir.path(),
                &format!("manifests/{name}/promoter-manifest.yaml"),
                registries,
            );
            write(
                dir.path(),
                &format!("images/{name}/images.yaml"),
                &format!("- name: {name}\n  dmap:\n    \"{}\": [\"1.0\"]\n", digest('a')),
            );
        }
        dir
    }

    #[test]
    fn test_load_thin_manifests() {
        let dir = thin_tree();
        let manifests = load_thin_manifests(dir.path()).unwrap();
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0].images()[0].name.as_str(), "alpha");
        assert!(manifests[1].path().unwrap().ends_with("beta/promoter-manifest.yaml"));
    }

    #[test]
    fn test_layout_missing_images_file() {
        let dir = thin_tree();
        fs::remove_file(dir.path().join("images/beta/images.yaml")).unwrap();
        let err = validate_thin_manifest_layout(dir.path()).unwrap_err();
        assert!(matches!(err, CoreError::Layout { .. }));
        assert!(err.to_string().contains("beta"));
    }

    #[test]
    fn test_layout_rejects_wrong_depth() {
        let dir = thin_tree();
        write(
            dir.path(),
            "manifests/alpha/nested/promoter-manifest.yaml",
            "registries: []\n",
        );
        let err = validate_thin_manifest_layout(dir.path()).unwrap_err();
        assert!(err.to_string().contains("nested"));
    }

    #[test]
    fn test_layout_rejects_manifest_at_top_of_manifests() {
        let dir = thin_tree();
        write(dir.path(), "manifests/promoter-manifest.yaml", "registries: []\n");
        assert!(validate_thin_manifest_layout(dir.path()).is_err());
    }

    #[test]
    fn test_layout_requires_manifests_dir() {
        let dir = TempDir::new().unwrap();
        assert!(validate_thin_manifest_layout(dir.path()).is_err());
    }

    #[test]
    fn test_load_manifests_dir() {
        let dir = TempDir::new().unwrap();
        let yaml = manifest_yaml(&format!(
            "images:\n- name: a\n  dmap:\n    \"{}\": [\"0.9\"]\n",
            digest('0')
        ));
        write(dir.path(), "one.yaml", &yaml);
        write(dir.path(), "README.md", "not a manifest");
        let manifests = load_manifests_dir(dir.path()).unwrap();
        assert_eq!(manifests.len(), 1);
    }
}
