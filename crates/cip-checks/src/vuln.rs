//! Image vulnerability check.
//!
//! Source digests are queried once each, even when several edges share
//! them. Violations are reported per destination image.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cip_core::{Digest, ImageName, PromotionEdge};
use cip_sync::{JobHandler, JobQueue, SyncConfig, WorkerPool};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::check::PreCheck;
use crate::error::{CheckError, Result};

/// Severity of a vulnerability, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// No severity given.
    #[default]
    #[serde(rename = "SEVERITY_UNSPECIFIED")]
    Unspecified,
    /// Minimal severity.
    Minimal,
    /// Low severity.
    Low,
    /// Medium severity.
    Medium,
    /// High severity.
    High,
    /// Critical severity.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unspecified => "SEVERITY_UNSPECIFIED",
            Self::Minimal => "MINIMAL",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SEVERITY_UNSPECIFIED" | "UNSPECIFIED" => Ok(Self::Unspecified),
            "MINIMAL" => Ok(Self::Minimal),
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// One vulnerability found in an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    /// Provider-assigned identifier.
    pub name: String,
    /// Effective severity.
    pub severity: Severity,
    /// Whether a fixed package version exists.
    pub fix_available: bool,
}

/// Looks up known vulnerabilities of an image.
#[async_trait]
pub trait VulnerabilityProvider: Send + Sync {
    /// Returns every vulnerability occurrence recorded for `fqin`.
    async fn occurrences(&self, fqin: &str) -> Result<Vec<Occurrence>>;
}

/// Fails if any source image has a fixable vulnerability at or above a
/// severity threshold.
pub struct ImageVulnerabilityCheck {
    provider: Arc<dyn VulnerabilityProvider>,
    edges: BTreeSet<PromotionEdge>,
    threshold: Severity,
    config: SyncConfig,
}

impl fmt::Debug for ImageVulnerabilityCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageVulnerabilityCheck")
            .field("edges", &self.edges.len())
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl ImageVulnerabilityCheck {
    /// Creates a check over `edges`.
    #[must_use]
    pub fn new(
        provider: Arc<dyn VulnerabilityProvider>,
        edges: BTreeSet<PromotionEdge>,
        threshold: Severity,
    ) -> Self {
        Self {
            provider,
            edges,
            threshold,
            config: SyncConfig::default(),
        }
    }

    /// Sizes the worker pool used for lookups.
    #[must_use]
    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }
}

/// A lookup for one unique source digest.
#[derive(Debug, Clone)]
struct VulnJob {
    digest: Digest,
    fqin: String,
}

struct Lookup {
    provider: Arc<dyn VulnerabilityProvider>,
    results: Mutex<BTreeMap<Digest, std::result::Result<Vec<Occurrence>, String>>>,
}

#[async_trait]
impl JobHandler<VulnJob> for Lookup {
    async fn handle(&self, job: VulnJob, _queue: &JobQueue<VulnJob>) {
        debug!(image = %job.fqin, "querying vulnerabilities");
        let result = self
            .provider
            .occurrences(&job.fqin)
            .await
            .map_err(|e| e.to_string());
        if let Err(e) = &result {
            warn!(image = %job.fqin, error = %e, "vulnerability lookup failed");
        }
        self.results.lock().insert(job.digest, result);
    }
}

#[derive(Debug, Default)]
struct ImageFindings {
    fixable_severe: usize,
    total: usize,
    errors: BTreeSet<String>,
}

#[async_trait]
impl PreCheck for ImageVulnerabilityCheck {
    fn name(&self) -> &str {
        "image-vulnerability"
    }

    async fn run(&self) -> Result<()> {
        let mut jobs: BTreeMap<&Digest, String> = BTreeMap::new();
        for edge in &self.edges {
            jobs.entry(&edge.digest).or_insert_with(|| edge.src_fqin());
        }
        info!(
            edges = self.edges.len(),
            digests = jobs.len(),
            threshold = %self.threshold,
            "checking vulnerabilities"
        );

        let lookup = Arc::new(Lookup {
            provider: Arc::clone(&self.provider),
            results: Mutex::new(BTreeMap::new()),
        });
        let jobs: Vec<VulnJob> = jobs
            .into_iter()
            .map(|(digest, fqin)| VulnJob {
                digest: digest.clone(),
                fqin,
            })
            .collect();
        WorkerPool::from_config(&self.config)
            .run(Arc::clone(&lookup), |queue| {
                for job in jobs {
                    queue.push(job);
                }
            })
            .await?;

        let results = lookup.results.lock();
        let mut findings: BTreeMap<&ImageName, ImageFindings> = BTreeMap::new();
        for edge in &self.edges {
            let Some(result) = results.get(&edge.digest) else {
                continue;
            };
            let entry = findings.entry(&edge.dst_image_tag.name).or_default();
            match result {
                Ok(occurrences) => {
                    for occurrence in occurrences {
                        entry.total += 1;
                        if occurrence.fix_available && occurrence.severity >= self.threshold {
                            entry.fixable_severe += 1;
                        }
                    }
                }
                Err(e) => {
                    entry.errors.insert(e.clone());
                }
            }
        }

        let violations: Vec<String> = findings
            .iter()
            .filter_map(|(image, f)| {
                if !f.errors.is_empty() {
                    let errors: Vec<&str> = f.errors.iter().map(String::as_str).collect();
                    return Some(format!("{image}: lookup failed: {}", errors.join("; ")));
                }
                (f.fixable_severe > 0).then(|| {
                    format!(
                        "{image}: {} fixable vulnerabilities at or above {} ({} total)",
                        f.fixable_severe, self.threshold, f.total
                    )
                })
            })
            .collect();
        drop(results);

        if violations.is_empty() {
            return Ok(());
        }
        Err(CheckError::failed(self.name(), violations.join(", ")))
    }
}

/// Response of the Container Analysis occurrence listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListOccurrencesResponse {
    #[serde(default)]
    occurrences: Vec<GrafeasOccurrence>,
    #[serde(default)]
    next_page_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrafeasOccurrence {
    #[serde(default)]
    name: String,
    #[serde(default)]
    vulnerability: Option<GrafeasVulnerability>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrafeasVulnerability {
    #[serde(default)]
    severity: Severity,
    #[serde(default)]
    effective_severity: Severity,
    #[serde(default)]
    fix_available: bool,
}

/// Container Analysis (Grafeas) REST client listing
/// `PACKAGE_VULNERABILITY` occurrences.
#[derive(Debug, Clone)]
pub struct GrafeasProvider {
    http: reqwest::Client,
    endpoint: url::Url,
    project: String,
    token: Option<String>,
}

impl GrafeasProvider {
    /// Default API endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://containeranalysis.googleapis.com/";

    /// Creates a provider for occurrences stored in `project`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(project: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| CheckError::Provider {
                resource: Self::DEFAULT_ENDPOINT.to_string(),
                message: e.to_string(),
            })?;
        let endpoint = url::Url::parse(Self::DEFAULT_ENDPOINT).map_err(|e| CheckError::Provider {
            resource: Self::DEFAULT_ENDPOINT.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            http,
            endpoint,
            project: project.into(),
            token: None,
        })
    }

    /// Uses another API endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if `endpoint` is not a valid URL.
    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self> {
        let mut endpoint = endpoint.to_string();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        self.endpoint = url::Url::parse(&endpoint).map_err(|e| CheckError::Provider {
            resource: endpoint.clone(),
            message: e.to_string(),
        })?;
        Ok(self)
    }

    /// Sends `token` as a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    async fn page(&self, fqin: &str, page_token: &str) -> Result<ListOccurrencesResponse> {
        let provider_error = |message: String| CheckError::Provider {
            resource: fqin.to_string(),
            message,
        };
        let url = self
            .endpoint
            .join(&format!("v1/projects/{}/occurrences", self.project))
            .map_err(|e| provider_error(e.to_string()))?;
        let filter = format!("resourceUrl=\"https://{fqin}\" AND kind=\"PACKAGE_VULNERABILITY\"");

        let mut request = self.http.get(url).query(&[("filter", filter.as_str())]);
        if !page_token.is_empty() {
            request = request.query(&[("pageToken", page_token)]);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| provider_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(provider_error(format!("HTTP {status}: {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| provider_error(e.to_string()))
    }
}

#[async_trait]
impl VulnerabilityProvider for GrafeasProvider {
    async fn occurrences(&self, fqin: &str) -> Result<Vec<Occurrence>> {
        let mut occurrences = Vec::new();
        let mut page_token = String::new();
        loop {
            let page = self.page(fqin, &page_token).await?;
            occurrences.extend(page.occurrences.into_iter().filter_map(|o| {
                o.vulnerability.map(|v| Occurrence {
                    name: o.name,
                    severity: if v.effective_severity == Severity::Unspecified {
                        v.severity
                    } else {
                        v.effective_severity
                    },
                    fix_available: v.fix_available,
                })
            }));
            if page.next_page_token.is_empty() {
                return Ok(occurrences);
            }
            page_token = page.next_page_token;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cip_core::{ImageTag, RegistryContext, RegistryName, Tag};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        calls: AtomicUsize,
        by_fqin: BTreeMap<String, Vec<Occurrence>>,
        failing: Option<String>,
    }

    #[async_trait]
    impl VulnerabilityProvider for Fixed {
        async fn occurrences(&self, fqin: &str) -> Result<Vec<Occurrence>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.as_deref() == Some(fqin) {
                return Err(CheckError::Provider {
                    resource: fqin.to_string(),
                    message: "unavailable".to_string(),
                });
            }
            Ok(self.by_fqin.get(fqin).cloned().unwrap_or_default())
        }
    }

    fn digest(c: char) -> Digest {
        Digest::parse(format!("sha256:{}", c.to_string().repeat(64))).unwrap()
    }

    fn edge(src_image: &str, dst_image: &str, c: char) -> PromotionEdge {
        let tag = Some(Tag::parse("1.0").unwrap());
        PromotionEdge {
            src_registry: RegistryContext::new(RegistryName::new("gcr.io/src").unwrap(), true),
            src_image_tag: ImageTag::new(ImageName::new(src_image).unwrap(), tag.clone()),
            digest: digest(c),
            dst_registry: RegistryContext::new(RegistryName::new("gcr.io/dst").unwrap(), false),
            dst_image_tag: ImageTag::new(ImageName::new(dst_image).unwrap(), tag),
        }
    }

    fn occurrence(severity: Severity, fix_available: bool) -> Occurrence {
        Occurrence {
            name: "projects/p/occurrences/1".to_string(),
            severity,
            fix_available,
        }
    }

    fn provider(by_fqin: BTreeMap<String, Vec<Occurrence>>) -> Arc<Fixed> {
        Arc::new(Fixed {
            calls: AtomicUsize::new(0),
            by_fqin,
            failing: None,
        })
    }

    #[test]
    fn test_severity_order_and_parse() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Unspecified);
        assert_eq!("high".parse::<Severity>().unwrap(), Severity::High);
        assert!("severe".parse::<Severity>().is_err());
        let parsed: Severity = serde_json::from_str("\"SEVERITY_UNSPECIFIED\"").unwrap();
        assert_eq!(parsed, Severity::Unspecified);
    }

    #[tokio::test]
    async fn test_dedups_source_digests() {
        let edges: BTreeSet<_> = [edge("a", "a", '1'), edge("a", "b", '1')].into_iter().collect();
        let fixed = provider(BTreeMap::new());
        ImageVulnerabilityCheck::new(fixed.clone(), edges, Severity::High)
            .run()
            .await
            .unwrap();
        assert_eq!(fixed.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_only_fixable_severe_fails() {
        let a = edge("a", "a", '1');
        let b = edge("b", "b", '2');
        let by_fqin = [
            (
                a.src_fqin(),
                vec![
                    occurrence(Severity::Critical, false),
                    occurrence(Severity::Low, true),
                ],
            ),
            (
                b.src_fqin(),
                vec![
                    occurrence(Severity::High, true),
                    occurrence(Severity::Medium, true),
                ],
            ),
        ]
        .into_iter()
        .collect();
        let edges: BTreeSet<_> = [a, b].into_iter().collect();

        let err = ImageVulnerabilityCheck::new(provider(by_fqin), edges, Severity::High)
            .run()
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("b: 1 fixable vulnerabilities at or above HIGH (2 total)"));
        assert!(!text.contains("a: "));
    }

    #[tokio::test]
    async fn test_reports_every_destination_image_sharing_a_digest() {
        let a = edge("a", "a", '1');
        let by_fqin = [(a.src_fqin(), vec![occurrence(Severity::Critical, true)])]
            .into_iter()
            .collect();
        let edges: BTreeSet<_> = [a, edge("a", "mirror", '1')].into_iter().collect();

        let err = ImageVulnerabilityCheck::new(provider(by_fqin), edges, Severity::High)
            .run()
            .await
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("a: 1 fixable"));
        assert!(text.contains("mirror: 1 fixable"));
    }

    #[tokio::test]
    async fn test_lookup_failure_fails_check() {
        let a = edge("a", "a", '1');
        let fixed = Arc::new(Fixed {
            calls: AtomicUsize::new(0),
            by_fqin: BTreeMap::new(),
            failing: Some(a.src_fqin()),
        });
        let edges: BTreeSet<_> = [a].into_iter().collect();

        let err = ImageVulnerabilityCheck::new(fixed, edges, Severity::High)
            .run()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("lookup failed"));
    }
}
