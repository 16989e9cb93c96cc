//! Judges registry change notifications against the manifests.
//!
//! Only insertions of images some manifest promotes are sanctioned.
//! Deletions are always rejected. Every judgement is logged, and rejections
//! are escalated through the [`ErrorReporter`].

use std::sync::Arc;

use cip_core::{digest_for_tag, Digest, Image, Tag};
use cip_registry::RepositoryReader;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::logger::{AuditLogger, ErrorReporter, TracingReporter};
use crate::payload::{Action, GcrPayload, ParsedPayload, PubSubEnvelope};
use crate::record::{AuditRecord, Rejection, Verdict};
use crate::source::ManifestSource;

/// Stateless handler for change notifications.
#[derive(Clone)]
pub struct Auditor {
    manifests: Arc<dyn ManifestSource>,
    reader: Arc<dyn RepositoryReader>,
    logger: Arc<AuditLogger>,
    reporter: Arc<dyn ErrorReporter>,
}

impl std::fmt::Debug for Auditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auditor")
            .field("logger", &self.logger)
            .field("reporter", &self.reporter)
            .finish_non_exhaustive()
    }
}

impl Auditor {
    /// Creates an auditor reading manifests from `manifests` and manifest
    /// lists from `reader`. Logs and reports through `tracing`.
    #[must_use]
    pub fn new(manifests: Arc<dyn ManifestSource>, reader: Arc<dyn RepositoryReader>) -> Self {
        Self {
            manifests,
            reader,
            logger: Arc::new(AuditLogger::default()),
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Uses `logger` for every record.
    #[must_use]
    pub fn with_logger(mut self, logger: AuditLogger) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// Uses `reporter` for rejections.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Handles the body of a Pub/Sub push request. Never fails: problems
    /// become rejected records.
    pub async fn audit(&self, body: &[u8]) -> AuditRecord {
        let record = match serde_json::from_slice::<PubSubEnvelope>(body) {
            Ok(envelope) => self.audit_envelope(&envelope).await,
            Err(e) => AuditRecord::invalid("", format!("invalid push request: {e}")),
        };

        if let Err(e) = self.logger.log(&record) {
            error!(error = %e, "failed to log audit record");
        }
        if !record.verdict.is_verified() {
            self.reporter.report(&record);
        }
        record
    }

    async fn audit_envelope(&self, envelope: &PubSubEnvelope) -> AuditRecord {
        let message_id = envelope.message.message_id.as_str();
        let payload = match GcrPayload::from_envelope(envelope) {
            Ok(payload) => payload,
            Err(e) => return AuditRecord::invalid(message_id, e.to_string()),
        };
        let parsed = match payload.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                // A deletion is a deletion whatever its references look like.
                let reason = action_rejection(&payload.action()).unwrap_or_else(|| {
                    Rejection::Invalid {
                        message: e.to_string(),
                    }
                });
                return AuditRecord::unparsed(message_id, &payload, Verdict::rejected(reason));
            }
        };

        let verdict = match self.verify(&parsed).await {
            Ok(verdict) => verdict,
            Err(e) => Verdict::rejected(Rejection::Invalid {
                message: e.to_string(),
            }),
        };
        info!(
            message_id,
            path = %parsed.path,
            fqin = %parsed.fqin,
            pqin = %parsed.pqin,
            verified = verdict.is_verified(),
            "audited change"
        );
        AuditRecord::new(message_id, &parsed, verdict)
    }

    /// Judges one parsed notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifests cannot be loaded.
    pub async fn verify(&self, payload: &ParsedPayload) -> Result<Verdict> {
        if let Some(reason) = action_rejection(&payload.action) {
            return Ok(Verdict::rejected(reason));
        }
        if payload.digest.is_none() && payload.tag.is_none() {
            return Ok(Verdict::rejected(Rejection::NoReference));
        }

        let manifests = self.manifests.load()?;
        let mut mismatch: Option<Rejection> = None;

        for manifest in &manifests {
            for registry in manifest.destination_registries() {
                let Some(rest) = payload
                    .path
                    .strip_prefix(registry.name.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
                else {
                    continue;
                };
                for image in manifest.images().iter().filter(|i| i.name.as_str() == rest) {
                    match self.judge_image(payload, image).await {
                        ImageJudgement::Sanctioned(verdict) => return Ok(verdict),
                        ImageJudgement::Mismatch(rejection) => mismatch = Some(rejection),
                        ImageJudgement::NoMatch => {}
                    }
                }
            }
        }

        Ok(Verdict::rejected(mismatch.unwrap_or(Rejection::UnknownImage)))
    }

    async fn judge_image(&self, payload: &ParsedPayload, image: &Image) -> ImageJudgement {
        let tagged = |tag: &Tag| digest_for_tag(&image.dmap, tag).cloned();

        let Some(digest) = &payload.digest else {
            return match payload.tag.as_ref().and_then(tagged) {
                Some(_) => ImageJudgement::Sanctioned(Verdict::Verified),
                None => ImageJudgement::NoMatch,
            };
        };

        if let Some(tags) = image.dmap.get(digest) {
            return match &payload.tag {
                Some(tag) if !tags.contains(tag) => {
                    ImageJudgement::Mismatch(Rejection::TagMismatch {
                        expected: tagged(tag),
                    })
                }
                _ => ImageJudgement::Sanctioned(Verdict::Verified),
            };
        }

        if let Some(parent) = self.find_parent(&payload.path, digest, image).await {
            return ImageJudgement::Sanctioned(Verdict::VerifiedChild { parent });
        }

        match payload.tag.as_ref().and_then(tagged) {
            Some(expected) if &expected != digest => ImageJudgement::Mismatch(Rejection::TagMismatch {
                expected: Some(expected),
            }),
            _ => ImageJudgement::NoMatch,
        }
    }

    /// Looks through the live manifest lists of the image's sanctioned
    /// digests for one referencing `digest`.
    async fn find_parent(&self, path: &str, digest: &Digest, image: &Image) -> Option<Digest> {
        for candidate in image.dmap.keys() {
            match self.reader.read_manifest_list(path, candidate.as_str()).await {
                Ok(list) => {
                    if list.manifests.iter().any(|m| m.digest == digest.as_str()) {
                        return Some(candidate.clone());
                    }
                }
                Err(e) => debug!(path, digest = %candidate, error = %e, "no manifest list"),
            }
        }
        None
    }
}

/// Every action other than an insertion is rejected outright.
fn action_rejection(action: &Action) -> Option<Rejection> {
    match action {
        Action::Insert => None,
        Action::Delete => Some(Rejection::Deletion),
        Action::Unknown(action) => Some(Rejection::UnknownAction {
            action: action.clone(),
        }),
    }
}

enum ImageJudgement {
    Sanctioned(Verdict),
    Mismatch(Rejection),
    NoMatch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::{InMemoryBackend, InMemoryReporter};
    use crate::source::StaticManifests;
    use base64::Engine as _;
    use cip_core::Manifest;
    use cip_registry::{InMemoryRegistry, MediaType};

    fn digest(c: char) -> String {
        format!("sha256:{}", c.to_string().repeat(64))
    }

    fn manifests() -> Vec<Manifest> {
        let yaml = format!(
            "registries:\n\
             - name: gcr.io/src\n  src: true\n\
             - name: us.gcr.io/dst\n\
             images:\n\
             - name: a\n  dmap:\n    \"{}\": [\"1.0\"]\n    \"{}\": [\"2.0\", \"latest\"]\n\
             - name: multi\n  dmap:\n    \"{}\": [\"3.0\"]\n",
            digest('1'),
            digest('2'),
            digest('f'),
        );
        vec![Manifest::parse(yaml.as_bytes()).unwrap()]
    }

    struct Harness {
        auditor: Auditor,
        backend: Arc<InMemoryBackend>,
        reporter: Arc<InMemoryReporter>,
        registry: Arc<InMemoryRegistry>,
    }

    fn harness() -> Harness {
        let backend = Arc::new(InMemoryBackend::new());
        let reporter = Arc::new(InMemoryReporter::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let auditor = Auditor::new(Arc::new(StaticManifests(manifests())), registry.clone())
            .with_logger(AuditLogger::builder().with_backend(backend.clone()).build())
            .with_reporter(reporter.clone());
        Harness {
            auditor,
            backend,
            reporter,
            registry,
        }
    }

    fn body(action: &str, fqin: &str, pqin: &str) -> Vec<u8> {
        let inner = serde_json::json!({"action": action, "digest": fqin, "tag": pqin}).to_string();
        serde_json::json!({
            "message": {
                "data": base64::engine::general_purpose::STANDARD.encode(inner),
                "messageId": "123"
            },
            "subscription": "projects/p/subscriptions/gcr"
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_verified_insert() {
        let h = harness();
        let fqin = format!("us.gcr.io/dst/a@{}", digest('2'));
        let record = h.auditor.audit(&body("INSERT", &fqin, "us.gcr.io/dst/a:latest")).await;

        assert_eq!(record.verdict, Verdict::Verified);
        assert_eq!(record.message_id, "123");
        assert_eq!(h.backend.records().len(), 1);
        assert!(h.reporter.records().is_empty());
    }

    #[tokio::test]
    async fn test_digest_only_insert_verified() {
        let h = harness();
        let fqin = format!("us.gcr.io/dst/a@{}", digest('1'));
        let record = h.auditor.audit(&body("INSERT", &fqin, "")).await;
        assert!(record.verdict.is_verified());
    }

    #[tokio::test]
    async fn test_delete_always_rejected() {
        let h = harness();
        let fqin = format!("us.gcr.io/dst/a@{}", digest('1'));
        let record = h.auditor.audit(&body("DELETE", &fqin, "us.gcr.io/dst/a:1.0")).await;

        assert_eq!(
            record.verdict,
            Verdict::Rejected {
                reason: Rejection::Deletion
            }
        );
        assert_eq!(h.reporter.records().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_with_malformed_reference_is_deletion() {
        let h = harness();
        let record = h.auditor.audit(&body("DELETE", "us.gcr.io/dst/a@sha256:123", "")).await;

        assert_eq!(
            record.verdict,
            Verdict::Rejected {
                reason: Rejection::Deletion
            }
        );
        assert_eq!(record.action, "DELETE");
        assert_eq!(record.fqin, "us.gcr.io/dst/a@sha256:123");
        assert_eq!(h.reporter.records().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_with_malformed_reference_is_invalid() {
        let h = harness();
        let record = h.auditor.audit(&body("INSERT", "us.gcr.io/dst/a@sha256:123", "")).await;
        assert!(matches!(
            record.verdict,
            Verdict::Rejected {
                reason: Rejection::Invalid { .. }
            }
        ));
        assert_eq!(record.action, "INSERT");
    }

    #[tokio::test]
    async fn test_tag_mismatch_on_known_digest() {
        let h = harness();
        let fqin = format!("us.gcr.io/dst/a@{}", digest('1'));
        let record = h.auditor.audit(&body("INSERT", &fqin, "us.gcr.io/dst/a:latest")).await;

        assert!(record.tag_mismatch);
        assert_eq!(
            record.verdict,
            Verdict::Rejected {
                reason: Rejection::TagMismatch {
                    expected: Some(Digest::parse(digest('2')).unwrap())
                }
            }
        );
    }

    #[tokio::test]
    async fn test_tag_mismatch_on_unknown_digest() {
        let h = harness();
        let fqin = format!("us.gcr.io/dst/a@{}", digest('9'));
        let record = h.auditor.audit(&body("INSERT", &fqin, "us.gcr.io/dst/a:1.0")).await;
        assert!(record.tag_mismatch);
    }

    #[tokio::test]
    async fn test_unknown_image_rejected() {
        let h = harness();
        let fqin = format!("us.gcr.io/dst/other@{}", digest('1'));
        let record = h.auditor.audit(&body("INSERT", &fqin, "")).await;
        assert_eq!(
            record.verdict,
            Verdict::Rejected {
                reason: Rejection::UnknownImage
            }
        );
        assert!(!record.tag_mismatch);
    }

    #[tokio::test]
    async fn test_source_registry_not_sanctioned() {
        let h = harness();
        let fqin = format!("gcr.io/src/a@{}", digest('1'));
        let record = h.auditor.audit(&body("INSERT", &fqin, "")).await;
        assert!(!record.verdict.is_verified());
    }

    #[tokio::test]
    async fn test_manifest_list_child_verified() {
        let h = harness();
        h.registry.insert_manifest_list(
            "us.gcr.io/dst/multi",
            &digest('f'),
            &["3.0"],
            &[digest('c').as_str(), digest('d').as_str()],
        );
        h.registry
            .insert("us.gcr.io/dst/multi", &digest('d'), &[], MediaType::DOCKER_MANIFEST, 1);

        let fqin = format!("us.gcr.io/dst/multi@{}", digest('d'));
        let record = h.auditor.audit(&body("INSERT", &fqin, "")).await;

        assert_eq!(
            record.verdict,
            Verdict::VerifiedChild {
                parent: Digest::parse(digest('f')).unwrap()
            }
        );
    }

    #[tokio::test]
    async fn test_garbage_body_rejected_not_panicking() {
        let h = harness();
        let record = h.auditor.audit(b"not json").await;
        assert!(matches!(
            record.verdict,
            Verdict::Rejected {
                reason: Rejection::Invalid { .. }
            }
        ));
        assert_eq!(h.reporter.records().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        let h = harness();
        let record = h.auditor.audit(&body("INSERT", "", "")).await;
        assert_eq!(
            record.verdict,
            Verdict::Rejected {
                reason: Rejection::NoReference
            }
        );
    }
}
