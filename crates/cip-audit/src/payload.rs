//! Pub/Sub push envelopes and the GCR change notifications they carry.

use base64::Engine as _;
use cip_core::{Digest, ImageReference, Tag};
use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};

/// A Cloud Pub/Sub push request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubSubEnvelope {
    /// The message.
    pub message: PubSubMessage,
    /// Subscription the message was delivered through.
    #[serde(default)]
    pub subscription: String,
}

/// The message inside a push request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubMessage {
    /// Base64-encoded payload.
    #[serde(default)]
    pub data: String,
    /// Message identifier.
    #[serde(default)]
    pub message_id: String,
}

/// A GCR change notification.
///
/// The field names are GCR's: `digest` holds a fully-qualified reference
/// (`registry/image@sha256:...`) and `tag` a partially-qualified one
/// (`registry/image:tag`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcrPayload {
    /// `INSERT` or `DELETE`.
    #[serde(default)]
    pub action: String,
    /// FQIN of the changed image.
    #[serde(default)]
    pub digest: String,
    /// PQIN of the changed tag, if any.
    #[serde(default)]
    pub tag: String,
}

/// Registry change kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// An image or tag was written.
    Insert,
    /// An image or tag was removed.
    Delete,
    /// Anything else.
    Unknown(String),
}

impl Action {
    fn parse(action: &str) -> Self {
        match action {
            "INSERT" => Self::Insert,
            "DELETE" => Self::Delete,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// A notification broken into its parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedPayload {
    /// What happened.
    pub action: Action,
    /// FQIN as received.
    pub fqin: String,
    /// PQIN as received.
    pub pqin: String,
    /// Repository path, `registry/image`.
    pub path: String,
    /// Digest, if the FQIN carried a valid one.
    pub digest: Option<Digest>,
    /// Tag, if the PQIN carried a valid one.
    pub tag: Option<Tag>,
}

impl GcrPayload {
    /// Decodes the payload of a push request.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not base64 or not a JSON payload.
    pub fn from_envelope(envelope: &PubSubEnvelope) -> Result<Self> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(envelope.message.data.trim())
            .map_err(|e| AuditError::Envelope {
                message: format!("message data is not base64: {e}"),
            })?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// The action, without looking at the references.
    #[must_use]
    pub fn action(&self) -> Action {
        Action::parse(&self.action)
    }

    /// Splits the references into path, digest and tag.
    ///
    /// # Errors
    ///
    /// Returns an error if a digest or tag is present but malformed, or if
    /// the FQIN and PQIN name different repositories.
    pub fn parse(&self) -> Result<ParsedPayload> {
        let from_digest = (!self.digest.is_empty()).then(|| ImageReference::split(&self.digest));
        let from_tag = (!self.tag.is_empty()).then(|| ImageReference::split(&self.tag));

        let digest = from_digest
            .as_ref()
            .and_then(|r| r.digest.as_deref())
            .map(Digest::parse)
            .transpose()
            .map_err(|e| AuditError::Payload {
                message: e.to_string(),
            })?;
        let tag = from_tag
            .as_ref()
            .and_then(|r| r.tag.as_deref())
            .map(Tag::parse)
            .transpose()
            .map_err(|e| AuditError::Payload {
                message: e.to_string(),
            })?;

        let path = match (&from_digest, &from_tag) {
            (Some(d), Some(t)) if d.path != t.path => {
                return Err(AuditError::Payload {
                    message: format!("{} and {} name different images", self.digest, self.tag),
                });
            }
            (Some(r), _) | (None, Some(r)) => r.path.clone(),
            (None, None) => String::new(),
        };

        Ok(ParsedPayload {
            action: self.action(),
            fqin: self.digest.clone(),
            pqin: self.tag.clone(),
            path,
            digest,
            tag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex() -> String {
        "a".repeat(64)
    }

    fn envelope(json: &str) -> PubSubEnvelope {
        PubSubEnvelope {
            message: PubSubMessage {
                data: base64::engine::general_purpose::STANDARD.encode(json),
                message_id: "1".to_string(),
            },
            subscription: "projects/p/subscriptions/s".to_string(),
        }
    }

    #[test]
    fn test_decode_envelope() {
        let env: PubSubEnvelope = serde_json::from_str(
            r#"{"message":{"data":"eyJhY3Rpb24iOiJJTlNFUlQifQ==","messageId":"42"},"subscription":"s"}"#,
        )
        .unwrap();
        assert_eq!(env.message.message_id, "42");
        let payload = GcrPayload::from_envelope(&env).unwrap();
        assert_eq!(payload.action, "INSERT");
        assert!(payload.digest.is_empty());
    }

    #[test]
    fn test_parse_full_payload() {
        let json = format!(
            r#"{{"action":"INSERT","digest":"gcr.io/dst/a@sha256:{}","tag":"gcr.io/dst/a:1.0"}}"#,
            hex()
        );
        let parsed = GcrPayload::from_envelope(&envelope(&json))
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(parsed.action, Action::Insert);
        assert_eq!(parsed.path, "gcr.io/dst/a");
        assert_eq!(parsed.digest.unwrap().hex(), hex());
        assert_eq!(parsed.tag.unwrap().as_str(), "1.0");
    }

    #[test]
    fn test_parse_digest_only() {
        let payload = GcrPayload {
            action: "DELETE".to_string(),
            digest: format!("gcr.io/dst/a/b@sha256:{}", hex()),
            tag: String::new(),
        };
        let parsed = payload.parse().unwrap();
        assert_eq!(parsed.action, Action::Delete);
        assert_eq!(parsed.path, "gcr.io/dst/a/b");
        assert!(parsed.tag.is_none());
    }

    #[test]
    fn test_unknown_action() {
        let payload = GcrPayload {
            action: "UPDATE".to_string(),
            ..GcrPayload::default()
        };
        assert_eq!(payload.parse().unwrap().action, Action::Unknown("UPDATE".to_string()));
    }

    #[test]
    fn test_bad_base64() {
        let env = PubSubEnvelope {
            message: PubSubMessage {
                data: "!!!".to_string(),
                message_id: String::new(),
            },
            subscription: String::new(),
        };
        assert!(matches!(
            GcrPayload::from_envelope(&env),
            Err(AuditError::Envelope { .. })
        ));
    }

    #[test]
    fn test_malformed_digest() {
        let payload = GcrPayload {
            action: "INSERT".to_string(),
            digest: "gcr.io/dst/a@sha256:123".to_string(),
            tag: String::new(),
        };
        assert!(matches!(payload.parse(), Err(AuditError::Payload { .. })));
    }

    #[test]
    fn test_mismatched_paths() {
        let payload = GcrPayload {
            action: "INSERT".to_string(),
            digest: format!("gcr.io/dst/a@sha256:{}", hex()),
            tag: "gcr.io/dst/b:1.0".to_string(),
        };
        assert!(payload.parse().is_err());
    }
}
