//! Audit records.

use std::fmt;

use chrono::{DateTime, Utc};
use cip_core::Digest;
use serde::{Deserialize, Serialize};
use uuid::{Timestamp, Uuid};

use crate::payload::{Action, GcrPayload, ParsedPayload};

/// Generates a v7 UUID for a record.
fn new_record_id() -> Uuid {
    Uuid::new_v7(Timestamp::now(uuid::NoContext))
}

/// Severity of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    /// The change was expected.
    #[default]
    Info,
    /// The notification could not be understood.
    Error,
    /// The change was not sanctioned by any manifest.
    Critical,
}

/// Why a change was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    /// Deletions are never allowed.
    Deletion,
    /// The action is neither `INSERT` nor `DELETE`.
    UnknownAction {
        /// Action as received.
        action: String,
    },
    /// Neither a digest nor a tag was given.
    NoReference,
    /// The tag is recorded for another digest, or not at all for this one.
    TagMismatch {
        /// Digest the manifests put the tag on, if any.
        expected: Option<Digest>,
    },
    /// No manifest promotes this image.
    UnknownImage,
    /// The notification could not be decoded or the manifests loaded.
    Invalid {
        /// What went wrong.
        message: String,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deletion => write!(f, "deletions are not allowed"),
            Self::UnknownAction { action } => write!(f, "unknown action {action:?}"),
            Self::NoReference => write!(f, "payload has neither digest nor tag"),
            Self::TagMismatch {
                expected: Some(expected),
            } => write!(f, "tag belongs to {expected}"),
            Self::TagMismatch { expected: None } => write!(f, "tag is not recorded for this digest"),
            Self::UnknownImage => write!(f, "image is not in any manifest"),
            Self::Invalid { message } => write!(f, "{message}"),
        }
    }
}

/// Result of checking a change against the manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// A manifest promotes this digest to this image.
    Verified,
    /// The digest is a child of a manifest list a manifest promotes.
    VerifiedChild {
        /// The manifest list.
        parent: Digest,
    },
    /// Nothing sanctions the change.
    Rejected {
        /// Why.
        reason: Rejection,
    },
}

impl Verdict {
    pub(crate) const fn rejected(reason: Rejection) -> Self {
        Self::Rejected { reason }
    }

    /// True unless rejected.
    #[must_use]
    pub const fn is_verified(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// True if rejected for a tag mismatch.
    #[must_use]
    pub const fn is_tag_mismatch(&self) -> bool {
        matches!(
            self,
            Self::Rejected {
                reason: Rejection::TagMismatch { .. }
            }
        )
    }
}

/// What one notification was and how it was judged.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// Unique record ID.
    pub id: Uuid,
    /// When the notification was judged.
    pub timestamp: DateTime<Utc>,
    /// Pub/Sub message ID.
    pub message_id: String,
    /// Action as received.
    pub action: String,
    /// FQIN as received.
    pub fqin: String,
    /// PQIN as received.
    pub pqin: String,
    /// Repository path.
    pub path: String,
    /// Parsed digest.
    pub digest: Option<Digest>,
    /// Parsed tag.
    pub tag: Option<String>,
    /// Set when rejected for a tag mismatch.
    pub tag_mismatch: bool,
    /// The judgement.
    #[serde(flatten)]
    pub verdict: Verdict,
}

impl AuditRecord {
    /// Creates a record for a parsed notification.
    #[must_use]
    pub fn new(message_id: impl Into<String>, payload: &ParsedPayload, verdict: Verdict) -> Self {
        let action = match &payload.action {
            Action::Insert => "INSERT".to_string(),
            Action::Delete => "DELETE".to_string(),
            Action::Unknown(other) => other.clone(),
        };
        Self {
            id: new_record_id(),
            timestamp: Utc::now(),
            message_id: message_id.into(),
            action,
            fqin: payload.fqin.clone(),
            pqin: payload.pqin.clone(),
            path: payload.path.clone(),
            digest: payload.digest.clone(),
            tag: payload.tag.as_ref().map(|t| t.as_str().to_string()),
            tag_mismatch: verdict.is_tag_mismatch(),
            verdict,
        }
    }

    /// Creates a record for a decoded notification whose references could
    /// not be parsed. The references are kept as received.
    #[must_use]
    pub fn unparsed(message_id: impl Into<String>, payload: &GcrPayload, verdict: Verdict) -> Self {
        Self {
            id: new_record_id(),
            timestamp: Utc::now(),
            message_id: message_id.into(),
            action: payload.action.clone(),
            fqin: payload.digest.clone(),
            pqin: payload.tag.clone(),
            path: String::new(),
            digest: None,
            tag: None,
            tag_mismatch: false,
            verdict,
        }
    }

    /// Creates a record for a notification that could not be decoded.
    #[must_use]
    pub fn invalid(message_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: new_record_id(),
            timestamp: Utc::now(),
            message_id: message_id.into(),
            action: String::new(),
            fqin: String::new(),
            pqin: String::new(),
            path: String::new(),
            digest: None,
            tag: None,
            tag_mismatch: false,
            verdict: Verdict::rejected(Rejection::Invalid {
                message: message.into(),
            }),
        }
    }

    /// Severity used for filtering and alerting.
    #[must_use]
    pub const fn severity(&self) -> EventSeverity {
        match &self.verdict {
            Verdict::Verified | Verdict::VerifiedChild { .. } => EventSeverity::Info,
            Verdict::Rejected {
                reason: Rejection::Invalid { .. },
            } => EventSeverity::Error,
            Verdict::Rejected { .. } => EventSeverity::Critical,
        }
    }
}
