//! Error types for registry operations.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Failed to connect to the registry.
    #[error("failed to connect to registry at {url}: {source}")]
    ConnectionFailed {
        /// Request URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// Request URL.
        url: String,
    },

    /// The registry asked us to slow down (HTTP 429).
    #[error("rate limited by {url}")]
    RateLimited {
        /// Request URL.
        url: String,
        /// Value of the `Retry-After` header, if any.
        retry_after: Option<Duration>,
    },

    /// Credentials were rejected (HTTP 401/403).
    #[error("authentication failed for {url}: {status}")]
    AuthenticationFailed {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Repository or manifest does not exist (HTTP 404).
    #[error("not found: {url}")]
    NotFound {
        /// Request URL.
        url: String,
    },

    /// Any other non-success HTTP status.
    #[error("HTTP error from {url}: {status} - {message}")]
    Http {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// Response body is not the expected JSON.
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        /// Request URL.
        url: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A retryable error persisted through every attempt.
    #[error("giving up on {url} after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Request URL.
        url: String,
        /// Attempts made.
        attempts: u32,
        /// Last error seen.
        #[source]
        source: Box<RegistryError>,
    },

    /// Credentials cannot be encoded as a header.
    #[error("invalid credentials: {message}")]
    InvalidCredentials {
        /// Error message.
        message: String,
    },

    /// Invalid URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// URL string.
        url: String,
    },

    /// Invalid repository reference.
    #[error("invalid repository reference: {reference}")]
    InvalidReference {
        /// Reference string.
        reference: String,
    },
}

impl RegistryError {
    /// Returns true if the request may succeed when repeated.
    ///
    /// Connection failures, timeouts, 429 and 5xx are retryable. Other 4xx
    /// responses and decoding errors are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } | Self::RateLimited { .. } => {
                true
            }
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true for HTTP 404.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if err.is_connect() || err.is_request() {
            Self::ConnectionFailed {
                url: url.to_string(),
                source: err,
            }
        } else {
            Self::Http {
                url: url.to_string(),
                status: err.status().map_or(0, |s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let url = "https://gcr.io/v2/foo/tags/list".to_string();
        assert!(RegistryError::Timeout { url: url.clone() }.is_retryable());
        assert!(RegistryError::RateLimited {
            url: url.clone(),
            retry_after: None
        }
        .is_retryable());
        assert!(RegistryError::Http {
            url: url.clone(),
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!RegistryError::Http {
            url: url.clone(),
            status: 400,
            message: String::new()
        }
        .is_retryable());
        assert!(!RegistryError::NotFound { url: url.clone() }.is_retryable());
        assert!(!RegistryError::AuthenticationFailed { url, status: 401 }.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = RegistryError::NotFound {
            url: "https://gcr.io/v2/foo/tags/list".to_string(),
        };
        assert_eq!(err.to_string(), "not found: https://gcr.io/v2/foo/tags/list");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = RegistryError::RetriesExhausted {
            url: "u".to_string(),
            attempts: 3,
            source: Box::new(RegistryError::Timeout {
                url: "u".to_string(),
            }),
        };
        assert_eq!(err.to_string(), "giving up on u after 3 attempts: request to u timed out");
    }
}
