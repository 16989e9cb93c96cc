//! Error types for the auditor.

use thiserror::Error;

/// Result type alias for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;

/// Errors raised while handling a notification.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The push request itself is malformed.
    #[error("invalid push request: {message}")]
    Envelope {
        /// What is wrong.
        message: String,
    },

    /// The payload is not JSON of the expected shape.
    #[error("invalid payload JSON: {0}")]
    Decode(#[from] serde_json::Error),

    /// The payload carries a malformed reference.
    #[error("invalid payload: {message}")]
    Payload {
        /// What is wrong.
        message: String,
    },

    /// The manifests could not be loaded.
    #[error("cannot load manifests: {0}")]
    Manifest(#[from] cip_core::CoreError),

    /// An audit record could not be written.
    #[error(transparent)]
    Logger(#[from] crate::logger::LoggerError),

    /// The HTTP server could not bind or stopped with an error.
    #[error("server on {addr} failed: {source}")]
    Serve {
        /// Listen address.
        addr: std::net::SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
