//! Audit logging and error reporting.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::record::{AuditRecord, EventSeverity};

/// Backend trait for audit log storage.
pub trait LoggerBackend: Send + Sync + Debug {
    /// Logs a serialized record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be logged.
    fn log(&self, record_json: &str) -> Result<(), LoggerError>;

    /// Returns the backend name for identification.
    fn name(&self) -> &'static str;
}

/// Errors that can occur during audit logging.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// Serialization error
    #[error("failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific error
    #[error("backend error: {0}")]
    Backend(String),
}

/// Sends audit records to every configured backend.
#[derive(Debug)]
pub struct AuditLogger {
    backends: Vec<Arc<dyn LoggerBackend>>,
    min_severity: EventSeverity,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::builder()
            .with_backend(Arc::new(TracingBackend::new()))
            .build()
    }
}

impl AuditLogger {
    /// Creates a builder for configuring the logger.
    #[must_use]
    pub fn builder() -> AuditLoggerBuilder {
        AuditLoggerBuilder::default()
    }

    /// Logs a record to all configured backends.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized.
    /// Backend errors are logged but do not cause this method to fail.
    pub fn log(&self, record: &AuditRecord) -> Result<(), LoggerError> {
        if record.severity() < self.min_severity {
            debug!(severity = ?record.severity(), "record below threshold, skipping");
            return Ok(());
        }

        let json = serde_json::to_string(record)?;
        for backend in &self.backends {
            if let Err(e) = backend.log(&json) {
                error!(backend = backend.name(), error = %e, "failed to write audit record");
            }
        }
        Ok(())
    }

    /// Returns the number of configured backends.
    #[must_use]
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }
}

/// Builder for configuring an audit logger.
#[derive(Debug, Default)]
pub struct AuditLoggerBuilder {
    backends: Vec<Arc<dyn LoggerBackend>>,
    min_severity: EventSeverity,
}

impl AuditLoggerBuilder {
    /// Adds a backend to the logger.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn LoggerBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Sets the minimum severity level.
    #[must_use]
    pub const fn min_severity(mut self, severity: EventSeverity) -> Self {
        self.min_severity = severity;
        self
    }

    /// Builds the audit logger.
    #[must_use]
    pub fn build(self) -> AuditLogger {
        AuditLogger {
            backends: self.backends,
            min_severity: self.min_severity,
        }
    }
}

/// Backend that emits records as tracing events.
#[derive(Debug, Default)]
pub struct TracingBackend;

impl TracingBackend {
    /// Creates a new tracing backend.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LoggerBackend for TracingBackend {
    fn log(&self, record_json: &str) -> Result<(), LoggerError> {
        let value: serde_json::Value = serde_json::from_str(record_json)?;
        match value.get("verdict").and_then(serde_json::Value::as_str) {
            Some("rejected") => warn!(audit_record = %record_json, "audit record"),
            _ => info!(audit_record = %record_json, "audit record"),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// In-memory backend for testing.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    records: Mutex<Vec<String>>,
}

impl InMemoryBackend {
    /// Creates a new in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all logged records.
    #[must_use]
    pub fn records(&self) -> Vec<String> {
        self.records.lock().clone()
    }

    /// Clears all logged records.
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl LoggerBackend for InMemoryBackend {
    fn log(&self, record_json: &str) -> Result<(), LoggerError> {
        self.records.lock().push(record_json.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// Escalates rejected changes.
pub trait ErrorReporter: Send + Sync + Debug {
    /// Reports a rejected or undecodable notification.
    fn report(&self, record: &AuditRecord);
}

/// Reports through `tracing` at error level.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, record: &AuditRecord) {
        error!(
            id = %record.id,
            action = %record.action,
            fqin = %record.fqin,
            pqin = %record.pqin,
            path = %record.path,
            tag_mismatch = record.tag_mismatch,
            verdict = ?record.verdict,
            "unsanctioned registry change"
        );
    }
}

/// Keeps reported records in memory for tests.
#[derive(Debug, Default)]
pub struct InMemoryReporter {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryReporter {
    /// Creates an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every reported record.
    #[must_use]
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl ErrorReporter for InMemoryReporter {
    fn report(&self, record: &AuditRecord) {
        self.records.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Rejection, Verdict};

    fn rejected() -> AuditRecord {
        let mut record = AuditRecord::invalid("1", "x");
        record.verdict = Verdict::Rejected {
            reason: Rejection::Deletion,
        };
        record
    }

    fn verified() -> AuditRecord {
        let mut record = AuditRecord::invalid("2", "x");
        record.verdict = Verdict::Verified;
        record
    }

    #[test]
    fn test_logger_with_in_memory_backend() {
        let backend = Arc::new(InMemoryBackend::new());
        let logger = AuditLogger::builder().with_backend(backend.clone()).build();

        logger.log(&rejected()).unwrap();

        let records = backend.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].contains("\"verdict\":\"rejected\""));
    }

    #[test]
    fn test_logger_severity_filtering() {
        let backend = Arc::new(InMemoryBackend::new());
        let logger = AuditLogger::builder()
            .with_backend(backend.clone())
            .min_severity(EventSeverity::Critical)
            .build();

        logger.log(&verified()).unwrap();
        logger.log(&rejected()).unwrap();

        assert_eq!(backend.records().len(), 1);
    }

    #[test]
    fn test_multiple_backends() {
        let backend1 = Arc::new(InMemoryBackend::new());
        let backend2 = Arc::new(InMemoryBackend::new());
        let logger = AuditLogger::builder()
            .with_backend(backend1.clone())
            .with_backend(backend2.clone())
            .build();

        logger.log(&verified()).unwrap();

        assert_eq!(backend1.records().len(), 1);
        assert_eq!(backend2.records().len(), 1);
        assert_eq!(logger.backend_count(), 2);
    }

    #[test]
    fn test_tracing_backend() {
        let backend = TracingBackend::new();
        backend.log(r#"{"verdict":"rejected"}"#).unwrap();
        assert!(backend.log("not json").is_err());
        assert_eq!(backend.name(), "tracing");
    }

    #[test]
    fn test_in_memory_backend_clear() {
        let backend = InMemoryBackend::new();
        backend.log(r#"{"verdict":"verified"}"#).unwrap();
        assert_eq!(backend.records().len(), 1);
        backend.clear();
        assert!(backend.records().is_empty());
    }

    #[test]
    fn test_in_memory_reporter() {
        let reporter = InMemoryReporter::new();
        reporter.report(&rejected());
        assert_eq!(reporter.records().len(), 1);
    }
}
