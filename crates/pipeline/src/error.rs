//! Pipeline error taxonomy.
//!
//! Stage-local failures are classified at the point of catch; only the
//! classification and a short human-readable reason cross the job boundary
//! into `last_error`. Raw internal detail (stack traces, driver errors)
//! stays in the logs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use scribe_extraction::ExtractError;
use scribe_memory::{StoreError, WriteError};

/// Error classification, the only part visible through `get_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network/timeout/temporary unavailability. Retryable under backoff.
    Transient,
    /// Malformed or incomplete job payload. Terminal immediately.
    Validation,
    /// The index write failed after the relational prepare; the whole
    /// write sequence is retried as a unit.
    Consistency,
    /// Unexpected/unclassified failure. Terminal, logged with full context.
    Fatal,
    /// Cooperative cancellation observed at a stage boundary. Terminal.
    Cancelled,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Transient | ErrorKind::Consistency)
    }
}

/// Stable, small error summary: kind plus a human-readable reason.
/// This is what `get_status` returns and what terminal progress events
/// carry. Never a stack trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub kind: ErrorKind,
    pub reason: String,
}

impl ErrorSummary {
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for ErrorSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.reason)
    }
}

/// A classified stage failure.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("invalid job payload: {0}")]
    Validation(String),

    #[error("dual-store consistency failure: {0}")]
    Consistency(String),

    #[error("fatal failure: {0}")]
    Fatal(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Transient(_) => ErrorKind::Transient,
            PipelineError::Validation(_) => ErrorKind::Validation,
            PipelineError::Consistency(_) => ErrorKind::Consistency,
            PipelineError::Fatal(_) => ErrorKind::Fatal,
            PipelineError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub fn summary(&self) -> ErrorSummary {
        let reason = match self {
            PipelineError::Transient(r)
            | PipelineError::Validation(r)
            | PipelineError::Consistency(r)
            | PipelineError::Fatal(r)
            | PipelineError::Cancelled(r) => r.clone(),
        };
        ErrorSummary::new(self.kind(), reason)
    }
}

impl From<ExtractError> for PipelineError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Malformed(r) => PipelineError::Validation(r),
            ExtractError::Unavailable(r) => PipelineError::Transient(r),
        }
    }
}

impl From<WriteError> for PipelineError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::Consistency { reason, .. } => PipelineError::Consistency(reason),
            WriteError::Relational(StoreError::Storage(r)) => PipelineError::Transient(r),
            WriteError::Relational(e) => PipelineError::Fatal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_memory::MemoryKey;

    #[test]
    fn classification_drives_retryability() {
        assert!(ErrorKind::Transient.is_retryable());
        assert!(ErrorKind::Consistency.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Fatal.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn extract_errors_classify() {
        let e: PipelineError = ExtractError::Malformed("no text".into()).into();
        assert_eq!(e.kind(), ErrorKind::Validation);

        let e: PipelineError = ExtractError::Unavailable("timeout".into()).into();
        assert_eq!(e.kind(), ErrorKind::Transient);
    }

    #[test]
    fn write_errors_classify() {
        let e: PipelineError = WriteError::Consistency {
            key: MemoryKey::new(),
            reason: "index down".into(),
        }
        .into();
        assert_eq!(e.kind(), ErrorKind::Consistency);

        let e: PipelineError = WriteError::Relational(StoreError::Storage("pool".into())).into();
        assert_eq!(e.kind(), ErrorKind::Transient);

        let e: PipelineError =
            WriteError::Relational(StoreError::DuplicateKey(MemoryKey::new())).into();
        assert_eq!(e.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn summary_is_kind_plus_reason() {
        let summary = PipelineError::Transient("index store unavailable".into()).summary();
        assert_eq!(summary.kind, ErrorKind::Transient);
        assert_eq!(summary.reason, "index store unavailable");
    }
}
