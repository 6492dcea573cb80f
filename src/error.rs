use crate::types::SignalSource;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Caller-facing classification of a failure, carried on attempts and results
/// so downstream UI/CLI code can branch without matching on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Fatal,
    Retryable,
    RateLimited,
    SignalUnavailable,
    Unresolvable,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Retryable => "retryable",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::SignalUnavailable => "signal_unavailable",
            ErrorKind::Unresolvable => "unresolvable",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Upstream rejected the request: {message}")]
    FatalTransport { message: String, status: Option<u16> },

    #[error("Transient transport failure: {message}")]
    RetryableTransport { message: String, status: Option<u16> },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<IngestError>,
    },

    #[error("Rate limit exceeded for '{key}', retry after {retry_after:?}")]
    RateLimitExceeded { key: String, retry_after: Duration },

    #[error("Status signal {signal} unavailable: {message}")]
    SignalUnavailable { signal: SignalSource, message: String },

    #[error("No status signal could be obtained for asset {asset_id}")]
    Unresolvable { asset_id: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn fatal(message: impl Into<String>, status: Option<u16>) -> Self {
        IngestError::FatalTransport { message: message.into(), status }
    }

    pub fn retryable(message: impl Into<String>, status: Option<u16>) -> Self {
        IngestError::RetryableTransport { message: message.into(), status }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Validation(_) => ErrorKind::Validation,
            IngestError::FatalTransport { .. } => ErrorKind::Fatal,
            IngestError::RetryableTransport { .. } => ErrorKind::Retryable,
            IngestError::RetriesExhausted { last, .. } => last.kind(),
            IngestError::RateLimitExceeded { .. } => ErrorKind::RateLimited,
            IngestError::SignalUnavailable { .. } => ErrorKind::SignalUnavailable,
            IngestError::Unresolvable { .. } => ErrorKind::Unresolvable,
            IngestError::Cancelled => ErrorKind::Cancelled,
            IngestError::Config(_)
            | IngestError::Storage(_)
            | IngestError::Json(_)
            | IngestError::Toml(_)
            | IngestError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Only transient transport failures consume retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::RetryableTransport { .. })
    }

    /// HTTP status of the upstream response that produced this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            IngestError::FatalTransport { status, .. }
            | IngestError::RetryableTransport { status, .. } => *status,
            IngestError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_retries_keep_the_underlying_kind() {
        let err = IngestError::RetriesExhausted {
            attempts: 3,
            last: Box::new(IngestError::retryable("HTTP 503", Some(503))),
        };
        assert_eq!(err.kind(), ErrorKind::Retryable);
        assert_eq!(err.status(), Some(503));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn fatal_errors_are_not_retryable() {
        let err = IngestError::fatal("file too large", Some(413));
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(!err.is_retryable());
    }
}
