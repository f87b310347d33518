//! Typed error kinds for the ingestion core.
//!
//! Call sites mostly propagate `anyhow::Result`, but every error that
//! crosses a retry/backoff/propagation boundary is one of these variants
//! so callers can match on kind instead of string content.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("config missing: {0}")]
    ConfigMissing(String),

    #[error("auth failed: {0}")]
    AuthFail(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("not available: {0}")]
    NotAvailable(String),

    #[error("fatal writer error: {0}")]
    FatalWriter(String),
}

impl IngestError {
    /// Whether a caller should retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Transient(_) | IngestError::RateLimit(_))
    }
}
