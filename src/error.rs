//! Error taxonomy for the sync engine.
//!
//! Application boundaries (config loading, the CLI, adapter construction)
//! use `anyhow`. The engine itself needs to tell error classes apart, so
//! provider and store calls return these typed errors instead.

use thiserror::Error;

/// Failure reported by an embedding provider or vector store call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Timeout, connection failure, HTTP 429 or 5xx. Worth retrying.
    #[error("transient: {0}")]
    Transient(String),

    /// HTTP 4xx (other than 429) or a malformed response. Never retried.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Classify an HTTP status that was not a success.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let msg = format!("HTTP {}: {}", status, body);
        if status.as_u16() == 429 || status.is_server_error() {
            ProviderError::Transient(msg)
        } else {
            ProviderError::Permanent(msg)
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            ProviderError::Transient(e.to_string())
        } else if let Some(status) = e.status() {
            ProviderError::from_status(status, &e.to_string())
        } else if e.is_decode() {
            ProviderError::Permanent(format!("malformed response: {}", e))
        } else {
            ProviderError::Transient(e.to_string())
        }
    }
}

/// Errors surfaced by the reconciler and query service.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Missing credentials, dimension or metric mismatch. Fatal; raised
    /// before any mutation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Bad caller input (e.g. empty query text).
    #[error("invalid request: {0}")]
    Validation(String),

    /// Retryable provider/store failure.
    #[error("transient error: {0}")]
    Transient(String),

    /// Non-retryable provider/store failure.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// The store accepted some of a batch but rejected the rest.
    #[error("partial batch failure: {0}")]
    PartialBatch(String),

    /// The document source could not be listed.
    #[error("document source error: {0}")]
    Source(String),

    /// The sync state could not be loaded or written.
    #[error("sync state error: {0}")]
    State(String),
}

impl From<ProviderError> for SyncError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Transient(m) => SyncError::Transient(m),
            ProviderError::Permanent(m) => SyncError::Permanent(m),
        }
    }
}
