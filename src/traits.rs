use crate::model::{BatchQuery, BatchResult};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    /// Bad input to the engine itself; raised before any network call.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Vulnerability database returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode batch response: {0}")]
    Decode(String),

    /// More results than queries; positions can no longer be trusted.
    #[error("Batch response has {actual} results for {expected} queries")]
    ResultCountMismatch { expected: usize, actual: usize },

    #[error("Batch {index}/{total} ({size} packages) failed: {source}")]
    BatchFailed {
        index: usize,
        total: usize,
        size: usize,
        #[source]
        source: Box<ScanError>,
    },

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// Network failures, timeouts, 5xx and 429 are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ScanError::Transport { .. } | ScanError::Timeout { .. } => true,
            ScanError::Status { status, .. } => *status >= 500 || *status == 429,
            ScanError::BatchFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Unwraps a `BatchFailed` down to the executor error that caused it.
    pub fn root_cause(&self) -> &ScanError {
        match self {
            ScanError::BatchFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// A vulnerability database that answers positional batch queries.
#[async_trait]
pub trait VulnerabilityDatabase: Send + Sync {
    /// Short identifier used in logs (e.g., "osv").
    fn name(&self) -> &str;

    /// Sends one batch query. One call means exactly one upstream request
    /// for the plain executor; wrappers may issue more.
    async fn query_batch(&self, query: &BatchQuery) -> Result<BatchResult, ScanError>;
}
