//! Error types for codescope-search
//!
//! The taxonomy distinguishes fatal errors (validation, authentication) from
//! transient ones (rate limits, timeouts, network); [`SearchError::is_retryable`]
//! drives the backoff layer.

use thiserror::Error;

/// Errors that can occur in codescope-search operations
#[derive(Error, Debug)]
pub enum SearchError {
    /// Malformed input (empty batch, blank text, out-of-range parameter)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication failed (401/403). Messages are redacted upstream.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Rate limited (429), optionally carrying a Retry-After hint in seconds
    #[error("Rate limited, retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Request timed out (408/504 or client-side timeout)
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Transient network or server failure (reset, DNS, 5xx)
    #[error("Transient error: {0}")]
    Transient(String),

    /// Provider unreachable or not ready
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Embedding dimension mismatch
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Model inference failure (local provider)
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Qdrant client error
    #[error("Qdrant error: {0}")]
    Qdrant(String),

    /// Collection not found
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// Connection error
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SearchError {
    /// Whether the backoff layer should retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SearchError::RateLimited { .. }
                | SearchError::Timeout(_)
                | SearchError::Transient(_)
                | SearchError::ProviderUnavailable(_)
                | SearchError::Connection(_)
        )
    }
}

impl From<qdrant_client::QdrantError> for SearchError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        SearchError::Qdrant(err.to_string())
    }
}

impl From<candle_core::Error> for SearchError {
    fn from(err: candle_core::Error) -> Self {
        SearchError::Embedding(err.to_string())
    }
}

/// Result type for codescope-search operations
pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SearchError::RateLimited { retry_after: None }.is_retryable());
        assert!(SearchError::Timeout("t".into()).is_retryable());
        assert!(SearchError::Transient("reset".into()).is_retryable());
        assert!(SearchError::Connection("refused".into()).is_retryable());

        assert!(!SearchError::Validation("bad".into()).is_retryable());
        assert!(!SearchError::Auth("denied".into()).is_retryable());
        assert!(!SearchError::DimensionMismatch {
            expected: 768,
            actual: 1536
        }
        .is_retryable());
    }
}
