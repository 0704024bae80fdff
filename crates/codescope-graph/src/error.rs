//! Error types for codescope-graph

use thiserror::Error;

/// Errors that can occur in graph store operations
#[derive(Error, Debug)]
pub enum GraphError {
    /// Could not reach the graph database
    #[error("Graph connection failed: {0}")]
    Connection(String),

    /// A query failed to execute
    #[error("Graph query failed: {0}")]
    Query(String),

    /// A transaction could not be committed or rolled back
    #[error("Graph transaction failed: {0}")]
    Transaction(String),

    /// Node or entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input (bad depth, unknown relationship type, empty id)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Another ingestion holds the repository lock (I3)
    #[error("Ingestion already in progress for repository '{0}'")]
    IngestionInProgress(String),

    /// Repository node exists and `force` was not set
    #[error("Repository '{0}' already exists (re-run with force to replace)")]
    RepositoryExists(String),

    /// A batched write failed after retries
    #[error("Batch write failed ({context}): {message}")]
    BatchFailed {
        context: BatchContext,
        message: String,
        retryable: bool,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Where a batch failure happened, for diagnostics and retry decisions.
#[derive(Debug, Clone, Default)]
pub struct BatchContext {
    pub file_path: Option<String>,
    pub node_id: Option<String>,
    pub relationship_type: Option<String>,
}

impl std::fmt::Display for BatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(ref p) = self.file_path {
            parts.push(format!("file={p}"));
        }
        if let Some(ref n) = self.node_id {
            parts.push(format!("node={n}"));
        }
        if let Some(ref r) = self.relationship_type {
            parts.push(format!("rel={r}"));
        }
        if parts.is_empty() {
            f.write_str("unscoped")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

impl GraphError {
    /// Whether the ingestion retry budget applies.
    pub fn is_retryable(&self) -> bool {
        match self {
            GraphError::Connection(_) | GraphError::Transaction(_) => true,
            GraphError::BatchFailed { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<neo4rs::Error> for GraphError {
    fn from(err: neo4rs::Error) -> Self {
        let message = err.to_string();
        // Bolt-level connection failures are retryable; everything else is a
        // query error.
        if message.contains("connection") || message.contains("Connection") {
            GraphError::Connection(message)
        } else {
            GraphError::Query(message)
        }
    }
}

/// Result type for codescope-graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(GraphError::Connection("down".into()).is_retryable());
        assert!(GraphError::Transaction("deadlock".into()).is_retryable());
        assert!(GraphError::BatchFailed {
            context: BatchContext::default(),
            message: "m".into(),
            retryable: true
        }
        .is_retryable());
        assert!(!GraphError::Validation("bad".into()).is_retryable());
        assert!(!GraphError::RepositoryExists("r".into()).is_retryable());
        assert!(!GraphError::IngestionInProgress("r".into()).is_retryable());
    }

    #[test]
    fn batch_context_display() {
        let ctx = BatchContext {
            file_path: Some("src/a.ts".into()),
            node_id: None,
            relationship_type: Some("DEFINES".into()),
        };
        assert_eq!(ctx.to_string(), "file=src/a.ts rel=DEFINES");
        assert_eq!(BatchContext::default().to_string(), "unscoped");
    }
}
