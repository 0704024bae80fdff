//! Error types for codescope-index

use thiserror::Error;

use codescope_core::CoreError;
use codescope_graph::GraphError;
use codescope_search::SearchError;

/// Errors that can occur while indexing or updating repositories
#[derive(Error, Debug)]
pub enum IndexError {
    /// Scanner/chunker/parser failure
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Embedding or vector store failure
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Graph store failure
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A git invocation failed
    #[error("git {op} failed: {message}")]
    Git { op: String, message: String },

    /// Repository catalog could not be read or written
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Repository is not in the catalog
    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    /// Repository already indexed and `force` was not set
    #[error("Repository '{0}' already exists (re-run with --force to replace)")]
    RepositoryExists(String),

    /// Another index/update operation holds the repository lock (I3)
    #[error("Operation already in progress for repository '{0}'")]
    OperationInProgress(String),

    /// Repository URL could not be parsed into a name
    #[error("Invalid repository URL: {0}")]
    InvalidUrl(String),

    /// Watcher failure
    #[error("Watcher error: {0}")]
    Watcher(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IndexError {
    pub fn git(op: impl Into<String>, message: impl Into<String>) -> Self {
        IndexError::Git {
            op: op.into(),
            message: message.into(),
        }
    }

    /// Whether retrying the whole operation may help.
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexError::Search(e) => e.is_retryable(),
            IndexError::Graph(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for codescope-index operations
pub type Result<T> = std::result::Result<T, IndexError>;
