//! Error types for the MCP server

use thiserror::Error;

/// Result type for MCP server operations
pub type Result<T> = std::result::Result<T, ServeError>;

/// Errors that can occur while serving MCP
#[derive(Error, Debug)]
pub enum ServeError {
    /// Session capacity reached
    #[error("TOO_MANY_SESSIONS: active session limit reached ({0})")]
    TooManySessions(usize),

    /// Session id not known
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A concurrent update is already tracked for the repository
    #[error("An update job is already running for repository '{0}'")]
    JobAlreadyRunning(String),

    /// Job id not known
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Invalid tool parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// HTTP transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
