//! Error types for codescope-core

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in codescope-core operations
#[derive(Error, Debug)]
pub enum CoreError {
    /// Unsupported language or file extension
    #[error("Unsupported language for file: {0}")]
    UnsupportedLanguage(PathBuf),

    /// Tree-sitter grammar failed to load
    #[error("Failed to load grammar for {language}: {message}")]
    GrammarLoad { language: String, message: String },

    /// Tree-sitter query compilation failed
    #[error("Failed to compile query for {language}: {message}")]
    QueryCompile { language: String, message: String },

    /// File exceeds the configured size limit
    #[error("File too large: {path} ({size} bytes, limit {limit})")]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },

    /// Parsing exceeded the configured timeout
    #[error("Parse timed out after {timeout_ms}ms: {path}")]
    ParseTimeout { path: PathBuf, timeout_ms: u64 },

    /// Source could not be parsed at all
    #[error("Parse failed for {path}: {message}")]
    ParseFailed { path: PathBuf, message: String },

    /// Invalid glob pattern in scanner configuration
    #[error("Invalid exclude pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Scan root does not exist or is not a directory
    #[error("Scan root is not a directory: {0}")]
    InvalidScanRoot(PathBuf),

    /// Invalid chunker configuration
    #[error("Invalid chunker configuration: {0}")]
    InvalidChunkConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for codescope-core operations
pub type Result<T> = std::result::Result<T, CoreError>;
