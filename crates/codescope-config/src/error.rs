//! Configuration error types

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: PathBuf, message: String },

    /// Config file is not valid TOML
    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    /// A setting failed validation
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
