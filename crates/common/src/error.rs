//! Common error types for repolens.

use thiserror::Error;

/// Common error type for repolens operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid repository URL '{url}': {reason}")]
    InvalidRepoUrl { url: String, reason: String },

    #[error("Command execution failed: {cmd} - {reason}")]
    CommandExecution { cmd: String, reason: String },

    #[error("Command timed out after {seconds}s: {cmd}")]
    CommandTimeout { cmd: String, seconds: u64 },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Unparseable response: {0}")]
    Parse(String),

    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias using common Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}
