//! CLI-specific error types

use std::io;

use thiserror::Error;

use crate::schema::SchemaError;

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    /// Schema file missing or malformed
    #[error("{0}")]
    Schema(#[from] SchemaError),

    /// stdin/stdout failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Request on stdin is not a usable JSON object
    #[error("Invalid request: {0}")]
    Request(String),
}

impl CliError {
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn request_error(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }

    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            CliError::Schema(_) => "QUARRY_CLI_SCHEMA_ERROR",
            CliError::Io(_) => "QUARRY_CLI_IO_ERROR",
            CliError::Request(_) => "QUARRY_CLI_REQUEST_ERROR",
        }
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::request_error(format!("JSON error: {}", e))
    }
}
