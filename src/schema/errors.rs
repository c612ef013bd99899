//! Schema error types

use thiserror::Error;

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while loading or validating a database schema
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error("Malformed schema at {location}: {reason}")]
    Malformed { location: String, reason: String },

    #[error("Duplicate store: {0}")]
    DuplicateStore(String),

    #[error("Duplicate index '{index}' in store '{store}'")]
    DuplicateIndex { store: String, index: String },
}

impl SchemaError {
    /// Create a malformed schema error
    pub fn malformed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            SchemaError::Malformed { .. } => "QUARRY_SCHEMA_MALFORMED",
            SchemaError::DuplicateStore(_) => "QUARRY_SCHEMA_DUPLICATE_STORE",
            SchemaError::DuplicateIndex { .. } => "QUARRY_SCHEMA_DUPLICATE_INDEX",
        }
    }
}
