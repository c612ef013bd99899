//! Query compiler error types
//!
//! Error codes:
//! - QUARRY_QUERY_ARGUMENT (malformed builder input)
//! - QUARRY_QUERY_INVALID_OPERATION (query inconsistent with the schema)
//! - QUARRY_QUERY_UNSUPPORTED (map/reduce the target cannot lower)
//! - QUARRY_QUERY_NOT_IMPLEMENTED (raw statement text)
//!
//! Every variant is raised synchronously, at the call that introduced the
//! defect or at compile time, never through a deferred result.

use thiserror::Error;

/// Result type for query building and compilation
pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Malformed builder input
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Structurally valid query against an inconsistent schema
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Map/reduce combination the requested target cannot lower
    #[error("Unsupported plan: {0}")]
    Unsupported(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl QueryError {
    pub fn argument(reason: impl Into<String>) -> Self {
        Self::Argument(reason.into())
    }

    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation(reason.into())
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported(reason.into())
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Argument(_) => "QUARRY_QUERY_ARGUMENT",
            QueryError::InvalidOperation(_) => "QUARRY_QUERY_INVALID_OPERATION",
            QueryError::Unsupported(_) => "QUARRY_QUERY_UNSUPPORTED",
            QueryError::NotImplemented(_) => "QUARRY_QUERY_NOT_IMPLEMENTED",
        }
    }

    /// Human-readable message without the variant prefix
    pub fn message(&self) -> &str {
        match self {
            QueryError::Argument(m)
            | QueryError::InvalidOperation(m)
            | QueryError::Unsupported(m)
            | QueryError::NotImplemented(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(QueryError::argument("x").code(), "QUARRY_QUERY_ARGUMENT");
        assert_eq!(
            QueryError::invalid_operation("x").code(),
            "QUARRY_QUERY_INVALID_OPERATION"
        );
        assert_eq!(QueryError::unsupported("x").code(), "QUARRY_QUERY_UNSUPPORTED");
        assert_eq!(
            QueryError::NotImplemented("x".into()).code(),
            "QUARRY_QUERY_NOT_IMPLEMENTED"
        );
    }

    #[test]
    fn test_message_strips_prefix() {
        let err = QueryError::invalid_operation("store: t9 not found");
        assert_eq!(err.message(), "store: t9 not found");
        assert_eq!(err.to_string(), "Invalid operation: store: t9 not found");
    }
}
