//! Transaction scheduling error types
//!
//! Precondition variants (`Argument`, `InvalidOperation`, `NoRuntime`,
//! `Query`) are returned synchronously by submission calls. `Backend`,
//! `Aborted` and `Dropped` only ever arrive through a `Request`.

use thiserror::Error;

use crate::query::QueryError;

/// Result type for scheduling operations
pub type TxResult<T> = Result<T, TxError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    /// Malformed scheduling input
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// Request inconsistent with the thread or transaction state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Failure reported by the storage backend
    #[error("Backend error: {0}")]
    Backend(String),

    /// The transaction was rolled back
    #[error("Transaction aborted: {0}")]
    Aborted(String),

    /// The scheduler went away before settling the request
    #[error("Request dropped before completion")]
    Dropped,

    #[error("No async runtime available to schedule transactions")]
    NoRuntime,

    /// Query compilation failed before anything was scheduled
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl TxError {
    pub fn argument(reason: impl Into<String>) -> Self {
        Self::Argument(reason.into())
    }

    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation(reason.into())
    }

    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend(reason.into())
    }

    /// Returns the stable error code
    pub fn code(&self) -> &'static str {
        match self {
            TxError::Argument(_) => "QUARRY_TX_ARGUMENT",
            TxError::InvalidOperation(_) => "QUARRY_TX_INVALID_OPERATION",
            TxError::Backend(_) => "QUARRY_TX_BACKEND",
            TxError::Aborted(_) => "QUARRY_TX_ABORTED",
            TxError::Dropped => "QUARRY_TX_DROPPED",
            TxError::NoRuntime => "QUARRY_TX_NO_RUNTIME",
            TxError::Query(e) => e.code(),
        }
    }

    /// Returns true for errors raised before any backend work
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            TxError::Argument(_)
                | TxError::InvalidOperation(_)
                | TxError::NoRuntime
                | TxError::Query(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(TxError::argument("x").code(), "QUARRY_TX_ARGUMENT");
        assert_eq!(TxError::backend("x").code(), "QUARRY_TX_BACKEND");
        assert_eq!(TxError::Dropped.code(), "QUARRY_TX_DROPPED");
    }

    #[test]
    fn test_query_error_keeps_its_code() {
        let err: TxError = QueryError::invalid_operation("store name not set").into();
        assert_eq!(err.code(), "QUARRY_QUERY_INVALID_OPERATION");
        assert!(err.is_precondition());
        assert_eq!(err.to_string(), "Invalid operation: store name not set");
    }

    #[test]
    fn test_async_only_variants() {
        assert!(!TxError::Aborted("x".into()).is_precondition());
        assert!(!TxError::backend("x").is_precondition());
    }
}
