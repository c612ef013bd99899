//! Storage adapter contract
//!
//! A backend opens transactions over a scope. Inside a transaction every
//! operation is synchronous; only `begin` and `commit` suspend.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use super::errors::TxResult;
use super::policy::TxScope;
use crate::query::{Cursor, Statement};

/// Boxed future returned by backend transaction boundaries
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = TxResult<T>> + Send + 'a>>;

/// Row yielded by a positioned cursor
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Primary key
    pub key: Value,
    pub value: Value,
}

/// Position in a transaction's write history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(pub usize);

/// Trait for storage adapters
pub trait Backend: Send + Sync {
    /// Opens a transaction over `scope`. Unknown stores fail here.
    fn begin(&self, scope: &TxScope) -> BackendFuture<'_, Box<dyn BackendTx>>;
}

/// Live transaction handed out by `Backend::begin`.
pub trait BackendTx: Send {
    /// Rows admitted by the cursor's index and primary range, in cursor
    /// order. Residual filters are the caller's job.
    fn scan(&mut self, cursor: &Cursor) -> TxResult<Vec<Record>>;

    /// Raw result rows of a statement, before client-side steps.
    fn query(&mut self, statement: &Statement) -> TxResult<Vec<Value>>;

    fn get(&mut self, store: &str, key: &Value) -> TxResult<Option<Value>>;

    /// Stores `value`, returning its primary key.
    fn put(&mut self, store: &str, value: Value, key: Option<Value>) -> TxResult<Value>;

    /// Returns true if a record was removed
    fn delete(&mut self, store: &str, key: &Value) -> TxResult<bool>;

    fn count(&mut self, store: &str) -> TxResult<u64>;

    /// Marks the current point so later writes can be undone alone.
    fn savepoint(&mut self) -> Savepoint;

    /// Undoes every write made after `savepoint`; the transaction stays open.
    fn rollback_to(&mut self, savepoint: Savepoint) -> TxResult<()>;

    /// Makes every write visible at once.
    fn commit(self: Box<Self>) -> BackendFuture<'static, ()>;

    /// Discards every write.
    fn abort(self: Box<Self>);
}
