//! Transaction context handed to request callbacks

use serde_json::Value;

use super::backend::{BackendTx, Savepoint};
use super::errors::{TxError, TxResult};
use super::policy::{TxMode, TxScope};
use crate::query::{Cursor, Statement};

/// Live transaction as seen by a callback.
///
/// Every call is checked against the transaction scope: stores outside it
/// and writes under a read-only mode fail with `InvalidOperation`.
pub struct TxContext {
    tx: Box<dyn BackendTx>,
    scope: TxScope,
    seq: u64,
    thread: String,
}

impl TxContext {
    pub(crate) fn new(tx: Box<dyn BackendTx>, scope: TxScope, seq: u64, thread: String) -> Self {
        Self {
            tx,
            scope,
            seq,
            thread,
        }
    }

    pub(crate) fn into_inner(self) -> Box<dyn BackendTx> {
        self.tx
    }

    pub(crate) fn savepoint(&mut self) -> Savepoint {
        self.tx.savepoint()
    }

    pub(crate) fn rollback_to(&mut self, savepoint: Savepoint) -> TxResult<()> {
        self.tx.rollback_to(savepoint)
    }

    pub fn scope(&self) -> &TxScope {
        &self.scope
    }

    /// Transaction sequence number, unique per storage
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Label of the thread running this transaction
    pub fn thread(&self) -> &str {
        &self.thread
    }

    fn check(&self, store: &str, write: bool) -> TxResult<()> {
        if !self.scope.contains(store) {
            return Err(TxError::invalid_operation(format!(
                "store {} is outside transaction scope [{}]",
                store,
                self.scope.describe()
            )));
        }
        if write && self.scope.mode() != TxMode::ReadWrite {
            return Err(TxError::invalid_operation(format!(
                "write to {} in a readonly transaction",
                store
            )));
        }
        Ok(())
    }

    /// Runs a cursor and its post-fetch pipeline.
    pub fn fetch(&mut self, cursor: &Cursor) -> TxResult<Value> {
        self.check(&cursor.store, false)?;
        let records = self.tx.scan(cursor)?;
        Ok(cursor.evaluate(records.into_iter().map(|r| r.value)))
    }

    /// Primary keys of rows the cursor admits, in cursor order.
    pub fn keys(&mut self, cursor: &Cursor) -> TxResult<Vec<Value>> {
        self.check(&cursor.store, false)?;
        let records = self.tx.scan(cursor)?;
        Ok(records
            .into_iter()
            .filter(|r| cursor.admits(&r.value))
            .map(|r| r.key)
            .collect())
    }

    /// Runs a statement and its client-side steps.
    pub fn query(&mut self, statement: &Statement) -> TxResult<Value> {
        self.check(&statement.store, false)?;
        let rows = self.tx.query(statement)?;
        Ok(statement.finish(rows))
    }

    pub fn get(&mut self, store: &str, key: &Value) -> TxResult<Option<Value>> {
        self.check(store, false)?;
        self.tx.get(store, key)
    }

    pub fn put(&mut self, store: &str, value: Value, key: Option<Value>) -> TxResult<Value> {
        self.check(store, true)?;
        self.tx.put(store, value, key)
    }

    pub fn delete(&mut self, store: &str, key: &Value) -> TxResult<bool> {
        self.check(store, true)?;
        self.tx.delete(store, key)
    }

    pub fn count(&mut self, store: &str) -> TxResult<u64> {
        self.check(store, false)?;
        self.tx.count(store)
    }
}
