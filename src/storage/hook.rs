//! Post-write synchronization hook

use serde_json::Value;

use crate::tx::{TxContext, TxResult};

/// Runs on the sync thread after a write issued through an `Operator`
/// committed. The context is a read-write transaction over `store`.
pub trait SyncHook: Send + Sync {
    fn after_write(&self, ctx: &mut TxContext, store: &str, key: &Value) -> TxResult<()>;
}

impl<F> SyncHook for F
where
    F: Fn(&mut TxContext, &str, &Value) -> TxResult<()> + Send + Sync,
{
    fn after_write(&self, ctx: &mut TxContext, store: &str, key: &Value) -> TxResult<()> {
        self(ctx, store, key)
    }
}
