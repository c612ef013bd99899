//! Operators
//!
//! An operator binds one transaction thread to the schema. Every call
//! checks its stores against the schema, builds a transaction scope and
//! submits to the thread. Writes additionally schedule the sync hook once
//! they settle successfully.
//!
//! On ATOMIC threads `Operator::atomic` collects several operations into
//! one group that commits or aborts as a whole.

use std::sync::Arc;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use super::hook::SyncHook;
use super::solver::Solver;
use crate::observability::{Logger, MetricsRegistry};
use crate::query::{Cursor, Query, QueryError};
use crate::schema::{DatabaseSchema, SchemaCatalog};
use crate::tx::{Request, TxContext, TxError, TxGroup, TxMode, TxResult, TxScope, TxThread};

/// Sync thread and the hook it runs
#[derive(Clone)]
pub(crate) struct SyncLink {
    pub(crate) thread: Arc<TxThread>,
    pub(crate) hook: Arc<dyn SyncHook>,
}

impl SyncLink {
    /// Runs the hook for a committed write and logs its failure.
    async fn notify(self, store: String, key: Value) {
        let hook = self.hook;
        let hook_store = store.clone();
        let hook_key = key.clone();
        let submitted = self.thread.submit(TxScope::write(store.as_str()), move |ctx| {
            hook.after_write(ctx, &hook_store, &hook_key)
        });
        let result = match submitted {
            Ok(request) => request.await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            Logger::warn(
                "SYNC_HOOK_FAILED",
                &[
                    ("store", &store),
                    ("key", &key.to_string()),
                    ("code", err.code()),
                    ("reason", &err.to_string()),
                ],
            );
        }
    }
}

/// Query and record surface bound to one thread
#[derive(Clone)]
pub struct Operator {
    schema: Arc<DatabaseSchema>,
    thread: Arc<TxThread>,
    sync: Option<SyncLink>,
    metrics: Arc<MetricsRegistry>,
}

impl Operator {
    pub(crate) fn new(
        schema: Arc<DatabaseSchema>,
        thread: Arc<TxThread>,
        sync: Option<SyncLink>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            schema,
            thread,
            sync,
            metrics,
        }
    }

    /// Same thread, different sync link
    pub(crate) fn with_sync(&self, sync: Option<SyncLink>) -> Self {
        Self {
            sync,
            ..self.clone()
        }
    }

    pub fn thread(&self) -> &TxThread {
        &self.thread
    }

    pub fn has_sync(&self) -> bool {
        self.sync.is_some()
    }

    fn scope<I, S>(&self, stores: I, mode: TxMode) -> TxResult<TxScope>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scope = TxScope::new(stores, mode);
        for store in scope.stores() {
            if !self.schema.has_store(store) {
                return Err(TxError::invalid_operation(format!(
                    "store {} not found",
                    store
                )));
            }
        }
        Ok(scope)
    }

    /// Runs `work` in a transaction over `stores`.
    pub fn exec<F, T>(&self, stores: &[&str], mode: TxMode, work: F) -> TxResult<Request<T>>
    where
        F: FnOnce(&mut TxContext) -> TxResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let scope = self.scope(stores.iter().copied(), mode)?;
        self.thread.submit(scope, work)
    }

    /// Runs a compiled cursor.
    pub fn fetch(&self, cursor: Cursor) -> TxResult<Request<Value>> {
        let scope = self.scope([cursor.store.clone()], TxMode::ReadOnly)?;
        self.thread.submit(scope, move |ctx| ctx.fetch(&cursor))
    }

    /// Compiles `query` to a cursor, then runs it.
    pub fn fetch_query(&self, query: &Query) -> TxResult<Request<Value>> {
        let cursor = self.compile(query.to_cursor(self.schema.as_ref()))?;
        self.fetch(cursor)
    }

    /// Compiles `query` to a statement and runs it through the backend.
    pub fn query_statement(&self, query: &Query) -> TxResult<Request<Value>> {
        let statement = self.compile(query.to_statement(self.schema.as_ref()))?;
        let scope = self.scope([statement.store.clone()], TxMode::ReadOnly)?;
        self.thread.submit(scope, move |ctx| ctx.query(&statement))
    }

    fn compile<P>(&self, plan: Result<P, QueryError>) -> TxResult<P> {
        match plan {
            Ok(plan) => {
                self.metrics.increment_plans_compiled();
                Ok(plan)
            }
            Err(err) => {
                self.metrics.increment_plans_rejected();
                Err(err.into())
            }
        }
    }

    pub fn get(&self, store: &str, key: Value) -> TxResult<Request<Option<Value>>> {
        let scope = self.scope([store], TxMode::ReadOnly)?;
        let store = store.to_string();
        self.thread.submit(scope, move |ctx| ctx.get(&store, &key))
    }

    pub fn count(&self, store: &str) -> TxResult<Request<u64>> {
        let scope = self.scope([store], TxMode::ReadOnly)?;
        let store = store.to_string();
        self.thread.submit(scope, move |ctx| ctx.count(&store))
    }

    /// Stores `value`, resolving with its primary key.
    pub fn put(&self, store: &str, value: Value, key: Option<Value>) -> TxResult<Request<Value>> {
        let scope = self.scope([store], TxMode::ReadWrite)?;
        let name = store.to_string();
        let request = self
            .thread
            .submit(scope, move |ctx| ctx.put(&name, value, key))?;
        Ok(self.after_commit(store, request, |key| Some(key.clone())))
    }

    /// Removes the record under `key`, resolving with whether it existed.
    pub fn delete(&self, store: &str, key: Value) -> TxResult<Request<bool>> {
        let scope = self.scope([store], TxMode::ReadWrite)?;
        let name = store.to_string();
        let hook_key = key.clone();
        let request = self
            .thread
            .submit(scope, move |ctx| ctx.delete(&name, &key))?;
        Ok(self.after_commit(store, request, move |removed| {
            removed.then_some(hook_key)
        }))
    }

    /// Runs every cursor in one transaction and joins their primary keys.
    pub fn scan<S: Solver>(
        &self,
        cursors: Vec<Cursor>,
        solver: S,
    ) -> TxResult<Request<Vec<Value>>> {
        if cursors.is_empty() {
            return Err(TxError::argument("scan needs at least one cursor"));
        }
        let stores: Vec<String> = cursors.iter().map(|c| c.store.clone()).collect();
        let scope = self.scope(stores, TxMode::ReadOnly)?;
        self.thread.submit(scope, move |ctx| {
            let keys = cursors
                .iter()
                .map(|cursor| ctx.keys(cursor))
                .collect::<TxResult<Vec<_>>>()?;
            Ok(solver.solve(keys))
        })
    }

    /// Runs every operation `build` issues in one all-or-nothing
    /// transaction. The group is queued once `build` returns; its value
    /// (typically the requests it issued) is handed back.
    pub fn atomic<B, R>(&self, build: B) -> TxResult<R>
    where
        B: FnOnce(&mut AtomicOps<'_>) -> TxResult<R>,
    {
        self.thread.submit_group(|group| {
            let mut ops = AtomicOps {
                operator: self,
                group,
            };
            build(&mut ops)
        })
    }

    /// Forwards a write's result and, once it succeeded, runs the sync hook
    /// for the key `written` picks out.
    fn after_commit<T, K>(&self, store: &str, request: Request<T>, written: K) -> Request<T>
    where
        T: Send + 'static,
        K: FnOnce(&T) -> Option<Value> + Send + 'static,
    {
        let link = match &self.sync {
            Some(link) => link.clone(),
            None => return request,
        };
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => return request,
        };

        let store = store.to_string();
        let (sender, receiver) = oneshot::channel();
        handle.spawn(async move {
            let result = request.await;
            let key = result.as_ref().ok().and_then(written);
            let _ = sender.send(result);
            if let Some(key) = key {
                link.notify(store, key).await;
            }
        });
        Request::new(receiver)
    }
}

/// Operations issued into one ATOMIC group
pub struct AtomicOps<'a> {
    operator: &'a Operator,
    group: &'a mut TxGroup,
}

impl AtomicOps<'_> {
    pub fn exec<F, T>(&mut self, stores: &[&str], mode: TxMode, work: F) -> TxResult<Request<T>>
    where
        F: FnOnce(&mut TxContext) -> TxResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let scope = self.operator.scope(stores.iter().copied(), mode)?;
        self.group.submit(scope, work)
    }

    pub fn put(
        &mut self,
        store: &str,
        value: Value,
        key: Option<Value>,
    ) -> TxResult<Request<Value>> {
        let scope = self.operator.scope([store], TxMode::ReadWrite)?;
        let name = store.to_string();
        let request = self
            .group
            .submit(scope, move |ctx| ctx.put(&name, value, key))?;
        Ok(self
            .operator
            .after_commit(store, request, |key| Some(key.clone())))
    }

    pub fn delete(&mut self, store: &str, key: Value) -> TxResult<Request<bool>> {
        let scope = self.operator.scope([store], TxMode::ReadWrite)?;
        let name = store.to_string();
        let hook_key = key.clone();
        let request = self
            .group
            .submit(scope, move |ctx| ctx.delete(&name, &key))?;
        Ok(self
            .operator
            .after_commit(store, request, move |removed| removed.then_some(hook_key)))
    }

    /// Operations issued so far
    pub fn len(&self) -> usize {
        self.group.len()
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty()
    }
}

impl std::fmt::Debug for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operator")
            .field("thread", &self.thread)
            .field("sync", &self.sync.is_some())
            .finish()
    }
}
