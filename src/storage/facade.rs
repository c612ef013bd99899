//! Storage façade
//!
//! Owns the schema, the backend and the per-storage counters. Hands out
//! transaction threads and operators over them.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::hook::SyncHook;
use super::operator::{Operator, SyncLink};
use super::options::{OptionsResult, StorageOptions};
use crate::observability::{
    log_event, Event, MetricsRegistry, MetricsSnapshot, ObservationScope, Severity,
};
use crate::schema::{DatabaseSchema, SchemaCatalog};
use crate::tx::{
    Backend, Counters, Policy, Request, ThreadConfig, ThreadEnv, TxContext, TxError, TxMode,
    TxResult, TxScope, TxThread,
};

/// Positional arguments `run` accepts after the callback
const RUN_MAX_ARGS: usize = 2;

pub struct Storage {
    id: Uuid,
    schema: Arc<DatabaseSchema>,
    options: StorageOptions,
    env: ThreadEnv,
    metrics: Arc<MetricsRegistry>,
    sync_thread: Option<Arc<TxThread>>,
    hook: Option<Arc<dyn SyncHook>>,
    operator: Operator,
}

impl Storage {
    /// Opens a storage over `backend`.
    ///
    /// Creates the default operator from `options`, and a parallel ATOMIC
    /// sync thread when `sync_hook` is enabled.
    pub fn new(
        schema: DatabaseSchema,
        options: StorageOptions,
        backend: Arc<dyn Backend>,
    ) -> OptionsResult<Self> {
        options.validate()?;

        let id = Uuid::new_v4();
        let id_text = id.to_string();
        let stores = schema.store_names().join(",");
        let scope = ObservationScope::with_fields(
            "STORAGE_OPEN",
            Severity::Trace,
            &[("storage_id", &id_text), ("stores", &stores)],
        );

        let schema = Arc::new(schema);
        let metrics = Arc::new(MetricsRegistry::new());
        let env = ThreadEnv {
            backend,
            counters: Counters::new(),
            metrics: Arc::clone(&metrics),
            gate: Arc::new(Mutex::new(())),
            permits: Arc::new(Semaphore::new(options.max_parallel)),
        };

        let sync_thread = options.sync_hook.then(|| {
            Arc::new(TxThread::new(
                ThreadConfig::new(Policy::Atomic, false),
                env.clone(),
            ))
        });
        let thread = TxThread::new(
            ThreadConfig::new(options.policy, options.is_serial),
            env.clone(),
        );
        let operator = Operator::new(
            Arc::clone(&schema),
            Arc::new(thread),
            None,
            Arc::clone(&metrics),
        );

        log_event(
            Event::StorageOpened,
            &[
                ("storage_id", &id_text),
                ("stores", &stores),
                ("policy", options.policy.as_str()),
                ("serial", if options.is_serial { "true" } else { "false" }),
                ("sync", if options.sync_hook { "true" } else { "false" }),
            ],
        );
        scope.complete();

        Ok(Self {
            id,
            schema,
            options,
            env,
            metrics,
            sync_thread,
            hook: None,
            operator,
        })
    }

    /// Registers the hook run after operator writes. Has no effect unless
    /// the storage was opened with `sync_hook` enabled.
    pub fn set_sync_hook(&mut self, hook: Arc<dyn SyncHook>) {
        self.hook = Some(hook);
        let link = self.sync_link();
        self.operator = self.operator.with_sync(link);
    }

    fn sync_link(&self) -> Option<SyncLink> {
        match (&self.sync_thread, &self.hook) {
            (Some(thread), Some(hook)) => Some(SyncLink {
                thread: Arc::clone(thread),
                hook: Arc::clone(hook),
            }),
            _ => None,
        }
    }

    /// Identifies this storage in log lines
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Default operator
    pub fn operator(&self) -> &Operator {
        &self.operator
    }

    pub fn sync_thread(&self) -> Option<&TxThread> {
        self.sync_thread.as_deref()
    }

    /// Transactions begun across every thread of this storage
    pub fn tx_no(&self) -> u64 {
        self.env.counters.transactions()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Creates a thread.
    ///
    /// With store names or a mode the thread gets a fixed scope (all stores
    /// when only a mode is given); ALL threads always get one.
    pub fn new_tx_queue(
        &self,
        policy: Policy,
        is_serial: bool,
        store_names: Option<&[&str]>,
        mode: Option<TxMode>,
        max_tx: Option<u64>,
    ) -> TxResult<TxThread> {
        let mut config = ThreadConfig::new(policy, is_serial);

        if let Some(max_tx) = max_tx {
            if max_tx == 0 {
                return Err(TxError::argument("max_tx must be > 0"));
            }
            config = config.with_max_tx(max_tx);
        }

        if store_names.is_some() || mode.is_some() || policy == Policy::All {
            let names = match store_names {
                Some([]) => return Err(TxError::argument("store names must not be empty")),
                Some(names) => names.iter().map(|s| s.to_string()).collect(),
                None => self.schema.store_names(),
            };
            for name in &names {
                if !self.schema.has_store(name) {
                    return Err(TxError::invalid_operation(format!("store {} not found", name)));
                }
            }
            config = config.with_scope(TxScope::new(names, mode.unwrap_or_default()));
        }

        Ok(TxThread::new(config, self.env.clone()))
    }

    /// Operator over a fresh thread. `policy` and `mode` are parsed from
    /// their text names.
    pub fn branch(
        &self,
        policy: &str,
        is_serial: bool,
        store_names: Option<&[&str]>,
        mode: Option<&str>,
        max_tx: Option<u64>,
    ) -> TxResult<Operator> {
        let policy = Policy::parse(policy)?;
        let mode = mode.map(TxMode::parse).transpose()?;
        let thread = self.new_tx_queue(policy, is_serial, store_names, mode, max_tx)?;
        Ok(Operator::new(
            Arc::clone(&self.schema),
            Arc::new(thread),
            self.sync_link(),
            Arc::clone(&self.metrics),
        ))
    }

    /// Runs `work` in a dedicated transaction and resolves with its
    /// sequence number once committed.
    ///
    /// Store names default to every store, mode to `readonly`.
    pub fn run<F>(
        &self,
        work: F,
        store_names: Option<&[&str]>,
        mode: Option<&str>,
    ) -> TxResult<Request<u64>>
    where
        F: FnOnce(&mut TxContext) -> TxResult<()> + Send + 'static,
    {
        let mode = match mode {
            Some(mode) => TxMode::parse(mode)?,
            None => TxMode::ReadOnly,
        };
        let thread = self.new_tx_queue(Policy::All, false, store_names, Some(mode), Some(1))?;
        let scope = thread
            .scope()
            .cloned()
            .ok_or_else(|| TxError::invalid_operation("run thread has no scope"))?;

        thread.submit(scope, move |ctx| {
            work(ctx)?;
            Ok(ctx.seq())
        })
    }

    /// `run` with loosely typed trailing arguments: `[store_names, mode]`,
    /// either of which may be `null`.
    pub fn run_dynamic<F>(&self, work: F, args: &[Value]) -> TxResult<Request<u64>>
    where
        F: FnOnce(&mut TxContext) -> TxResult<()> + Send + 'static,
    {
        if args.len() > RUN_MAX_ARGS {
            return Err(TxError::argument(format!(
                "too many input arguments, run accepts not more than {} input arguments, but {} found",
                RUN_MAX_ARGS + 1,
                args.len() + 1
            )));
        }

        let store_names: Option<Vec<String>> = match args.first() {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| {
                                TxError::argument(format!("invalid store name: {}", item))
                            })
                    })
                    .collect::<TxResult<_>>()?,
            ),
            Some(Value::String(name)) => Some(vec![name.clone()]),
            Some(other) => {
                return Err(TxError::argument(format!("invalid store names: {}", other)))
            }
        };
        let mode = match args.get(1) {
            None | Some(Value::Null) => None,
            Some(Value::String(mode)) => Some(mode.as_str()),
            Some(other) => return Err(TxError::argument(format!("invalid mode: {}", other))),
        };

        let names: Option<Vec<&str>> = store_names
            .as_ref()
            .map(|names| names.iter().map(String::as_str).collect());
        self.run(work, names.as_deref(), mode)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("id", &self.id)
            .field("stores", &self.schema.store_names())
            .field("options", &self.options)
            .field("operator", &self.operator)
            .finish()
    }
}
