//! Transaction threads
//!
//! A thread is a named queue bound to one policy and one execution
//! strategy. Submissions are validated synchronously and queued; a
//! dispatcher task, spawned on first use, gathers queued requests into
//! batches per policy and hands each batch to the strategy.
//!
//! State machine: Idle -> Scheduled -> Active -> Completing -> Idle, or
//! Closed once `max_tx` transactions have been dispatched.
//!
//! ATOMIC work is submitted as a closed `TxGroup`: the group only reaches
//! the queue once its builder returns, which is the caller's signal that
//! the last operation of the group has been issued.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;

use super::atomic::{gather, AtomicGroup, Batch, Queued};
use super::backend::Backend;
use super::context::TxContext;
use super::errors::{TxError, TxResult};
use super::policy::{Policy, TxScope};
use super::request::{Job, Request};
use super::strategy::{ExecutionStrategy, ParallelPool, SerialQueue};
use crate::observability::{log_event, Event, MetricsRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Idle,
    Scheduled,
    Active,
    Completing,
    Closed,
}

impl ThreadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadState::Idle => "IDLE",
            ThreadState::Scheduled => "SCHEDULED",
            ThreadState::Active => "ACTIVE",
            ThreadState::Completing => "COMPLETING",
            ThreadState::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters owned by one storage façade and shared by all its threads.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    threads: Arc<AtomicU64>,
    transactions: Arc<AtomicU64>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero-based thread number
    pub fn next_thread(&self) -> u64 {
        self.threads.fetch_add(1, Ordering::SeqCst)
    }

    /// One-based transaction sequence number
    pub fn next_tx(&self) -> u64 {
        self.transactions.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Transactions begun so far
    pub fn transactions(&self) -> u64 {
        self.transactions.load(Ordering::SeqCst)
    }
}

/// Resources a thread borrows from its façade
#[derive(Clone)]
pub struct ThreadEnv {
    pub backend: Arc<dyn Backend>,
    pub counters: Counters,
    pub metrics: Arc<MetricsRegistry>,
    /// Held while a callback runs; no two callbacks of one façade overlap
    pub gate: Arc<Mutex<()>>,
    /// Bounds outstanding transactions of parallel threads
    pub permits: Arc<Semaphore>,
}

/// Construction parameters of a thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadConfig {
    pub policy: Policy,
    pub is_serial: bool,
    /// Fixed scope; requests must fall inside it
    pub scope: Option<TxScope>,
    pub max_tx: Option<u64>,
}

impl ThreadConfig {
    pub fn new(policy: Policy, is_serial: bool) -> Self {
        Self {
            policy,
            is_serial,
            scope: None,
            max_tx: None,
        }
    }

    pub fn with_scope(mut self, scope: TxScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_max_tx(mut self, max_tx: u64) -> Self {
        self.max_tx = Some(max_tx);
        self
    }
}

pub(crate) struct ThreadShared {
    label: String,
    config: ThreadConfig,
    env: ThreadEnv,
    state: Mutex<ThreadState>,
    closed: AtomicBool,
    dispatched: AtomicU64,
    in_flight: AtomicU64,
    last_seq: AtomicU64,
}

impl ThreadShared {
    fn set_state(&self, state: ThreadState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != ThreadState::Closed {
            *current = state;
        }
    }

    fn state(&self) -> ThreadState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed_error(&self) -> TxError {
        TxError::invalid_operation(format!("thread {} is closed", self.label))
    }

    /// Request scope must be non-empty and inside the fixed scope, if any.
    fn check_scope(&self, scope: &TxScope) -> TxResult<()> {
        if scope.stores().is_empty() {
            return Err(TxError::argument("request scope names no store"));
        }
        if let Some(fixed) = &self.config.scope {
            if !fixed.covers(scope) {
                return Err(TxError::invalid_operation(format!(
                    "request [{}] {} is outside thread {} scope [{}] {}",
                    scope.describe(),
                    scope.mode(),
                    self.label,
                    fixed.describe(),
                    fixed.mode()
                )));
            }
        }
        Ok(())
    }

    /// Called once per batch after it settled.
    fn finish_batch(&self) {
        let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        if remaining > 0 {
            return;
        }
        if self.closed.load(Ordering::SeqCst) {
            self.set_state(ThreadState::Closed);
            log_event(
                Event::ThreadClosed,
                &[
                    ("thread", &self.label),
                    ("transactions", &self.dispatched.load(Ordering::SeqCst).to_string()),
                ],
            );
        } else {
            self.set_state(ThreadState::Idle);
        }
    }
}

/// Runs one batch in one backend transaction and settles every request.
pub(crate) async fn execute(shared: Arc<ThreadShared>, batch: Batch) {
    let Batch {
        scope,
        jobs,
        atomic,
    } = batch;
    let env = &shared.env;

    let tx = match env.backend.begin(&scope).await {
        Ok(tx) => tx,
        Err(err) => {
            log_event(
                Event::TxAbort,
                &[
                    ("thread", &shared.label),
                    ("stores", &scope.describe()),
                    ("reason", &err.to_string()),
                ],
            );
            for job in jobs {
                env.metrics.increment_request_failures();
                job.reject(err.clone());
            }
            shared.finish_batch();
            return;
        }
    };

    let seq = env.counters.next_tx();
    let seq_text = seq.to_string();
    shared.last_seq.store(seq, Ordering::SeqCst);
    shared.set_state(ThreadState::Active);
    env.metrics.increment_tx_begun();
    log_event(
        Event::TxBegin,
        &[
            ("thread", &shared.label),
            ("seq", &seq_text),
            ("stores", &scope.describe()),
            ("mode", scope.mode().as_str()),
            ("requests", &jobs.len().to_string()),
        ],
    );

    let mut ctx = TxContext::new(tx, scope, seq, shared.label.clone());
    let mut outcomes = Vec::with_capacity(jobs.len());
    let mut abort_reason: Option<TxError> = None;
    let mut pending = jobs.into_iter();

    for job in pending.by_ref() {
        let mark = ctx.savepoint();
        let outcome = {
            let _gate = env.gate.lock().unwrap_or_else(PoisonError::into_inner);
            job.unit.run(&mut ctx)
        };
        let failure = outcome.error.clone();
        outcomes.push(outcome);
        match failure {
            Some(err) if atomic => {
                abort_reason = Some(err);
                break;
            }
            // A failed request leaves no writes for its siblings to commit
            Some(_) => {
                if let Err(err) = ctx.rollback_to(mark) {
                    abort_reason = Some(err);
                    break;
                }
            }
            None => {}
        }
    }
    // Requests a failure kept from running
    let skipped: Vec<Job> = pending.collect();

    // Nothing left worth committing
    if abort_reason.is_none() && outcomes.iter().all(|o| o.error.is_some()) {
        abort_reason = outcomes.first().and_then(|o| o.error.clone());
    }

    shared.set_state(ThreadState::Completing);
    let tx = ctx.into_inner();
    let result = match abort_reason {
        Some(err) => {
            tx.abort();
            Err(TxError::Aborted(err.to_string()))
        }
        None => tx.commit().await,
    };

    match &result {
        Ok(()) => {
            env.metrics.increment_tx_committed();
            log_event(
                Event::TxComplete,
                &[("thread", &shared.label), ("seq", &seq_text)],
            );
        }
        Err(err) => {
            env.metrics.increment_tx_aborted();
            log_event(
                Event::TxAbort,
                &[
                    ("thread", &shared.label),
                    ("seq", &seq_text),
                    ("reason", &err.to_string()),
                ],
            );
        }
    }

    for outcome in outcomes {
        if outcome.error.is_some() || result.is_err() {
            env.metrics.increment_request_failures();
        }
        outcome.settle(result.clone());
    }
    let skipped_error = match &result {
        Err(err) => err.clone(),
        Ok(()) => TxError::Aborted("transaction settled before request ran".to_string()),
    };
    for job in skipped {
        env.metrics.increment_request_failures();
        job.reject(skipped_error.clone());
    }

    shared.finish_batch();
}

async fn dispatch_loop(
    shared: Arc<ThreadShared>,
    mut queue: UnboundedReceiver<Queued>,
    strategy: Arc<dyn ExecutionStrategy>,
) {
    let mut held: Option<Queued> = None;

    loop {
        let first = match held.take() {
            Some(queued) => queued,
            None => match queue.recv().await {
                Some(queued) => queued,
                None => break,
            },
        };

        let batch = gather(
            shared.config.policy,
            shared.config.scope.as_ref(),
            first,
            &mut queue,
            &mut held,
        );

        let dispatched = shared.dispatched.fetch_add(1, Ordering::SeqCst) + 1;
        let last = shared
            .config
            .max_tx
            .map(|max| dispatched >= max)
            .unwrap_or(false);
        if last {
            shared.closed.store(true, Ordering::SeqCst);
        }

        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        strategy.dispatch(batch, Arc::clone(&shared)).await;

        if last {
            break;
        }
    }

    // Anything still queued after the limit can no longer run
    queue.close();
    if let Some(queued) = held {
        queued.reject(shared.closed_error());
    }
    while let Ok(queued) = queue.try_recv() {
        queued.reject(shared.closed_error());
    }
}

/// Requests collected for one ATOMIC transaction.
///
/// Built inside `TxThread::submit_group`; nothing is queued before the
/// builder returns, so the group always commits or aborts as one.
pub struct TxGroup {
    shared: Arc<ThreadShared>,
    group: Option<AtomicGroup>,
}

impl TxGroup {
    /// Adds `work` to the group. The returned request settles with the
    /// group's transaction.
    pub fn submit<F, T>(&mut self, scope: TxScope, work: F) -> TxResult<Request<T>>
    where
        F: FnOnce(&mut TxContext) -> TxResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.shared.check_scope(&scope)?;
        let (job, request) = Job::new(scope, work);
        self.group = Some(match self.group.take() {
            Some(mut group) => {
                group.join(job);
                group
            }
            None => AtomicGroup::new(job),
        });
        Ok(request)
    }

    pub fn len(&self) -> usize {
        self.group.as_ref().map(AtomicGroup::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Named transaction queue
pub struct TxThread {
    shared: Arc<ThreadShared>,
    strategy: Arc<dyn ExecutionStrategy>,
    sender: UnboundedSender<Queued>,
    receiver: Mutex<Option<UnboundedReceiver<Queued>>>,
}

impl TxThread {
    /// Creates a thread. Every (serial | parallel) x (standard | atomic)
    /// combination goes through here; the policy picks the grouping, the
    /// serial flag picks the strategy.
    pub fn new(config: ThreadConfig, env: ThreadEnv) -> Self {
        let label = format!("T{}", env.counters.next_thread());
        let strategy: Arc<dyn ExecutionStrategy> = if config.is_serial {
            Arc::new(SerialQueue)
        } else {
            Arc::new(ParallelPool::new(Arc::clone(&env.permits)))
        };

        env.metrics.increment_threads();
        log_event(
            Event::ThreadCreated,
            &[
                ("thread", &label),
                ("policy", config.policy.as_str()),
                ("serial", if strategy.is_serial() { "true" } else { "false" }),
            ],
        );

        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(ThreadShared {
                label,
                config,
                env,
                state: Mutex::new(ThreadState::Idle),
                closed: AtomicBool::new(false),
                dispatched: AtomicU64::new(0),
                in_flight: AtomicU64::new(0),
                last_seq: AtomicU64::new(0),
            }),
            strategy,
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn policy(&self) -> Policy {
        self.shared.config.policy
    }

    pub fn is_serial(&self) -> bool {
        self.strategy.is_serial()
    }

    /// Fixed scope, if the thread was created with one
    pub fn scope(&self) -> Option<&TxScope> {
        self.shared.config.scope.as_ref()
    }

    pub fn state(&self) -> ThreadState {
        self.shared.state()
    }

    /// Sequence number of the latest transaction this thread began, 0 if none
    pub fn tx_no(&self) -> u64 {
        self.shared.last_seq.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Queues `work` to run inside a transaction covering `scope`.
    ///
    /// Fails synchronously if the thread is closed, the scope is empty or
    /// outside the thread's fixed scope, or no runtime is available.
    pub fn submit<F, T>(&self, scope: TxScope, work: F) -> TxResult<Request<T>>
    where
        F: FnOnce(&mut TxContext) -> TxResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(self.shared.closed_error());
        }
        self.shared.check_scope(&scope)?;

        let handle = Handle::try_current().map_err(|_| TxError::NoRuntime)?;
        self.ensure_dispatcher(&handle);

        let stores = scope.describe();
        let (job, request) = Job::new(scope, work);
        self.enqueue(Queued::Job(job))?;

        self.shared.env.metrics.increment_requests();
        log_event(
            Event::RequestScheduled,
            &[("thread", &self.shared.label), ("stores", &stores)],
        );
        Ok(request)
    }

    /// Queues a group of requests that commits or aborts as one
    /// transaction over the union of their stores.
    ///
    /// `build` adds requests through `TxGroup::submit`; the group is
    /// queued when it returns. If `build` fails nothing is queued and the
    /// requests it created resolve as dropped. Only ATOMIC threads accept
    /// groups.
    pub fn submit_group<B, R>(&self, build: B) -> TxResult<R>
    where
        B: FnOnce(&mut TxGroup) -> TxResult<R>,
    {
        if self.is_closed() {
            return Err(self.shared.closed_error());
        }
        if self.shared.config.policy != Policy::Atomic {
            return Err(TxError::invalid_operation(format!(
                "thread {} is {}, groups need an atomic thread",
                self.shared.label,
                self.shared.config.policy.as_str()
            )));
        }
        let handle = Handle::try_current().map_err(|_| TxError::NoRuntime)?;

        let mut builder = TxGroup {
            shared: Arc::clone(&self.shared),
            group: None,
        };
        let value = build(&mut builder)?;
        let group = builder
            .group
            .ok_or_else(|| TxError::argument("atomic group has no request"))?;

        let size = group.len();
        let stores = group.scope().describe();
        self.ensure_dispatcher(&handle);
        self.enqueue(Queued::Group(group))?;

        for _ in 0..size {
            self.shared.env.metrics.increment_requests();
        }
        log_event(
            Event::RequestScheduled,
            &[
                ("thread", &self.shared.label),
                ("stores", &stores),
                ("requests", &size.to_string()),
            ],
        );
        Ok(value)
    }

    fn enqueue(&self, queued: Queued) -> TxResult<()> {
        if let Err(unsent) = self.sender.send(queued) {
            unsent.0.reject(self.shared.closed_error());
            return Err(self.shared.closed_error());
        }
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *state == ThreadState::Idle {
            *state = ThreadState::Scheduled;
        }
        Ok(())
    }

    fn ensure_dispatcher(&self, handle: &Handle) {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(queue) = receiver {
            handle.spawn(dispatch_loop(
                Arc::clone(&self.shared),
                queue,
                Arc::clone(&self.strategy),
            ));
        }
    }
}

impl fmt::Debug for TxThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxThread")
            .field("label", &self.shared.label)
            .field("policy", &self.shared.config.policy)
            .field("serial", &self.strategy.is_serial())
            .field("state", &self.state())
            .finish()
    }
}
