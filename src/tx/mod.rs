//! Transaction scheduling
//!
//! Requests are queued on threads. Each thread groups queued requests
//! into backend transactions according to its policy, and runs them
//! either one at a time or concurrently.
//!
//! Flow: `TxThread::submit` -> dispatcher -> `gather` -> strategy ->
//! `execute` -> `Request` settles.

mod atomic;
mod backend;
mod context;
mod errors;
mod memory;
mod policy;
mod request;
mod strategy;
mod thread;

pub use backend::{Backend, BackendFuture, BackendTx, Record, Savepoint};
pub use context::TxContext;
pub use errors::{TxError, TxResult};
pub use memory::MemoryBackend;
pub use policy::{Policy, TxMode, TxScope};
pub use request::Request;
pub use thread::{Counters, ThreadConfig, ThreadEnv, ThreadState, TxGroup, TxThread};
