//! Storage façade and operators
//!
//! `Storage` owns the schema, the backend and the counters every thread
//! shares. `Operator`s are the query and record surface over one thread.
//!
//! Layout:
//! - `facade`: thread creation, `branch`, `run`
//! - `operator`: submits compiled plans and record calls
//! - `options`: `StorageOptions` loaded from JSON
//! - `hook`, `solver`: collaborator traits

mod facade;
mod hook;
mod operator;
mod options;
mod solver;

pub use facade::Storage;
pub use hook::SyncHook;
pub use operator::{AtomicOps, Operator};
pub use options::{OptionsError, OptionsResult, StorageOptions};
pub use solver::{Intersection, Solver};
