//! quarry - query compiler and transaction scheduler
//!
//! - `query`: fluent and JSON query construction, compiled to cursor or
//!   SQL statement plans
//! - `tx`: transaction threads that group requests per policy
//! - `storage`: the façade tying schema, backend and threads together
//! - `schema`: store and index declarations

pub mod cli;
pub mod observability;
pub mod query;
pub mod schema;
pub mod storage;
pub mod tx;
