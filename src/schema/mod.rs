//! Schema collaborator
//!
//! Exposes store and index existence to the query compiler and the default
//! store scope to the transaction scheduler. Loading, validation of names and
//! JSON (de)serialization live here; versioning and migration do not.

mod errors;
mod loader;
mod types;

pub use errors::{SchemaError, SchemaResult};
pub use loader::SchemaLoader;
pub use types::{DatabaseSchema, IndexSchema, SchemaCatalog, StoreSchema};
