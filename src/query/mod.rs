//! Query/cursor compiler
//!
//! A `QueryBuilder` accumulates store, index, ranges, direction, map,
//! reduce and window; `build()` freezes it into a `Query` which compiles
//! against a schema into either:
//! - a `Cursor` (primary range + residual filters + projection + reduction)
//! - a `Statement` (SQL text + bound parameters + client-side steps)
//!
//! Both targets evaluate ranges on non-indexed fields with the same
//! residual filter, so they admit the same rows.

mod aggregate;
mod builder;
mod compiler;
mod cursor;
mod description;
mod errors;
mod explain;
mod filters;
mod range;
mod statement;

pub use aggregate::{Fields, MapSpec, Projection, ReduceSpec, Reducer, Reduction};
pub use builder::{Direction, Query, QueryBuilder};
pub use cursor::Cursor;
pub use description::{MapClause, QueryDescription, ReduceClause, WhereClause};
pub use errors::{QueryError, QueryResult};
pub use explain::ExplainPlan;
pub use filters::{compare_keys, is_valid_key, resolve_path, ResidualFilter};
pub use range::{quote_identifier, KeyRange, Op};
pub use statement::{ClientSteps, Finalizer, Statement, ROWID_COLUMN};
