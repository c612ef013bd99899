//! Compiled statement plan for row-oriented backends
//!
//! Carries the generated SQL text with its bound parameters, the structured
//! parts the text was generated from, and the client-side steps that run on
//! the returned rows.

use serde::Serialize;
use serde_json::Value;

use super::aggregate::{Projection, Reduction};
use super::builder::Direction;
use super::filters::ResidualFilter;
use super::range::KeyRange;

/// Reserved row identity column used when no ordering field exists
pub const ROWID_COLUMN: &str = "_ROWID_";

/// Turns the raw result rows of an aggregate statement into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Finalizer {
    /// First column of the first row
    TakeFirst,
}

impl Finalizer {
    pub fn apply(&self, rows: &[Value]) -> Value {
        match self {
            Finalizer::TakeFirst => match rows.first() {
                Some(Value::Object(columns)) => {
                    columns.values().next().cloned().unwrap_or(Value::Null)
                }
                Some(Value::Array(columns)) => columns.first().cloned().unwrap_or(Value::Null),
                Some(scalar) => scalar.clone(),
                None => Value::Null,
            },
        }
    }
}

/// Steps evaluated on returned rows rather than by the backend.
///
/// When residual filters exist the aggregate, limit and offset move here so
/// both compile targets admit the same rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientSteps {
    pub filters: Vec<KeyRange>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub projection: Option<Projection>,
    pub reduction: Option<Reduction>,
    pub finalizer: Option<Finalizer>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    pub store: String,
    /// Indexed ranges that became `WHERE` clauses, in clause order
    pub bound_ranges: Vec<KeyRange>,
    /// Unquoted `ORDER BY` column
    pub order_by: String,
    pub direction: Direction,
    pub distinct: bool,
    /// Columns of the `SELECT` list; empty selects whole rows
    pub columns: Vec<String>,
    /// Aggregate evaluated by the backend
    pub aggregate: Option<Reduction>,
    /// Limit/offset evaluated by the backend
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub client: ClientSteps,
}

impl Statement {
    /// Applies the client-side steps to the rows a backend returned.
    pub fn finish(&self, rows: Vec<Value>) -> Value {
        let steps = &self.client;
        if let Some(finalizer) = steps.finalizer {
            return finalizer.apply(&rows);
        }

        let skip = steps.offset.unwrap_or(0) as usize;
        let take = steps.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let selected = rows
            .into_iter()
            .filter(|row| ResidualFilter::matches(row, &steps.filters))
            .skip(skip)
            .take(take)
            .map(|row| match &steps.projection {
                Some(projection) => projection.apply(&row),
                None => row,
            });

        match &steps.reduction {
            Some(reduction) => {
                let mut reducer = reduction.reducer();
                for row in selected {
                    reducer.feed(&row);
                }
                reducer.finish()
            }
            None => Value::Array(selected.collect()),
        }
    }
}
