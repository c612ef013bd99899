//! Compiled cursor plan
//!
//! A cursor is backend-agnostic: the backend positions it (store, index,
//! primary range, direction) and the cursor itself evaluates everything
//! after fetch.

use serde::Serialize;
use serde_json::Value;

use super::aggregate::{Projection, Reduction};
use super::builder::Direction;
use super::filters::ResidualFilter;
use super::range::KeyRange;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cursor {
    pub store: String,
    /// Index to iterate; `None` scans the store in primary key order
    pub index: Option<String>,
    /// Unset on a full-store scan that asked for no direction
    pub direction: Option<Direction>,
    /// Range over the index (or primary key) the backend positions on
    pub key_range: Option<KeyRange>,
    /// Ranges evaluated on every fetched row
    pub filters: Vec<KeyRange>,
    pub projection: Option<Projection>,
    pub reduction: Option<Reduction>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Cursor {
    /// Full scan of a store
    pub fn new(store: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            index: None,
            direction: None,
            key_range: None,
            filters: Vec::new(),
            projection: None,
            reduction: None,
            limit: None,
            offset: None,
        }
    }

    /// Cursor over an index, optionally restricted to a range
    pub fn over_index(
        store: impl Into<String>,
        index: impl Into<String>,
        key_range: Option<KeyRange>,
    ) -> Self {
        let mut cursor = Self::new(store);
        cursor.index = Some(index.into());
        cursor.key_range = key_range;
        cursor
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Direction the backend iterates in; `Next` when unset
    pub fn iteration(&self) -> Direction {
        self.direction.unwrap_or_default()
    }

    pub fn with_filter(mut self, range: KeyRange) -> Self {
        self.filters.push(range);
        self
    }

    /// Returns true if the row passes every residual filter
    pub fn admits(&self, row: &Value) -> bool {
        ResidualFilter::matches(row, &self.filters)
    }

    /// Runs the post-fetch pipeline over rows the backend positioned:
    /// residual filters, offset, limit, projection, then reduction.
    ///
    /// Returns an array of rows, or the reduced scalar when a reduction is
    /// installed.
    pub fn evaluate<I>(&self, rows: I) -> Value
    where
        I: IntoIterator<Item = Value>,
    {
        let skip = self.offset.unwrap_or(0) as usize;
        let take = self.limit.map(|l| l as usize).unwrap_or(usize::MAX);

        let selected = rows
            .into_iter()
            .filter(|row| self.admits(row))
            .skip(skip)
            .take(take)
            .map(|row| match &self.projection {
                Some(projection) => projection.apply(&row),
                None => row,
            });

        match &self.reduction {
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
