//! Fluent query builder and the frozen `Query` it produces
//!
//! Fallible builder calls validate before touching state, so a rejected
//! call leaves the builder exactly as it was.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::aggregate::{Fields, MapSpec, ReduceSpec};
use super::errors::{QueryError, QueryResult};
use super::range::{KeyRange, Op};

/// Cursor scan direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Next,
    NextUnique,
    Prev,
    PrevUnique,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Next => "next",
            Direction::NextUnique => "nextunique",
            Direction::Prev => "prev",
            Direction::PrevUnique => "prevunique",
        }
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, Direction::NextUnique | Direction::PrevUnique)
    }

    pub fn is_reverse(&self) -> bool {
        matches!(self, Direction::Prev | Direction::PrevUnique)
    }

    fn from_flags(reverse: bool, unique: bool) -> Self {
        match (reverse, unique) {
            (false, false) => Direction::Next,
            (false, true) => Direction::NextUnique,
            (true, false) => Direction::Prev,
            (true, true) => Direction::PrevUnique,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable query description. Compilation is a pure function of a
/// `Query` and a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub(crate) store: String,
    pub(crate) index: Option<String>,
    pub(crate) direction: Option<Direction>,
    pub(crate) ranges: Vec<KeyRange>,
    pub(crate) map: Option<MapSpec>,
    pub(crate) reduce: Option<ReduceSpec>,
    pub(crate) limit: Option<u64>,
    pub(crate) offset: Option<u64>,
    pub(crate) sql: String,
}

impl Query {
    /// Starts an empty builder
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    /// Ranges in the order they were added
    pub fn ranges(&self) -> &[KeyRange] {
        &self.ranges
    }

    pub fn map(&self) -> Option<&MapSpec> {
        self.map.as_ref()
    }

    pub fn reduce(&self) -> Option<&ReduceSpec> {
        self.reduce.as_ref()
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Raw statement text, empty when none was given
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Mutable builder for `Query`.
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    store: String,
    index: Option<String>,
    direction: Option<Direction>,
    ranges: Vec<KeyRange>,
    map: Option<MapSpec>,
    reduce: Option<ReduceSpec>,
    limit: Option<u64>,
    offset: Option<u64>,
    sql: String,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder carrying raw statement text. Statement compilation of such a
    /// query always fails because statement parsing is not implemented.
    pub fn from_sql(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    /// Sets the target store
    pub fn from(&mut self, store: impl Into<String>) -> &mut Self {
        self.store = store.into();
        self
    }

    /// Sets the index to scan
    pub fn order(&mut self, index: impl Into<String>) -> &mut Self {
        self.index = Some(index.into());
        self
    }

    /// Toggles unique iteration, keeping the current scan order.
    pub fn unique(&mut self, unique: bool) -> &mut Self {
        let reverse = self.direction.map(|d| d.is_reverse()).unwrap_or(false);
        self.direction = Some(Direction::from_flags(reverse, unique));
        self
    }

    /// Toggles reverse iteration, keeping the current uniqueness.
    pub fn reverse(&mut self, reverse: bool) -> &mut Self {
        let unique = self.direction.map(|d| d.is_unique()).unwrap_or(false);
        self.direction = Some(Direction::from_flags(reverse, unique));
        self
    }

    /// Adds a single-bound constraint on `field`.
    pub fn filter(&mut self, field: &str, op: &str, value: Value) -> QueryResult<&mut Self> {
        let op = Op::parse(op)?;
        self.push_range(field, op, value, None)
    }

    /// Adds a two-sided constraint on `field`; `op2` must complement `op`.
    pub fn filter_between(
        &mut self,
        field: &str,
        op: &str,
        value: Value,
        op2: &str,
        value2: Value,
    ) -> QueryResult<&mut Self> {
        let op = Op::parse(op)?;
        let op2 = Op::parse(op2)?;
        self.push_range(field, op, value, Some((op2, value2)))
    }

    fn push_range(
        &mut self,
        field: &str,
        op: Op,
        value: Value,
        second: Option<(Op, Value)>,
    ) -> QueryResult<&mut Self> {
        if field.is_empty() {
            return Err(QueryError::argument("field name required"));
        }
        if self.ranges.iter().any(|r| r.field == field) {
            return Err(QueryError::argument(format!(
                "field already constrained: {}",
                field
            )));
        }
        let range = KeyRange::from_ops(field, op, value, second)?;
        self.ranges.push(range);
        Ok(self)
    }

    /// Sets the aggregate. `count` takes an optional field, `sum`, `min`,
    /// `max` and `average` (or `avg`) require one.
    pub fn reduce(&mut self, method: &str, field: Option<&str>) -> QueryResult<&mut Self> {
        if self.reduce.is_some() {
            return Err(QueryError::argument("too many reduce"));
        }

        let method = method.to_lowercase();
        let required = |name: &str| -> QueryResult<String> {
            match field {
                Some(f) if !f.is_empty() => Ok(f.to_string()),
                _ => Err(QueryError::argument(format!("{} requires a field", name))),
            }
        };

        let spec = match method.as_str() {
            "count" => match field {
                Some("") => return Err(QueryError::argument("COUNT field is empty")),
                other => ReduceSpec::Count(other.map(str::to_string)),
            },
            "sum" => ReduceSpec::Sum(required("SUM")?),
            "min" => ReduceSpec::Min(required("MIN")?),
            "max" => ReduceSpec::Max(required("MAX")?),
            "avg" | "average" => ReduceSpec::Average(required("AVG")?),
            _ => {
                return Err(QueryError::argument(format!(
                    "Unknown reduce method: {}",
                    method
                )))
            }
        };

        self.reduce = Some(spec);
        Ok(self)
    }

    /// Installs an expression aggregate. Accepted here, rejected by the
    /// compilers.
    pub fn reduce_expression(&mut self, expression: impl Into<String>) -> QueryResult<&mut Self> {
        if self.reduce.is_some() {
            return Err(QueryError::argument("too many reduce"));
        }
        self.reduce = Some(ReduceSpec::Expression(expression.into()));
        Ok(self)
    }

    /// Installs a projection. Only `select` is known.
    pub fn map(&mut self, method: &str, fields: impl Into<Fields>) -> QueryResult<&mut Self> {
        if self.map.is_some() {
            return Err(QueryError::argument("too many map"));
        }
        if !method.eq_ignore_ascii_case("select") {
            return Err(QueryError::argument(format!("Unknown map method: {}", method)));
        }
        let fields = fields.into();
        if fields.is_empty() {
            return Err(QueryError::argument("SELECT fields missing"));
        }
        self.map = Some(MapSpec::Select(fields));
        Ok(self)
    }

    /// Installs an expression map. Accepted here, rejected by the compilers.
    pub fn map_expression(
        &mut self,
        expression: impl Into<String>,
        fields: impl Into<Fields>,
    ) -> QueryResult<&mut Self> {
        if self.map.is_some() {
            return Err(QueryError::argument("too many map"));
        }
        let fields = fields.into();
        if fields.is_empty() {
            return Err(QueryError::argument("expression fields missing"));
        }
        self.map = Some(MapSpec::Expression {
            expression: expression.into(),
            fields,
        });
        Ok(self)
    }

    /// Limit must be positive
    pub fn limit(&mut self, limit: u64) -> QueryResult<&mut Self> {
        if limit == 0 {
            return Err(QueryError::argument("limit must be greater than 0"));
        }
        self.limit = Some(limit);
        Ok(self)
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    /// Freezes the current state
    pub fn build(&self) -> Query {
        Query {
            store: self.store.clone(),
            index: self.index.clone(),
            direction: self.direction,
            ranges: self.ranges.clone(),
            map: self.map.clone(),
            reduce: self.reduce.clone(),
            limit: self.limit,
            offset: self.offset,
            sql: self.sql.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_upper_bound() {
        let mut builder = QueryBuilder::new();
        builder.from("t1").filter("x", "<", json!(10)).unwrap();
        let query = builder.build();

        let range = &query.ranges()[0];
        assert_eq!(range.upper, Some(json!(10)));
        assert!(range.upper_open);
        assert_eq!(range.lower, None);
    }

    #[test]
    fn test_duplicate_field_rejected_without_mutation() {
        let mut builder = QueryBuilder::new();
        builder.filter("x", ">=", json!(1)).unwrap();
        let before = builder.build();

        let result = builder.filter("x", "<", json!(5));
        assert!(matches!(result, Err(QueryError::Argument(_))));
        assert_eq!(builder.build(), before);
    }

    #[test]
    fn test_bad_second_operator_rejected_without_mutation() {
        let mut builder = QueryBuilder::new();
        let result = builder.filter_between("x", ">", json!(1), "=", json!(5));
        assert!(result.is_err());
        assert!(builder.build().ranges().is_empty());

        // The field is still free after the failed call
        builder.filter_between("x", ">", json!(1), "<=", json!(5)).unwrap();
        assert_eq!(builder.build().ranges().len(), 1);
    }

    #[test]
    fn test_reduce_arity() {
        assert!(QueryBuilder::new().reduce("sum", None).is_err());
        assert!(QueryBuilder::new().reduce("min", Some("")).is_err());
        assert!(QueryBuilder::new().reduce("count", None).is_ok());
        assert!(QueryBuilder::new().reduce("median", Some("x")).is_err());

        let mut builder = QueryBuilder::new();
        builder.reduce("AVG", Some("x")).unwrap();
        assert_eq!(builder.build().reduce(), Some(&ReduceSpec::Average("x".into())));
    }

    #[test]
    fn test_too_many_reduce() {
        let mut builder = QueryBuilder::new();
        builder.reduce("count", None).unwrap();
        let err = builder.reduce("sum", Some("x")).unwrap_err();
        assert!(err.message().contains("too many reduce"));
        assert_eq!(builder.build().reduce(), Some(&ReduceSpec::Count(None)));
    }

    #[test]
    fn test_map_select() {
        let mut builder = QueryBuilder::new();
        builder.map("select", ["a", "b"]).unwrap();
        assert!(builder.map("select", "c").is_err());
        assert!(QueryBuilder::new().map("pluck", "a").is_err());
        assert!(QueryBuilder::new().map("select", Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_direction_flags() {
        let mut builder = QueryBuilder::new();
        builder.unique(true);
        assert_eq!(builder.build().direction(), Some(Direction::NextUnique));
        builder.reverse(true);
        assert_eq!(builder.build().direction(), Some(Direction::PrevUnique));
        builder.unique(false);
        assert_eq!(builder.build().direction(), Some(Direction::Prev));
        builder.reverse(false);
        assert_eq!(builder.build().direction(), Some(Direction::Next));
    }

    #[test]
    fn test_limit_and_offset() {
        let mut builder = QueryBuilder::new();
        assert!(builder.limit(0).is_err());
        builder.limit(5).unwrap().offset(0);
        let query = builder.build();
        assert_eq!(query.limit(), Some(5));
        assert_eq!(query.offset(), Some(0));
    }

    #[test]
    fn test_build_is_a_snapshot() {
        let mut builder = QueryBuilder::new();
        builder.from("t1");
        let query = builder.build();
        builder.from("t2");
        assert_eq!(query.store(), "t1");
    }
}
