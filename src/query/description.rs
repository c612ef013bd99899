//! JSON query descriptions
//!
//! A description is replayed through `QueryBuilder`, so it is validated by
//! exactly the same rules as fluent calls.

use serde::Deserialize;
use serde_json::Value;

use super::aggregate::Fields;
use super::builder::{Query, QueryBuilder};
use super::errors::{QueryError, QueryResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhereClause {
    pub field: String,
    pub op: String,
    pub value: Value,
    #[serde(default)]
    pub op2: Option<String>,
    #[serde(default)]
    pub value2: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapClause {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    pub fields: Fields,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReduceClause {
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    /// Kept untyped so a non-string field is reported as a bad argument
    #[serde(default)]
    pub field: Option<Value>,
}

/// Query description as read from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryDescription {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
    #[serde(default)]
    pub unique: Option<bool>,
    #[serde(default)]
    pub reverse: Option<bool>,
    #[serde(default, rename = "where")]
    pub wheres: Vec<WhereClause>,
    #[serde(default)]
    pub map: Option<MapClause>,
    #[serde(default)]
    pub reduce: Option<ReduceClause>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub sql: Option<String>,
}

impl QueryDescription {
    pub fn from_json(value: Value) -> QueryResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| QueryError::argument(format!("invalid query description: {}", e)))
    }

    /// Replays the description through a builder.
    pub fn to_query(&self) -> QueryResult<Query> {
        let mut builder = match &self.sql {
            Some(sql) => QueryBuilder::from_sql(sql.clone()),
            None => QueryBuilder::new(),
        };

        if let Some(store) = &self.from {
            builder.from(store.clone());
        }
        if let Some(index) = &self.order {
            builder.order(index.clone());
        }
        if let Some(reverse) = self.reverse {
            builder.reverse(reverse);
        }
        if let Some(unique) = self.unique {
            builder.unique(unique);
        }

        for clause in &self.wheres {
            match (&clause.op2, &clause.value2) {
                (Some(op2), Some(value2)) => {
                    builder.filter_between(
                        &clause.field,
                        &clause.op,
                        clause.value.clone(),
                        op2,
                        value2.clone(),
                    )?;
                }
                (None, None) => {
                    builder.filter(&clause.field, &clause.op, clause.value.clone())?;
                }
                _ => {
                    return Err(QueryError::argument(format!(
                        "op2 and value2 must be given together on field {}",
                        clause.field
                    )))
                }
            }
        }

        if let Some(map) = &self.map {
            match (&map.method, &map.expression) {
                (Some(method), None) => {
                    builder.map(method, map.fields.clone())?;
                }
                (None, Some(expression)) => {
                    builder.map_expression(expression.clone(), map.fields.clone())?;
                }
                _ => return Err(QueryError::argument("map needs one of method or expression")),
            }
        }

        if let Some(reduce) = &self.reduce {
            match (&reduce.method, &reduce.expression) {
                (Some(method), None) => {
                    let field = match &reduce.field {
                        None | Some(Value::Null) => None,
                        Some(Value::String(s)) => Some(s.as_str()),
                        Some(other) => {
                            return Err(QueryError::argument(format!(
                                "{} field must be a string, got {}",
                                method, other
                            )))
                        }
                    };
                    builder.reduce(method, field)?;
                }
                (None, Some(expression)) => {
                    builder.reduce_expression(expression.clone())?;
                }
                _ => {
                    return Err(QueryError::argument(
                        "reduce needs one of method or expression",
                    ))
                }
            }
        }

        if let Some(limit) = self.limit {
            builder.limit(limit)?;
        }
        if let Some(offset) = self.offset {
            builder.offset(offset);
        }

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Direction, ReduceSpec};
    use serde_json::json;

    #[test]
    fn test_full_description() {
        let description = QueryDescription::from_json(json!({
            "from": "animals",
            "where": [
                {"field": "legs", "op": ">=", "value": 2, "op2": "<", "value2": 8},
                {"field": "color", "op": "=", "value": "red"}
            ],
            "reverse": true,
            "unique": true,
            "reduce": {"method": "avg", "field": "legs"},
            "limit": 4
        }))
        .unwrap();

        let query = description.to_query().unwrap();
        assert_eq!(query.store(), "animals");
        assert_eq!(query.ranges().len(), 2);
        assert_eq!(query.direction(), Some(Direction::PrevUnique));
        assert_eq!(query.reduce(), Some(&ReduceSpec::Average("legs".into())));
        assert_eq!(query.limit(), Some(4));
    }

    #[test]
    fn test_non_string_reduce_field() {
        let description = QueryDescription::from_json(json!({
            "from": "t1",
            "reduce": {"method": "sum", "field": 3}
        }))
        .unwrap();
        assert!(matches!(description.to_query(), Err(QueryError::Argument(_))));
    }

    #[test]
    fn test_duplicate_where_field() {
        let description = QueryDescription::from_json(json!({
            "where": [
                {"field": "x", "op": "=", "value": 1},
                {"field": "x", "op": ">", "value": 0}
            ]
        }))
        .unwrap();
        assert!(description.to_query().is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(QueryDescription::from_json(json!({"form": "t1"})).is_err());
    }
}
