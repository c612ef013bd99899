//! Single-field key ranges
//!
//! A `KeyRange` is the leaf building block of both compile targets: the
//! primary range of a cursor, a bound `WHERE` clause of a statement, or a
//! residual filter evaluated after fetch.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{QueryError, QueryResult};
use super::filters::compare_keys;

/// Comparison operator accepted by `filter`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl Op {
    /// Parses `<`, `<=`, `>`, `>=`, `=` or `==`.
    pub fn parse(op: &str) -> QueryResult<Self> {
        match op {
            "<" => Ok(Op::Lt),
            "<=" => Ok(Op::Lte),
            ">" => Ok(Op::Gt),
            ">=" => Ok(Op::Gte),
            "=" | "==" => Ok(Op::Eq),
            other => Err(QueryError::argument(format!("unknown operator: {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Eq => "=",
        }
    }

    fn is_upper(&self) -> bool {
        matches!(self, Op::Lt | Op::Lte)
    }

    fn is_lower(&self) -> bool {
        matches!(self, Op::Gt | Op::Gte)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded constraint on a single field.
///
/// `lower > upper` is not rejected; such a range admits nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRange {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<Value>,
    #[serde(default)]
    pub lower_open: bool,
    #[serde(default)]
    pub upper_open: bool,
}

impl KeyRange {
    /// Point lookup
    pub fn only(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            lower: Some(value.clone()),
            upper: Some(value),
            lower_open: false,
            upper_open: false,
        }
    }

    pub fn lower_bound(field: impl Into<String>, value: Value, open: bool) -> Self {
        Self {
            field: field.into(),
            lower: Some(value),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    pub fn upper_bound(field: impl Into<String>, value: Value, open: bool) -> Self {
        Self {
            field: field.into(),
            lower: None,
            upper: Some(value),
            lower_open: false,
            upper_open: open,
        }
    }

    /// Builds a range from one or two operator/value pairs.
    ///
    /// The second operator must be relational and bound the side the first
    /// one left open: `>`/`>=` pairs with `<`/`<=` and the other way round.
    pub fn from_ops(
        field: impl Into<String>,
        op: Op,
        value: Value,
        second: Option<(Op, Value)>,
    ) -> QueryResult<Self> {
        let field = field.into();
        let mut range = match op {
            Op::Lt | Op::Lte => Self::upper_bound(field, value, op == Op::Lt),
            Op::Gt | Op::Gte => Self::lower_bound(field, value, op == Op::Gt),
            Op::Eq => Self::only(field, value),
        };

        if let Some((op2, value2)) = second {
            let complementary =
                (op.is_lower() && op2.is_upper()) || (op.is_upper() && op2.is_lower());
            if !complementary {
                return Err(QueryError::argument(format!(
                    "operator '{}' does not complement '{}' on field {}",
                    op2, op, range.field
                )));
            }
            if op2.is_upper() {
                range.upper = Some(value2);
                range.upper_open = op2 == Op::Lt;
            } else {
                range.lower = Some(value2);
                range.lower_open = op2 == Op::Gt;
            }
        }

        Ok(range)
    }

    /// Returns true for a point lookup
    pub fn is_point(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(l), Some(u)) => !self.lower_open && !self.upper_open && l == u,
            _ => false,
        }
    }

    /// Returns true if `key` falls inside the range. Non-key values never do.
    pub fn contains(&self, key: &Value) -> bool {
        if let Some(lower) = &self.lower {
            match compare_keys(key, lower) {
                Some(Ordering::Greater) => {}
                Some(Ordering::Equal) if !self.lower_open => {}
                _ => return false,
            }
        }
        if let Some(upper) = &self.upper {
            match compare_keys(key, upper) {
                Some(Ordering::Less) => {}
                Some(Ordering::Equal) if !self.upper_open => {}
                _ => return false,
            }
        }
        // An unbounded range still rejects non-keys
        self.lower.is_some() || self.upper.is_some() || super::filters::is_valid_key(key)
    }

    /// Parameterized `WHERE` fragment and its bound values.
    pub fn to_where_clause(&self) -> (String, Vec<Value>) {
        let column = quote_identifier(&self.field);
        if self.is_point() {
            let value = self.lower.clone().unwrap_or(Value::Null);
            return (format!("{} = ?", column), vec![value]);
        }

        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if let Some(lower) = &self.lower {
            let op = if self.lower_open { ">" } else { ">=" };
            clauses.push(format!("{} {} ?", column, op));
            params.push(lower.clone());
        }
        if let Some(upper) = &self.upper {
            let op = if self.upper_open { "<" } else { "<=" };
            clauses.push(format!("{} {} ?", column, op));
            params.push(upper.clone());
        }
        (clauses.join(" AND "), params)
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lower = match &self.lower {
            Some(v) => format!("{}{}", if self.lower_open { "(" } else { "[" }, v),
            None => "(-inf".to_string(),
        };
        let upper = match &self.upper {
            Some(v) => format!("{}{}", v, if self.upper_open { ")" } else { "]" }),
            None => "+inf)".to_string(),
        };
        write!(f, "{} in {}, {}", self.field, lower, upper)
    }
}

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upper_bound_ops() {
        for (op, open) in [(Op::Lt, true), (Op::Lte, false)] {
            let range = KeyRange::from_ops("x", op, json!(5), None).unwrap();
            assert_eq!(range.upper, Some(json!(5)));
            assert_eq!(range.upper_open, open);
            assert_eq!(range.lower, None);
        }
    }

    #[test]
    fn test_lower_bound_ops() {
        let range = KeyRange::from_ops("x", Op::Gt, json!(5), None).unwrap();
        assert_eq!(range.lower, Some(json!(5)));
        assert!(range.lower_open);
        assert_eq!(range.upper, None);
    }

    #[test]
    fn test_equality_is_point() {
        let range = KeyRange::from_ops("x", Op::Eq, json!("a"), None).unwrap();
        assert!(range.is_point());
        assert!(range.contains(&json!("a")));
        assert!(!range.contains(&json!("b")));
    }

    #[test]
    fn test_between() {
        let range =
            KeyRange::from_ops("x", Op::Gte, json!(2), Some((Op::Lt, json!(5)))).unwrap();
        assert!(range.contains(&json!(2)));
        assert!(range.contains(&json!(4.9)));
        assert!(!range.contains(&json!(5)));
        assert!(!range.contains(&json!(1)));
    }

    #[test]
    fn test_non_complementary_second_op() {
        assert!(KeyRange::from_ops("x", Op::Gt, json!(1), Some((Op::Gte, json!(2)))).is_err());
        assert!(KeyRange::from_ops("x", Op::Eq, json!(1), Some((Op::Lt, json!(2)))).is_err());
        assert!(KeyRange::from_ops("x", Op::Lt, json!(1), Some((Op::Eq, json!(2)))).is_err());
    }

    #[test]
    fn test_inverted_range_admits_nothing() {
        let range =
            KeyRange::from_ops("x", Op::Gt, json!(10), Some((Op::Lt, json!(1)))).unwrap();
        for v in [json!(0), json!(5), json!(11)] {
            assert!(!range.contains(&v));
        }
    }

    #[test]
    fn test_unknown_operator() {
        assert!(matches!(Op::parse("!="), Err(QueryError::Argument(_))));
        assert_eq!(Op::parse("==").unwrap(), Op::Eq);
    }

    #[test]
    fn test_where_clause() {
        let (sql, params) = KeyRange::only("color", json!("red")).to_where_clause();
        assert_eq!(sql, "\"color\" = ?");
        assert_eq!(params, vec![json!("red")]);

        let range =
            KeyRange::from_ops("legs", Op::Gt, json!(2), Some((Op::Lte, json!(8)))).unwrap();
        let (sql, params) = range.to_where_clause();
        assert_eq!(sql, "\"legs\" > ? AND \"legs\" <= ?");
        assert_eq!(params, vec![json!(2), json!(8)]);
    }

    #[test]
    fn test_quote_identifier_escapes() {
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
