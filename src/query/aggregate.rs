//! Map and reduce descriptions and their compiled forms
//!
//! `MapSpec`/`ReduceSpec` are what the builder records. Compilation lowers
//! them into a `Projection` and a `Reduction`; the `Reducer` is the running
//! accumulator a backend feeds rows into.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::errors::{QueryError, QueryResult};
use super::filters::{compare_keys, is_valid_key, resolve_path};

/// One field name or an ordered list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fields {
    One(String),
    Many(Vec<String>),
}

impl Fields {
    pub fn names(&self) -> Vec<&str> {
        match self {
            Fields::One(name) => vec![name.as_str()],
            Fields::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Fields::One(name) => name.is_empty(),
            Fields::Many(names) => names.is_empty() || names.iter().any(String::is_empty),
        }
    }
}

impl From<&str> for Fields {
    fn from(name: &str) -> Self {
        Fields::One(name.to_string())
    }
}

impl From<String> for Fields {
    fn from(name: String) -> Self {
        Fields::One(name)
    }
}

impl From<Vec<&str>> for Fields {
    fn from(names: Vec<&str>) -> Self {
        Fields::Many(names.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for Fields {
    fn from(names: Vec<String>) -> Self {
        Fields::Many(names)
    }
}

impl<const N: usize> From<[&str; N]> for Fields {
    fn from(names: [&str; N]) -> Self {
        Fields::Many(names.iter().map(|s| s.to_string()).collect())
    }
}

/// Recorded map description
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapSpec {
    Select(Fields),
    /// Accepted structurally, evaluation is delegated
    Expression { expression: String, fields: Fields },
}

/// Recorded reduce description
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReduceSpec {
    Count(Option<String>),
    Sum(String),
    Min(String),
    Max(String),
    Average(String),
    /// Accepted structurally, evaluation is delegated
    Expression(String),
}

impl ReduceSpec {
    pub fn name(&self) -> &'static str {
        match self {
            ReduceSpec::Count(_) => "count",
            ReduceSpec::Sum(_) => "sum",
            ReduceSpec::Min(_) => "min",
            ReduceSpec::Max(_) => "max",
            ReduceSpec::Average(_) => "average",
            ReduceSpec::Expression(_) => "expression",
        }
    }
}

/// Row transform installed by a `select` map
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Yields the bare field value
    Field(String),
    /// Yields an object holding the listed fields that are present
    Fields(Vec<String>),
}

impl Projection {
    pub fn from_fields(fields: &Fields) -> Self {
        match fields {
            Fields::One(name) => Projection::Field(name.clone()),
            Fields::Many(names) => Projection::Fields(names.clone()),
        }
    }

    pub fn apply(&self, row: &Value) -> Value {
        match self {
            Projection::Field(name) => resolve_path(row, name).cloned().unwrap_or(Value::Null),
            Projection::Fields(names) => {
                let mut selected = Map::new();
                for name in names {
                    if let Some(value) = resolve_path(row, name) {
                        selected.insert(name.clone(), value.clone());
                    }
                }
                Value::Object(selected)
            }
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projection::Field(name) => write!(f, "select {}", name),
            Projection::Fields(names) => write!(f, "select {}", names.join(", ")),
        }
    }
}

/// Canonical reduction a cursor or client-side statement step runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", content = "field", rename_all = "snake_case")]
pub enum Reduction {
    Count(Option<String>),
    Sum(String),
    Min(String),
    Max(String),
    Average(String),
}

impl Reduction {
    /// Lowers a recorded reduce; expressions have no canonical form.
    pub fn from_spec(spec: &ReduceSpec) -> QueryResult<Self> {
        Ok(match spec {
            ReduceSpec::Count(field) => Reduction::Count(field.clone()),
            ReduceSpec::Sum(field) => Reduction::Sum(field.clone()),
            ReduceSpec::Min(field) => Reduction::Min(field.clone()),
            ReduceSpec::Max(field) => Reduction::Max(field.clone()),
            ReduceSpec::Average(field) => Reduction::Average(field.clone()),
            ReduceSpec::Expression(expr) => {
                return Err(QueryError::unsupported(format!(
                    "reduce expression '{}' cannot be compiled",
                    expr
                )))
            }
        })
    }

    /// SQL aggregate function name
    pub fn sql_function(&self) -> &'static str {
        match self {
            Reduction::Count(_) => "COUNT",
            Reduction::Sum(_) => "SUM",
            Reduction::Min(_) => "MIN",
            Reduction::Max(_) => "MAX",
            Reduction::Average(_) => "AVG",
        }
    }

    pub fn field(&self) -> Option<&str> {
        match self {
            Reduction::Count(field) => field.as_deref(),
            Reduction::Sum(f) | Reduction::Min(f) | Reduction::Max(f) | Reduction::Average(f) => {
                Some(f)
            }
        }
    }

    pub fn reducer(&self) -> Reducer {
        Reducer::new(self.clone())
    }

    /// Runs the reduction over a finite row sequence.
    pub fn apply<'a, I>(&self, rows: I) -> Value
    where
        I: IntoIterator<Item = &'a Value>,
    {
        let mut reducer = self.reducer();
        for row in rows {
            reducer.feed(row);
        }
        reducer.finish()
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.field() {
            Some(field) => write!(f, "{}({})", self.sql_function().to_lowercase(), field),
            None => write!(f, "{}(*)", self.sql_function().to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Sum {
    Int(i64),
    Float(f64),
}

impl Sum {
    fn add(self, n: &Number) -> Sum {
        match (self, n.as_i64()) {
            (Sum::Int(acc), Some(x)) => match acc.checked_add(x) {
                Some(total) => Sum::Int(total),
                None => Sum::Float(acc as f64 + x as f64),
            },
            (Sum::Int(acc), None) => Sum::Float(acc as f64 + n.as_f64().unwrap_or(0.0)),
            (Sum::Float(acc), _) => Sum::Float(acc + n.as_f64().unwrap_or(0.0)),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Sum::Int(total) => Value::from(total),
            Sum::Float(total) => Number::from_f64(total).map(Value::Number).unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Clone)]
enum Accumulator {
    Count(u64),
    Sum(Sum),
    Extremum(Option<Value>),
    Mean(Option<f64>),
}

/// Running accumulator for a `Reduction`.
///
/// Rows whose field is missing or unusable do not contribute and do not
/// advance the ordinal used by the online mean.
#[derive(Debug, Clone)]
pub struct Reducer {
    reduction: Reduction,
    acc: Accumulator,
    ordinal: u64,
}

impl Reducer {
    pub fn new(reduction: Reduction) -> Self {
        let acc = match &reduction {
            Reduction::Count(_) => Accumulator::Count(0),
            Reduction::Sum(_) => Accumulator::Sum(Sum::Int(0)),
            Reduction::Min(_) | Reduction::Max(_) => Accumulator::Extremum(None),
            Reduction::Average(_) => Accumulator::Mean(None),
        };
        Self {
            reduction,
            acc,
            ordinal: 0,
        }
    }

    pub fn feed(&mut self, row: &Value) {
        let current = self.reduction.field().map(|f| resolve_path(row, f));
        match (&self.reduction, &mut self.acc) {
            (Reduction::Count(field), Accumulator::Count(n)) => {
                let counts = match (field, current) {
                    (None, _) => true,
                    (Some(_), Some(Some(value))) => !value.is_null(),
                    (Some(_), _) => false,
                };
                if counts {
                    *n += 1;
                }
            }
            (Reduction::Sum(_), Accumulator::Sum(sum)) => {
                if let Some(Some(Value::Number(x))) = current {
                    *sum = sum.add(x);
                }
            }
            (Reduction::Min(_), Accumulator::Extremum(best))
            | (Reduction::Max(_), Accumulator::Extremum(best)) => {
                let want = if matches!(self.reduction, Reduction::Min(_)) {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                if let Some(Some(value)) = current {
                    let replace = match best.as_ref() {
                        None => is_valid_key(value),
                        Some(b) => compare_keys(value, b) == Some(want),
                    };
                    if replace {
                        *best = Some(value.clone());
                    }
                }
            }
            (Reduction::Average(_), Accumulator::Mean(mean)) => {
                if let Some(Some(Value::Number(x))) = current {
                    if let Some(x) = x.as_f64() {
                        let i = self.ordinal as f64;
                        let acc = mean.unwrap_or(0.0);
                        *mean = Some((acc * i + x) / (i + 1.0));
                        self.ordinal += 1;
                    }
                }
            }
            _ => {}
        }
    }

    /// Final value. Empty min/max/average yield null.
    pub fn finish(self) -> Value {
        match self.acc {
            Accumulator::Count(n) => Value::from(n),
            Accumulator::Sum(sum) => sum.into_value(),
            Accumulator::Extremum(best) => best.unwrap_or(Value::Null),
            Accumulator::Mean(mean) => mean
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        }
    }
}
