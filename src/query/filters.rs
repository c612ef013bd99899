//! Key comparison and residual filtering
//!
//! Keys follow the ordering used by cursor backends:
//! numbers < strings < arrays, arrays compared element by element.
//! Null, booleans and objects are not keys and compare as nothing.

use std::cmp::Ordering;

use serde_json::Value;

use super::range::KeyRange;

/// Resolves a dotted field path (`a.b.c`) through nested objects.
pub fn resolve_path<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(row, |current, part| current.get(part))
}

/// Returns true if the value can be used as a key.
pub fn is_valid_key(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64().map(|f| !f.is_nan()).unwrap_or(false),
        Value::String(_) => true,
        Value::Array(items) => items.iter().all(is_valid_key),
        _ => false,
    }
}

fn type_rank(value: &Value) -> Option<u8> {
    match value {
        Value::Number(_) => Some(0),
        Value::String(_) => Some(1),
        Value::Array(_) => Some(2),
        _ => None,
    }
}

/// Compares two keys. `None` if either side is not a valid key.
pub fn compare_keys(a: &Value, b: &Value) -> Option<Ordering> {
    let (ra, rb) = (type_rank(a)?, type_rank(b)?);
    if ra != rb {
        return Some(ra.cmp(&rb));
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            // Exact integer comparison before falling back to f64
            if let (Some(xi), Some(yi)) = (x.as_i64(), y.as_i64()) {
                return Some(xi.cmp(&yi));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Array(x), Value::Array(y)) => {
            for (xa, ya) in x.iter().zip(y.iter()) {
                match compare_keys(xa, ya)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        _ => None,
    }
}

/// Evaluates residual ranges against fetched rows.
pub struct ResidualFilter;

impl ResidualFilter {
    /// A row survives only if it satisfies every range (AND semantics).
    pub fn matches(row: &Value, ranges: &[KeyRange]) -> bool {
        ranges.iter().all(|range| Self::matches_range(row, range))
    }

    /// Missing fields and non-key values never match.
    pub fn matches_range(row: &Value, range: &KeyRange) -> bool {
        match resolve_path(row, &range.field) {
            Some(value) => range.contains(value),
            None => false,
        }
    }
}
