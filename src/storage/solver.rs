//! Join solvers for multi-cursor scans

use serde_json::Value;

use crate::query::compare_keys;

/// Combines the primary key lists of several cursors into one result.
pub trait Solver: Send + 'static {
    fn solve(&self, keys: Vec<Vec<Value>>) -> Vec<Value>;
}

/// Keys present in every list, in the order of the first one
#[derive(Debug, Clone, Copy, Default)]
pub struct Intersection;

impl Solver for Intersection {
    fn solve(&self, keys: Vec<Vec<Value>>) -> Vec<Value> {
        let mut lists = keys.into_iter();
        let first = match lists.next() {
            Some(first) => first,
            None => return Vec::new(),
        };
        let rest: Vec<Vec<Value>> = lists.collect();

        first
            .into_iter()
            .filter(|key| {
                rest.iter().all(|list| {
                    list.iter()
                        .any(|other| compare_keys(key, other) == Some(std::cmp::Ordering::Equal))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_intersection() {
        let keys = vec![
            vec![json!(1), json!(2), json!(3), json!("a")],
            vec![json!("a"), json!(3), json!(1)],
            vec![json!(3), json!("a"), json!(9), json!(1)],
        ];
        assert_eq!(Intersection.solve(keys), vec![json!(1), json!(3), json!("a")]);
    }

    #[test]
    fn test_intersection_of_nothing() {
        assert!(Intersection.solve(Vec::new()).is_empty());
        assert!(Intersection.solve(vec![vec![json!(1)], vec![]]).is_empty());
    }
}
