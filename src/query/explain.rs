//! Explain output for compiled plans
//!
//! Deterministic, human-readable, and serializable for the CLI.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::cursor::Cursor;
use super::errors::QueryError;
use super::statement::Statement;

/// Explain plan output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainPlan {
    /// Whether compilation succeeded
    pub accepted: bool,
    /// `cursor` or `statement`
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_range: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl ExplainPlan {
    fn empty(target: &str, accepted: bool) -> Self {
        Self {
            accepted,
            target: target.to_string(),
            store: None,
            index: None,
            direction: None,
            key_range: None,
            filters: Vec::new(),
            projection: None,
            reduction: None,
            sql: None,
            params: Vec::new(),
            limit: None,
            offset: None,
            rejection_code: None,
            rejection_reason: None,
        }
    }

    pub fn from_cursor(cursor: &Cursor) -> Self {
        Self {
            store: Some(cursor.store.clone()),
            index: cursor.index.clone(),
            direction: cursor.direction.map(|d| d.to_string()),
            key_range: cursor.key_range.as_ref().map(|r| r.to_string()),
            filters: cursor.filters.iter().map(|r| r.to_string()).collect(),
            projection: cursor.projection.as_ref().map(|p| p.to_string()),
            reduction: cursor.reduction.as_ref().map(|r| r.to_string()),
            limit: cursor.limit,
            offset: cursor.offset,
            ..Self::empty("cursor", true)
        }
    }

    pub fn from_statement(statement: &Statement) -> Self {
        let client = &statement.client;
        Self {
            store: Some(statement.store.clone()),
            direction: Some(statement.direction.to_string()),
            filters: client.filters.iter().map(|r| r.to_string()).collect(),
            projection: client.projection.as_ref().map(|p| p.to_string()),
            reduction: statement
                .aggregate
                .as_ref()
                .or(client.reduction.as_ref())
                .map(|r| r.to_string()),
            sql: Some(statement.sql.clone()),
            params: statement.params.clone(),
            limit: statement.limit.or(client.limit),
            offset: statement.offset.or(client.offset),
            ..Self::empty("statement", true)
        }
    }

    pub fn from_error(target: &str, err: &QueryError) -> Self {
        Self {
            rejection_code: Some(err.code().to_string()),
            rejection_reason: Some(err.message().to_string()),
            ..Self::empty(target, false)
        }
    }
}

impl fmt::Display for ExplainPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EXPLAIN PLAN ({}) ===", self.target)?;

        if !self.accepted {
            writeln!(f, "Status: REJECTED")?;
            if let Some(code) = &self.rejection_code {
                writeln!(f, "Error Code: {}", code)?;
            }
            if let Some(reason) = &self.rejection_reason {
                writeln!(f, "Reason: {}", reason)?;
            }
            return Ok(());
        }

        writeln!(f, "Status: ACCEPTED")?;
        if let Some(store) = &self.store {
            writeln!(f, "Store: {}", store)?;
        }
        writeln!(f, "Index: {}", self.index.as_deref().unwrap_or("(primary key)"))?;
        if let Some(direction) = &self.direction {
            writeln!(f, "Direction: {}", direction)?;
        }
        if let Some(range) = &self.key_range {
            writeln!(f, "Key Range: {}", range)?;
        }
        if let Some(sql) = &self.sql {
            writeln!(f, "SQL: {}", sql)?;
        }
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
            writeln!(f, "Params: {}", params.join(", "))?;
        }
        if !self.filters.is_empty() {
            writeln!(f, "Residual Filters:")?;
            for filter in &self.filters {
                writeln!(f, "  - {}", filter)?;
            }
        }
        if let Some(projection) = &self.projection {
            writeln!(f, "Map: {}", projection)?;
        }
        if let Some(reduction) = &self.reduction {
            writeln!(f, "Reduce: {}", reduction)?;
        }
        if let Some(limit) = self.limit {
            writeln!(f, "Limit: {}", limit)?;
        }
        if let Some(offset) = self.offset {
            writeln!(f, "Offset: {}", offset)?;
        }

        Ok(())
    }
}
