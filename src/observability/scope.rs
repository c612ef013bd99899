//! ObservationScope for automatic begin/complete logging
//!
//! - Logs `{name}_BEGIN` on creation
//! - Logs `{name}_COMPLETE` or `{name}_FAILED` when closed explicitly
//! - Logs `{name}_INCOMPLETE` on drop if never closed

use std::cell::Cell;

use super::logger::{Logger, Severity};

/// A scope that automatically logs begin and complete events
///
/// ```ignore
/// let scope = ObservationScope::new("RUN", Severity::Trace);
/// // ... schedule work ...
/// scope.complete();
/// ```
pub struct ObservationScope<'a> {
    name: &'a str,
    severity: Severity,
    completed: Cell<bool>,
    fields: Vec<(&'a str, String)>,
}

impl<'a> ObservationScope<'a> {
    /// Create a new observation scope, logging `{name}_BEGIN` at `severity`.
    pub fn new(name: &'a str, severity: Severity) -> Self {
        Self::with_fields(name, severity, &[])
    }

    /// Create a new observation scope with fields repeated on every event
    pub fn with_fields(name: &'a str, severity: Severity, fields: &[(&'a str, &str)]) -> Self {
        let scope = Self {
            name,
            severity,
            completed: Cell::new(false),
            fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
        };
        scope.emit(severity, "BEGIN", &[]);
        scope
    }

    fn emit(&self, severity: Severity, suffix: &str, extra: &[(&str, &str)]) {
        if !Logger::enabled(severity) {
            return;
        }
        let event = format!("{}_{}", self.name, suffix);
        let mut all_fields: Vec<(&str, &str)> =
            self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        all_fields.extend(extra.iter().copied());
        Logger::log(severity, &event, &all_fields);
    }

    /// Mark the scope as successfully completed
    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    /// Mark the scope as completed with additional fields
    pub fn complete_with_fields(self, extra_fields: &[(&str, &str)]) {
        self.completed.set(true);
        self.emit(self.severity, "COMPLETE", extra_fields);
    }

    /// Mark the scope as failed; logged at WARN regardless of scope severity
    pub fn fail(self, reason: &str) {
        self.completed.set(true);
        self.emit(Severity::Warn.max(self.severity), "FAILED", &[("reason", reason)]);
    }

    /// Check if the scope has been completed
    pub fn is_completed(&self) -> bool {
        self.completed.get()
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.completed.get() {
            self.emit(
                Severity::Warn,
                "INCOMPLETE",
                &[("reason", "scope dropped without completion")],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_creation() {
        let scope = ObservationScope::new("TEST", Severity::Trace);
        assert!(!scope.is_completed());
        scope.complete();
    }

    #[test]
    fn test_scope_with_fields() {
        let scope = ObservationScope::with_fields("TEST", Severity::Trace, &[("thread", "T1")]);
        scope.complete_with_fields(&[("tx", "3")]);
    }

    #[test]
    fn test_scope_fail() {
        let scope = ObservationScope::new("TEST", Severity::Trace);
        scope.fail("backend refused");
    }

    #[test]
    fn test_scope_drop_without_complete() {
        let scope = ObservationScope::new("TEST", Severity::Trace);
        drop(scope);
    }
}
