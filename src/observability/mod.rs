//! Observability subsystem
//!
//! - Structured logging (JSON, one line per event)
//! - Per-façade counters
//! - Lifecycle event tracing
//!
//! Observability is read-only: nothing here changes scheduling or compilation
//! behavior.

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::ObservationScope;

/// Log a lifecycle event with fields.
///
/// Chatter events go out at TRACE, failures at WARN, everything else at INFO.
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_failure() {
        Severity::Warn
    } else if event.is_chatter() {
        Severity::Trace
    } else {
        Severity::Info
    };
    Logger::log(severity, event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        log_event(Event::StorageOpened, &[("stores", "a,b")]);
        log_event(Event::TxBegin, &[("thread", "T0")]);
        log_event(Event::QueryRejected, &[("reason", "unknown store")]);
    }
}
