//! Observable events
//!
//! Events are explicit and typed.

use std::fmt;

/// Observable events in quarry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Façade lifecycle
    /// Storage façade created
    StorageOpened,
    /// Options loaded from disk
    OptionsLoaded,
    /// Schema loaded from disk
    SchemaLoaded,

    // Scheduling
    /// Transaction thread created
    ThreadCreated,
    /// Thread reached its transaction limit
    ThreadClosed,
    /// Request queued on a thread
    RequestScheduled,
    /// Backend transaction opened
    TxBegin,
    /// Backend transaction committed
    TxComplete,
    /// Backend transaction aborted
    TxAbort,
    /// Housekeeping work handed to the sync thread
    SyncScheduled,

    // Compilation
    /// Query compiled into a cursor plan
    CursorCompiled,
    /// Query compiled into a statement plan
    StatementCompiled,
    /// Query rejected at compile time
    QueryRejected,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::StorageOpened => "STORAGE_OPENED",
            Event::OptionsLoaded => "OPTIONS_LOADED",
            Event::SchemaLoaded => "SCHEMA_LOADED",

            Event::ThreadCreated => "THREAD_CREATED",
            Event::ThreadClosed => "THREAD_CLOSED",
            Event::RequestScheduled => "REQUEST_SCHEDULED",
            Event::TxBegin => "TX_BEGIN",
            Event::TxComplete => "TX_COMPLETE",
            Event::TxAbort => "TX_ABORT",
            Event::SyncScheduled => "SYNC_SCHEDULED",

            Event::CursorCompiled => "CURSOR_COMPILED",
            Event::StatementCompiled => "STATEMENT_COMPILED",
            Event::QueryRejected => "QUERY_REJECTED",
        }
    }

    /// Returns true for per-request scheduling chatter
    pub fn is_chatter(&self) -> bool {
        matches!(
            self,
            Event::RequestScheduled
                | Event::TxBegin
                | Event::TxComplete
                | Event::SyncScheduled
                | Event::CursorCompiled
                | Event::StatementCompiled
        )
    }

    /// Returns true if this event reports a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Event::TxAbort | Event::QueryRejected)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
