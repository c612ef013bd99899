//! Concurrency policies and transaction scopes

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::{TxError, TxResult};

/// How a thread groups requests into transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// One request per transaction
    #[default]
    Single,
    /// Queued requests within the open scope share a transaction
    Multi,
    /// Queued requests with an identical scope share a transaction
    Repeat,
    /// One request per transaction, spanning the thread's full scope
    All,
    /// Queued requests commit together or not at all
    Atomic,
}

impl Policy {
    /// Parses a policy name. Unknown names are an argument error.
    pub fn parse(name: &str) -> TxResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "single" => Ok(Policy::Single),
            "multi" => Ok(Policy::Multi),
            "repeat" => Ok(Policy::Repeat),
            "all" => Ok(Policy::All),
            "atomic" => Ok(Policy::Atomic),
            _ => Err(TxError::argument(format!("unknown policy: {}", name))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Single => "single",
            Policy::Multi => "multi",
            Policy::Repeat => "repeat",
            Policy::All => "all",
            Policy::Atomic => "atomic",
        }
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, Policy::Atomic)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxMode {
    #[default]
    ReadOnly,
    ReadWrite,
}

impl TxMode {
    /// Accepts `readonly` and `readwrite` only.
    pub fn parse(mode: &str) -> TxResult<Self> {
        match mode {
            "readonly" => Ok(TxMode::ReadOnly),
            "readwrite" => Ok(TxMode::ReadWrite),
            other => Err(TxError::argument(format!("invalid mode: {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxMode::ReadOnly => "readonly",
            TxMode::ReadWrite => "readwrite",
        }
    }

    /// True if a transaction in this mode can serve a request in `other`.
    pub fn allows(&self, other: TxMode) -> bool {
        *self == TxMode::ReadWrite || other == TxMode::ReadOnly
    }
}

impl fmt::Display for TxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store names plus access mode of a request or transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxScope {
    stores: Vec<String>,
    mode: TxMode,
}

impl TxScope {
    /// Duplicate store names are dropped, first occurrence order kept.
    pub fn new<I, S>(stores: I, mode: TxMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for store in stores {
            let store = store.into();
            if !unique.contains(&store) {
                unique.push(store);
            }
        }
        Self {
            stores: unique,
            mode,
        }
    }

    pub fn read(store: impl Into<String>) -> Self {
        Self::new([store.into()], TxMode::ReadOnly)
    }

    pub fn write(store: impl Into<String>) -> Self {
        Self::new([store.into()], TxMode::ReadWrite)
    }

    pub fn stores(&self) -> &[String] {
        &self.stores
    }

    pub fn mode(&self) -> TxMode {
        self.mode
    }

    pub fn contains(&self, store: &str) -> bool {
        self.stores.iter().any(|s| s == store)
    }

    /// True if a transaction over `self` can serve `other`.
    pub fn covers(&self, other: &TxScope) -> bool {
        self.mode.allows(other.mode) && other.stores.iter().all(|s| self.contains(s))
    }

    /// Smallest scope covering both
    pub fn union(&self, other: &TxScope) -> TxScope {
        let mode = if self.mode == TxMode::ReadWrite || other.mode == TxMode::ReadWrite {
            TxMode::ReadWrite
        } else {
            TxMode::ReadOnly
        };
        TxScope::new(self.stores.iter().chain(other.stores.iter()).cloned(), mode)
    }

    /// Comma separated store list for logs
    pub fn describe(&self) -> String {
        self.stores.join(",")
    }
}
