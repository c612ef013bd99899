//! Storage options
//!
//! Read from a JSON file; every field is optional:
//!
//! ```json
//! {"policy": "multi", "is_serial": true, "sync_hook": false, "max_parallel": 16}
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::{log_event, Event};
use crate::tx::Policy;

pub type OptionsResult<T> = Result<T, OptionsError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("Failed to read options from {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Invalid options JSON: {0}")]
    Parse(String),

    #[error("Invalid option {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl OptionsError {
    pub fn code(&self) -> &'static str {
        match self {
            OptionsError::Read { .. } => "QUARRY_OPTIONS_READ",
            OptionsError::Parse(_) => "QUARRY_OPTIONS_PARSE",
            OptionsError::Invalid { .. } => "QUARRY_OPTIONS_INVALID",
        }
    }
}

/// Construction options of a `Storage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageOptions {
    /// Policy of the default operator's thread
    #[serde(default)]
    pub policy: Policy,

    /// Whether the default operator's thread is serial
    #[serde(default = "default_is_serial")]
    pub is_serial: bool,

    /// Create a sync thread and run the registered hook after writes
    #[serde(default)]
    pub sync_hook: bool,

    /// Maximum outstanding transactions across parallel threads
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_is_serial() -> bool {
    true
}

fn default_max_parallel() -> usize {
    16
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            is_serial: default_is_serial(),
            sync_hook: false,
            max_parallel: default_max_parallel(),
        }
    }
}

impl StorageOptions {
    /// Load options from a file
    pub fn load(path: &Path) -> OptionsResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| OptionsError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let options = Self::parse(&content)?;

        log_event(
            Event::OptionsLoaded,
            &[
                ("path", &path.display().to_string()),
                ("policy", options.policy.as_str()),
                ("serial", if options.is_serial { "true" } else { "false" }),
            ],
        );
        Ok(options)
    }

    pub fn parse(content: &str) -> OptionsResult<Self> {
        let options: StorageOptions =
            serde_json::from_str(content).map_err(|e| OptionsError::Parse(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> OptionsResult<()> {
        if self.max_parallel == 0 {
            return Err(OptionsError::Invalid {
                field: "max_parallel",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }
}
