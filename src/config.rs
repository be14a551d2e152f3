//! History and session configuration.

use serde::{Deserialize, Serialize};

/// Default bound on the undo stack.
pub const DEFAULT_MAX_HISTORY_SIZE: usize = 50;

/// Configuration parse failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Input was not valid JSON for the target type.
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tuning for [`crate::core::history::AnnotationHistoryManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of undo entries; oldest entries are dropped past it.
    pub max_history_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history_size: DEFAULT_MAX_HISTORY_SIZE,
        }
    }
}

impl HistoryConfig {
    /// Parses a (possibly partial) JSON object, filling missing fields with defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }
}

/// Tuning for the async session runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Hand a snapshot to the sink after every mutation.
    pub autosave: bool,
    /// Minimum delay between two snapshot writes.
    pub autosave_debounce_ms: u64,
    /// Bound of the queue feeding the persistence worker.
    pub persist_queue_bound: usize,
    /// Bound of the command queue feeding the session task.
    pub command_queue_bound: usize,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autosave: true,
            autosave_debounce_ms: 500,
            persist_queue_bound: 64,
            command_queue_bound: 256,
            event_capacity: 1024,
        }
    }
}

impl SessionConfig {
    /// Parses a (possibly partial) JSON object, filling missing fields with defaults.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }
}
