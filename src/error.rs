//! Error types for gridrunner.

use std::time::Duration;

use crate::worker::Slot;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised while reading or interpreting the cell grid.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("Invalid column reference: {0}")]
    InvalidColumn(String),

    #[error("Malformed group descriptor #{index}: {reason}")]
    MalformedDescriptor { index: usize, reason: String },

    #[error("Prompt group {index} out of range ({count} groups resolved)")]
    GroupOutOfRange { index: usize, count: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Worker pool and adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Slot {slot} failed to open a {ai_type} worker: {reason}")]
    OpenFailed {
        slot: Slot,
        ai_type: String,
        reason: String,
    },

    #[error("Slot {slot} worker never became ready after {attempts} checks")]
    NotReady { slot: Slot, attempts: u32 },

    #[error("Slot {slot} teardown failed: {reason}")]
    TeardownFailed { slot: Slot, reason: String },

    #[error("Slot {slot} reload failed: {reason}")]
    ReloadFailed { slot: Slot, reason: String },

    #[error("Slot {slot} is empty")]
    SlotEmpty { slot: Slot },

    #[error("No adapter registered for {ai_type}")]
    AdapterMissing { ai_type: String },

    #[error("Host error: {0}")]
    Host(String),

    #[error("Response timed out after {0:?}")]
    Timeout(Duration),
}

/// Result sink errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}
