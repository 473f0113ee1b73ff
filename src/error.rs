//! Error types for a3s-on

use thiserror::Error;

/// Errors that can occur while creating or consuming event iterators
#[derive(Debug, Error)]
pub enum EventError {
    /// The event source refused to register a listener
    #[error("Failed to register listener for event type '{event_type}': {reason}")]
    Registration {
        event_type: String,
        reason: String,
    },

    /// Iteration was cancelled by an external token
    ///
    /// Only produced under `CancelPolicy::Error`; the default policy ends
    /// iteration with a clean `Step::Done` instead.
    #[error("Iteration cancelled{}", .reason.as_deref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Cancelled { reason: Option<String> },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A shared lock was poisoned by a panicking holder
    #[error("Lock error: {0}")]
    Lock(String),
}

/// Result type alias for event iteration operations
pub type Result<T> = std::result::Result<T, EventError>;
