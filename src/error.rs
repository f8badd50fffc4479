//! Error types for a3s-realtime

use thiserror::Error;

/// Errors that can occur in the realtime subsystem
///
/// Transport failures are normally absorbed by the manager and surface only
/// through [`ConnectionHealth`](crate::ConnectionHealth); these variants are
/// what transports report to the manager and what misused public operations
/// return to callers.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Channel name rejected at subscribe time
    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),

    /// Event filter rejected at subscribe time
    #[error("Invalid event filter: {0}")]
    InvalidFilter(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Subscribe failure reported by the transport
    #[error("Failed to subscribe to channel '{channel}': {reason}")]
    Subscribe {
        channel: String,
        reason: String,
    },

    /// Broadcast send failure
    #[error("Failed to send on channel '{channel}': {reason}")]
    Send {
        channel: String,
        reason: String,
    },

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The manager has been cleaned up and accepts no new work
    #[error("Realtime manager has been shut down")]
    ShutDown,
}

/// Result type alias for realtime operations
pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Error type returned by subscriber callbacks
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;
