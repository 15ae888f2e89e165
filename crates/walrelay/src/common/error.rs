//! Error types for the relay.
//!
//! Protocol faults are fatal for the session; cell-level coercion problems
//! and publish failures are log-only and never surface here.

use thiserror::Error;

use crate::postgres::protocol::DecodeError;

/// Relay errors
#[derive(Error, Debug)]
pub enum RelayError {
    /// Malformed or unknown WAL payload
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Commit LSN mismatch, or a data message with no Begin ever seen
    #[error("messages are lost")]
    MessageLost,

    /// Action referenced a relation the stream never announced
    #[error("relation {0} not found")]
    RelationNotFound(i32),

    /// PostgreSQL driver error
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// JSON serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Redis transport error
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Replication protocol error
    #[error("replication error: {0}")]
    Replication(String),

    /// Publish error
    #[error("publish error: {0}")]
    Publish(String),

    /// Replication connection closed
    #[error("replication connection closed")]
    ConnectionClosed,

    /// Invalid internal state
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl RelayError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new replication error
    pub fn replication(msg: impl Into<String>) -> Self {
        Self::Replication(msg.into())
    }

    /// Create a new publish error
    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    /// Create a new invalid-state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::RelationNotFound(16394);
        assert_eq!(err.to_string(), "relation 16394 not found");

        let err = RelayError::MessageLost;
        assert_eq!(err.to_string(), "messages are lost");
    }

    #[test]
    fn test_error_constructors() {
        let err = RelayError::config("unsupported publication strategy: both");
        assert!(err.to_string().contains("configuration error"));

        let err = RelayError::publish("connection refused");
        assert!(err.to_string().contains("publish error"));
    }

    #[test]
    fn test_decode_error_conversion() {
        let err: RelayError = DecodeError::Empty.into();
        assert!(matches!(err, RelayError::Decode(DecodeError::Empty)));
    }
}
