//! Error types for the replication engine.

use thiserror::Error;
use tidesync_protocol::ProtocolError;
use tidesync_store::StoreError;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur during replication.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplicationError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote answered with an error payload.
    #[error("remote error: {0}")]
    Remote(String),

    /// The remote answered with something the engine cannot interpret.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A pulled row was rejected.
    #[error("validation failed for {}: {message}", primary_key.as_deref().unwrap_or("<unknown>"))]
    Validation {
        /// Primary key of the row, if it could be extracted.
        primary_key: Option<String>,
        /// Reason for the rejection.
        message: String,
    },

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A document could not be interpreted.
    #[error("document error: {0}")]
    Document(#[from] ProtocolError),

    /// Invalid session configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The session was cancelled.
    #[error("replication cancelled")]
    Cancelled,
}

impl ReplicationError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a validation error for a pulled row.
    pub fn validation(primary_key: Option<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            primary_key,
            message: message.into(),
        }
    }

    /// Returns true if a later attempt may succeed.
    ///
    /// The run coordinator retries every failed run regardless; this is
    /// informational for error subscribers.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplicationError::Transport { retryable, .. } => *retryable,
            ReplicationError::Remote(_) => true,
            ReplicationError::Store(StoreError::Backend(_)) => true,
            _ => false,
        }
    }

    /// Returns true if this error only affects a single pulled row.
    pub fn is_row_level(&self) -> bool {
        matches!(self, ReplicationError::Validation { .. })
    }
}
