//! Error types for local store operations.

use thiserror::Error;
use tidesync_protocol::ProtocolError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store was destroyed; no further reads or writes are possible.
    #[error("store is closed")]
    Closed,

    /// A document could not be interpreted.
    #[error("invalid document: {0}")]
    InvalidDocument(#[from] ProtocolError),

    /// Storage backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}
