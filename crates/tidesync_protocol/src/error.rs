//! Error types for protocol values.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while interpreting protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A revision string is not of the form `<height>-<hash>`.
    #[error("invalid revision: {0:?}")]
    InvalidRevision(String),

    /// The primary key field is missing from a document body.
    #[error("missing primary key field {path:?}")]
    MissingPrimaryKey {
        /// Name of the primary key field.
        path: String,
    },

    /// The primary key field has an unusable value.
    #[error("primary key field {path:?} must be a non-empty string or an integer")]
    InvalidPrimaryKey {
        /// Name of the primary key field.
        path: String,
    },

    /// A checkpoint document has an unexpected shape.
    #[error("invalid checkpoint document: {0}")]
    InvalidCheckpoint(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::MissingPrimaryKey { path: "id".into() };
        assert_eq!(err.to_string(), "missing primary key field \"id\"");

        let err = ProtocolError::InvalidRevision("abc".into());
        assert!(err.to_string().contains("abc"));
    }
}
