//! Error types for the reference server.

use serde_json::{json, Value};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while serving a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Malformed request body.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or unreadable credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Credentials were read but rejected.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Push carried more rows than the server accepts.
    #[error("batch too large: {size} > {max}")]
    BatchTooLarge {
        /// Rows in the request.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The server is refusing work (injected outage).
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::AuthenticationFailed(_)
                | ServerError::NotAuthorized(_)
                | ServerError::BatchTooLarge { .. }
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Unavailable(_) | ServerError::Internal(_))
    }

    /// Returns the HTTP status this error is reported with.
    pub fn status(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::AuthenticationFailed(_) => 401,
            ServerError::NotAuthorized(_) => 403,
            ServerError::BatchTooLarge { .. } => 413,
            ServerError::Unavailable(_) => 503,
            ServerError::Internal(_) => 500,
        }
    }

    /// Renders the error as a response body with a top-level `errors` array.
    pub fn to_body(&self) -> Value {
        json!({ "errors": [{ "message": self.to_string() }] })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Unavailable("down".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert!(!ServerError::Internal("oops".into()).is_client_error());
    }

    #[test]
    fn statuses_match_classification() {
        let errors = [
            ServerError::InvalidRequest("bad".into()),
            ServerError::AuthenticationFailed("missing".into()),
            ServerError::NotAuthorized("expired".into()),
            ServerError::BatchTooLarge { size: 5, max: 1 },
            ServerError::Unavailable("down".into()),
            ServerError::Internal("oops".into()),
        ];
        for err in errors {
            assert_eq!(err.is_client_error(), (400..500).contains(&err.status()));
            assert_eq!(err.is_server_error(), err.status() >= 500);
        }
    }

    #[test]
    fn body_carries_message() {
        let err = ServerError::BatchTooLarge { size: 10, max: 5 };
        assert_eq!(err.to_body()["errors"][0]["message"], "batch too large: 10 > 5");
    }
}
