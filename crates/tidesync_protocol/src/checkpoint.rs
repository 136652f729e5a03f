//! Checkpoint documents.
//!
//! Replication progress is stored in the local store itself, as an
//! ordinary document under a reserved key prefix. Keys under the
//! reserved prefix are never replicated.

use crate::document::Body;
use crate::endpoint::EndpointId;
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of primary keys that belong to the engine, not the application.
pub const RESERVED_PREFIX: &str = "_local/";

/// Prefix of checkpoint document keys.
pub const CHECKPOINT_PREFIX: &str = "_local/tidesync-checkpoint-";

/// Returns the checkpoint document key for `endpoint`.
pub fn checkpoint_key(endpoint: &EndpointId) -> String {
    format!("{}{}", CHECKPOINT_PREFIX, endpoint.as_str())
}

/// Returns true if `primary_key` lies in the reserved namespace.
pub fn is_reserved_key(primary_key: &str) -> bool {
    primary_key.starts_with(RESERVED_PREFIX)
}

/// Replication progress against one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Checkpoint {
    /// Local sequence up to which all changes have been pushed.
    pub last_push_sequence: u64,
    /// Last remote cursor consumed by a pull.
    pub last_pull_cursor: Option<Value>,
}

impl Checkpoint {
    /// Converts to a document body.
    pub fn to_body(&self) -> ProtocolResult<Body> {
        match serde_json::to_value(self) {
            Ok(Value::Object(body)) => Ok(body),
            Ok(other) => Err(ProtocolError::InvalidCheckpoint(format!(
                "expected object, got {other}"
            ))),
            Err(e) => Err(ProtocolError::InvalidCheckpoint(e.to_string())),
        }
    }

    /// Reads from a document body.
    pub fn from_body(body: &Body) -> ProtocolResult<Self> {
        serde_json::from_value(Value::Object(body.clone()))
            .map_err(|e| ProtocolError::InvalidCheckpoint(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_is_reserved() {
        let key = checkpoint_key(&EndpointId::from_url("https://example.com"));
        assert!(key.starts_with(CHECKPOINT_PREFIX));
        assert!(is_reserved_key(&key));
        assert!(!is_reserved_key("user-1"));
    }

    #[test]
    fn body_layout() {
        let checkpoint = Checkpoint {
            last_push_sequence: 7,
            last_pull_cursor: Some(json!({"id": "x", "updatedAt": 3})),
        };
        let body = checkpoint.to_body().unwrap();
        assert_eq!(
            Value::Object(body.clone()),
            json!({"lastPushSequence": 7, "lastPullCursor": {"id": "x", "updatedAt": 3}})
        );
        assert_eq!(Checkpoint::from_body(&body).unwrap(), checkpoint);
    }

    #[test]
    fn malformed_body_is_rejected() {
        let body = match json!({"lastPushSequence": "seven"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(matches!(
            Checkpoint::from_body(&body),
            Err(ProtocolError::InvalidCheckpoint(_))
        ));
    }
}
