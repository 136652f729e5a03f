//! Request handlers for the pull and push operations.
//!
//! Requests are JSON objects with an `operation` field:
//!
//! ```text
//! {"operation": "pull", "cursor": null | {"id": .., "updatedAt": ..}, "limit": n}
//!   -> {"data": {"pull": [row, ...]}}
//! {"operation": "push", "rows": [row, ...]}
//!   -> {"data": {"push": {"accepted": n}}}
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::debug;

use crate::auth::TokenValidator;
use crate::config::ServerConfig;
use crate::documents::{DocumentTable, PullCursor};
use crate::error::{ServerError, ServerResult};

/// The operations the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Read a page of rows after a cursor.
    Pull,
    /// Write a batch of rows.
    Push,
}

impl Operation {
    /// Reads the `operation` field of a request body.
    pub fn of(body: &Value) -> ServerResult<Self> {
        match body.get("operation").and_then(Value::as_str) {
            Some("pull") => Ok(Operation::Pull),
            Some("push") => Ok(Operation::Push),
            Some(other) => Err(ServerError::InvalidRequest(format!(
                "unknown operation: {other}"
            ))),
            None => Err(ServerError::InvalidRequest("missing operation".into())),
        }
    }
}

/// State shared by all handlers.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// The document table.
    pub documents: RwLock<DocumentTable>,
    validator: Option<TokenValidator>,
}

impl HandlerContext {
    /// Creates a handler context with an empty table.
    pub fn new(config: ServerConfig) -> Self {
        let validator = config.auth.clone().map(TokenValidator::new);
        Self {
            config,
            documents: RwLock::new(DocumentTable::new()),
            validator,
        }
    }

    /// Returns the token validator if authentication is enabled.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }
}

/// Handler for replication requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Authenticates and dispatches a request.
    pub fn handle(&self, headers: &BTreeMap<String, String>, body: &Value) -> ServerResult<Value> {
        if let Some(validator) = self.context.validator() {
            let client = validator.authorize(headers)?;
            debug!(client = %client, "request authorized");
        }

        match Operation::of(body)? {
            Operation::Pull => self.handle_pull(body),
            Operation::Push => self.handle_push(body),
        }
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, body: &Value) -> ServerResult<Value> {
        let cursor = PullCursor::from_value(body.get("cursor").unwrap_or(&Value::Null))?;
        let requested = match body.get("limit") {
            None | Some(Value::Null) => self.context.config.max_pull_batch,
            Some(limit) => limit
                .as_u64()
                .and_then(|limit| usize::try_from(limit).ok())
                .ok_or_else(|| ServerError::InvalidRequest("limit must be a positive integer".into()))?,
        };
        let limit = requested.min(self.context.config.max_pull_batch);

        let rows = self.context.documents.read().page_after(cursor.as_ref(), limit);
        debug!(rows = rows.len(), limit, "served pull page");
        Ok(json!({ "data": { "pull": rows } }))
    }

    /// Handles a push request.
    ///
    /// A row without a string id rejects the batch before anything is
    /// written.
    pub fn handle_push(&self, body: &Value) -> ServerResult<Value> {
        let rows = body
            .get("rows")
            .and_then(Value::as_array)
            .ok_or_else(|| ServerError::InvalidRequest("push needs a rows array".into()))?;

        let max = self.context.config.max_push_batch;
        if rows.len() > max {
            return Err(ServerError::BatchTooLarge {
                size: rows.len(),
                max,
            });
        }
        if let Some(position) = rows
            .iter()
            .position(|row| row.get("id").and_then(Value::as_str).is_none())
        {
            return Err(ServerError::InvalidRequest(format!(
                "row {position} needs a string id"
            )));
        }

        let mut documents = self.context.documents.write();
        for row in rows {
            documents.write(row.clone())?;
        }
        debug!(rows = rows.len(), clock = documents.clock(), "accepted push");
        Ok(json!({ "data": { "push": { "accepted": rows.len() } } }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_handler(config: ServerConfig) -> RequestHandler {
        RequestHandler::new(Arc::new(HandlerContext::new(config)))
    }

    fn pull(cursor: Value, limit: usize) -> Value {
        json!({"operation": "pull", "cursor": cursor, "limit": limit})
    }

    fn push(rows: Value) -> Value {
        json!({"operation": "push", "rows": rows})
    }

    #[test]
    fn pull_empty() {
        let handler = create_handler(ServerConfig::default());
        let response = handler.handle(&BTreeMap::new(), &pull(Value::Null, 10)).unwrap();
        assert_eq!(response, json!({"data": {"pull": []}}));
    }

    #[test]
    fn push_and_pull() {
        let handler = create_handler(ServerConfig::default());
        let response = handler
            .handle(&BTreeMap::new(), &push(json!([{"id": "a"}, {"id": "b", "deleted": true}])))
            .unwrap();
        assert_eq!(response["data"]["push"]["accepted"], 2);

        let response = handler.handle(&BTreeMap::new(), &pull(Value::Null, 10)).unwrap();
        let rows = response["data"]["pull"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["deleted"], true);
    }

    #[test]
    fn pull_pagination() {
        let handler = create_handler(ServerConfig::default());
        let rows: Vec<Value> = (0..5).map(|i| json!({"id": format!("d{i}")})).collect();
        handler.handle_push(&push(Value::Array(rows))).unwrap();

        let page = handler.handle_pull(&pull(Value::Null, 2)).unwrap();
        assert_eq!(page["data"]["pull"].as_array().unwrap().len(), 2);

        let last = page["data"]["pull"][1].clone();
        let page = handler.handle_pull(&pull(last, 10)).unwrap();
        assert_eq!(page["data"]["pull"].as_array().unwrap().len(), 3);
        assert_eq!(page["data"]["pull"][0]["id"], "d2");
    }

    #[test]
    fn pull_limit_is_capped() {
        let handler = create_handler(ServerConfig::new().with_max_pull_batch(2));
        let rows: Vec<Value> = (0..5).map(|i| json!({"id": format!("d{i}")})).collect();
        handler.handle_push(&push(Value::Array(rows))).unwrap();

        let page = handler.handle_pull(&pull(Value::Null, 100)).unwrap();
        assert_eq!(page["data"]["pull"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn push_batch_limit() {
        let handler = create_handler(ServerConfig::new().with_max_push_batch(1));
        let err = handler
            .handle_push(&push(json!([{"id": "a"}, {"id": "b"}])))
            .unwrap_err();
        assert_eq!(err, ServerError::BatchTooLarge { size: 2, max: 1 });
    }

    #[test]
    fn invalid_push_writes_nothing() {
        let handler = create_handler(ServerConfig::default());
        assert!(handler.handle_push(&push(json!([{"id": "a"}, {"name": "x"}]))).is_err());
        assert!(handler.context.documents.read().is_empty());
    }

    #[test]
    fn unknown_operation() {
        let handler = create_handler(ServerConfig::default());
        let err = handler
            .handle(&BTreeMap::new(), &json!({"operation": "drop"}))
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn auth_is_enforced() {
        let handler = create_handler(ServerConfig::new().with_auth(b"secret".to_vec()));
        let err = handler
            .handle(&BTreeMap::new(), &pull(Value::Null, 10))
            .unwrap_err();
        assert!(matches!(err, ServerError::AuthenticationFailed(_)));

        let token = handler
            .context
            .validator()
            .unwrap()
            .create_token("device")
            .unwrap();
        let headers = BTreeMap::from([(
            "authorization".to_string(),
            crate::auth::bearer(&token),
        )]);
        assert!(handler.handle(&headers, &pull(Value::Null, 10)).is_ok());
    }
}
