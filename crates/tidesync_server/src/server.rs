//! The reference replication server.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::warn;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, Operation, RequestHandler};

/// A response as it would go over HTTP.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body. Errors carry a top-level `errors` array.
    pub body: Value,
}

/// Request counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Pull requests received, failed ones included.
    pub pull_requests: usize,
    /// Push requests received, failed ones included.
    pub push_requests: usize,
    /// Rows accepted by successful pushes.
    pub rows_accepted: usize,
    /// Requests answered with an error.
    pub failed_requests: usize,
}

/// The reference replication server.
///
/// Holds documents in memory and serves keyset-paginated pulls and batched
/// pushes. Tests can insert and delete rows directly, inject outages and
/// read request counters.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use std::collections::BTreeMap;
/// use tidesync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// server.insert(json!({"id": "h1", "firstName": "Ada"})).unwrap();
///
/// let response = server.respond(
///     &BTreeMap::new(),
///     &json!({"operation": "pull", "cursor": null, "limit": 10}),
/// );
/// assert_eq!(response.status, 200);
/// assert_eq!(response.body["data"]["pull"][0]["id"], "h1");
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    unavailable: AtomicBool,
    fail_next: AtomicUsize,
    stats: Mutex<ServerStats>,
}

impl SyncServer {
    /// Creates a new server with an empty document table.
    pub fn new(config: ServerConfig) -> Self {
        let context = Arc::new(HandlerContext::new(config));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self {
            handler,
            context,
            unavailable: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            stats: Mutex::new(ServerStats::default()),
        }
    }

    /// Handles a request body.
    pub fn handle(&self, headers: &BTreeMap<String, String>, body: &Value) -> ServerResult<Value> {
        {
            let mut stats = self.stats.lock();
            match Operation::of(body) {
                Ok(Operation::Pull) => stats.pull_requests += 1,
                Ok(Operation::Push) => stats.push_requests += 1,
                Err(_) => {}
            }
        }

        let result = self.check_available().and_then(|()| self.handler.handle(headers, body));

        let mut stats = self.stats.lock();
        match &result {
            Ok(response) => {
                if let Some(accepted) = response["data"]["push"]["accepted"].as_u64() {
                    stats.rows_accepted += usize::try_from(accepted).unwrap_or(usize::MAX);
                }
            }
            Err(err) => {
                stats.failed_requests += 1;
                warn!(error = %err, "request failed");
            }
        }
        result
    }

    /// Handles a request and renders the result as an HTTP-style response.
    pub fn respond(&self, headers: &BTreeMap<String, String>, body: &Value) -> ServerResponse {
        match self.handle(headers, body) {
            Ok(body) => ServerResponse { status: 200, body },
            Err(err) => ServerResponse {
                status: err.status(),
                body: err.to_body(),
            },
        }
    }

    /// Writes a row as if another client had pushed it.
    pub fn insert(&self, row: Value) -> ServerResult<u64> {
        self.context.documents.write().write(row)
    }

    /// Marks a row deleted. Returns false if it does not exist.
    pub fn delete(&self, id: &str) -> bool {
        self.context.documents.write().delete(id)
    }

    /// Returns the wire form of a row, tombstones included.
    pub fn document(&self, id: &str) -> Option<Value> {
        self.context.documents.read().get(id)
    }

    /// Number of live rows.
    pub fn live_count(&self) -> usize {
        self.context.documents.read().live_count()
    }

    /// Current logical clock.
    pub fn clock(&self) -> u64 {
        self.context.documents.read().clock()
    }

    /// Issues a bearer token for a client.
    ///
    /// Fails if authentication is not enabled.
    pub fn issue_token(&self, client_id: &str) -> ServerResult<String> {
        self.context
            .validator()
            .ok_or_else(|| ServerError::Internal("authentication is not enabled".into()))?
            .create_token(client_id)
    }

    /// Makes every request fail with 503 until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes the next `count` requests fail with 503.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Returns a snapshot of the request counters.
    pub fn stats(&self) -> ServerStats {
        self.stats.lock().clone()
    }

    fn check_available(&self) -> ServerResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServerError::Unavailable("server is down".into()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ServerError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}
