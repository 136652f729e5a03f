//! Transport layer abstraction for replication requests.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{ReplicationError, ReplicationResult};

/// Direction of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestKind {
    /// A pull page request.
    Pull,
    /// A push batch request.
    Push,
}

/// A request to the remote endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    /// Endpoint URL.
    pub url: String,
    /// Headers snapshotted at the start of the run.
    pub headers: BTreeMap<String, String>,
    /// Body produced by the caller's request builder.
    pub body: Value,
    /// Pull or push.
    pub kind: RequestKind,
}

/// A transport carries replication requests to the remote.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing, etc.).
/// The engine imposes no timeout; transports that need one apply their own.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a request and returns the decoded response body.
    async fn send(&self, request: RemoteRequest) -> ReplicationResult<Value>;
}

/// A scripted transport for testing.
///
/// Responses are queued per request kind and consumed in order; when the
/// queue is empty the fallback for that kind is used. Every request is
/// recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    scripted: Mutex<BTreeMap<RequestKind, VecDeque<ReplicationResult<Value>>>>,
    fallback: Mutex<BTreeMap<RequestKind, ReplicationResult<Value>>>,
    requests: Mutex<Vec<RemoteRequest>>,
}

impl MockTransport {
    /// Creates a mock transport with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for the next request of `kind`.
    pub fn enqueue(&self, kind: RequestKind, response: ReplicationResult<Value>) {
        self.scripted
            .lock()
            .entry(kind)
            .or_default()
            .push_back(response);
    }

    /// Sets the response used for `kind` once its queue is exhausted.
    pub fn set_fallback(&self, kind: RequestKind, response: ReplicationResult<Value>) {
        self.fallback.lock().insert(kind, response);
    }

    /// Returns all recorded requests.
    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of recorded requests of `kind`.
    pub fn request_count(&self, kind: RequestKind) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.kind == kind)
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: RemoteRequest) -> ReplicationResult<Value> {
        let kind = request.kind;
        self.requests.lock().push(request);

        if let Some(response) = self
            .scripted
            .lock()
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }

        self.fallback
            .lock()
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Err(ReplicationError::Protocol("no mock response set".into())))
    }
}
