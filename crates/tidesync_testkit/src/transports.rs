//! Transports for driving sessions in tests.
//!
//! [`LoopbackClient`] plugs the reference server into the engine's
//! [`HttpTransport`], so requests go through the same JSON encoding and
//! status mapping as a real HTTP client. [`FailingTransport`] never
//! reaches a server at all.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tidesync_engine::{
    HttpClient, HttpResponse, HttpTransport, RemoteRequest, ReplicationError, ReplicationResult,
    Transport,
};
use tidesync_server::{ServerError, ServerResponse, SyncServer};

/// Transport type produced by [`loopback`].
pub type LoopbackTransport = HttpTransport<LoopbackClient>;

/// An [`HttpClient`] answering from an in-process [`SyncServer`].
pub struct LoopbackClient {
    server: Arc<SyncServer>,
    latency: Mutex<Option<Duration>>,
    requests: AtomicUsize,
    seen_headers: Mutex<Vec<BTreeMap<String, String>>>,
}

impl LoopbackClient {
    /// Creates a client for `server`.
    pub fn new(server: Arc<SyncServer>) -> Self {
        Self {
            server,
            latency: Mutex::new(None),
            requests: AtomicUsize::new(0),
            seen_headers: Mutex::new(Vec::new()),
        }
    }

    /// Delays every response by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = Some(latency);
        self
    }

    /// Changes the response delay.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Number of requests posted.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Headers of every request posted, in order.
    pub fn seen_headers(&self) -> Vec<BTreeMap<String, String>> {
        self.seen_headers.lock().clone()
    }

    /// The server behind this client.
    pub fn server(&self) -> &Arc<SyncServer> {
        &self.server
    }
}

#[async_trait]
impl HttpClient for LoopbackClient {
    async fn post(
        &self,
        _url: &str,
        headers: &BTreeMap<String, String>,
        body: Vec<u8>,
    ) -> Result<HttpResponse, String> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.seen_headers.lock().push(headers.clone());

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let response = match serde_json::from_slice::<Value>(&body) {
            Ok(request) => self.server.respond(headers, &request),
            Err(e) => {
                let err = ServerError::InvalidRequest(format!("body is not json: {e}"));
                ServerResponse {
                    status: err.status(),
                    body: err.to_body(),
                }
            }
        };

        let body = serde_json::to_vec(&response.body).map_err(|e| e.to_string())?;
        Ok(HttpResponse {
            status: response.status,
            body,
        })
    }
}

/// Wraps a server in an HTTP transport.
pub fn loopback(server: &Arc<SyncServer>) -> Arc<LoopbackTransport> {
    Arc::new(HttpTransport::new(LoopbackClient::new(Arc::clone(server))))
}

/// Wraps a server in an HTTP transport whose responses take `latency`.
pub fn loopback_with_latency(server: &Arc<SyncServer>, latency: Duration) -> Arc<LoopbackTransport> {
    Arc::new(HttpTransport::new(
        LoopbackClient::new(Arc::clone(server)).with_latency(latency),
    ))
}

/// A transport whose endpoint is unreachable.
///
/// Every request fails with a retryable transport error after an optional
/// delay.
#[derive(Default)]
pub struct FailingTransport {
    latency: Option<Duration>,
    attempts: AtomicUsize,
}

impl FailingTransport {
    /// Creates a transport that fails immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport that fails after `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Number of requests attempted.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FailingTransport {
    async fn send(&self, request: RemoteRequest) -> ReplicationResult<Value> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Err(ReplicationError::transport_retryable(format!(
            "{} is unreachable",
            request.url
        )))
    }
}
