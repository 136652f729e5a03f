//! HTTP transport implementation.
//!
//! This module provides an HTTP-based transport for the replication engine.
//! The actual HTTP client is abstracted via a trait to allow different
//! implementations (reqwest, hyper, etc.). A reqwest-backed client is
//! available behind the `reqwest` feature.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{ReplicationError, ReplicationResult};
use crate::transport::{RemoteRequest, Transport};

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. Errors are
/// connection-level failures; HTTP error statuses are returned as responses.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Sends a POST request with a JSON body.
    async fn post(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Vec<u8>,
    ) -> Result<HttpResponse, String>;
}

/// HTTP-based transport.
///
/// Uses JSON encoding for request/response bodies and forwards the run's
/// headers unchanged.
pub struct HttpTransport<C: HttpClient> {
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(client: C) -> Self {
        Self {
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn fail(&self, err: ReplicationError) -> ReplicationError {
        *self.last_error.write() = Some(err.to_string());
        err
    }
}

#[async_trait]
impl<C: HttpClient> Transport for HttpTransport<C> {
    async fn send(&self, request: RemoteRequest) -> ReplicationResult<Value> {
        let body = serde_json::to_vec(&request.body)
            .map_err(|e| ReplicationError::Protocol(format!("failed to encode request: {e}")))?;

        let response = self
            .client
            .post(&request.url, &request.headers, body)
            .await
            .map_err(|e| self.fail(ReplicationError::transport_retryable(e)))?;

        match response.status {
            200..=299 => {}
            status @ (429 | 500..=599) => {
                return Err(self.fail(ReplicationError::transport_retryable(format!(
                    "server responded with status {status}"
                ))));
            }
            status => {
                return Err(self.fail(ReplicationError::transport_fatal(format!(
                    "server responded with status {status}"
                ))));
            }
        }

        let value = serde_json::from_slice(&response.body).map_err(|e| {
            self.fail(ReplicationError::Protocol(format!(
                "failed to decode response: {e}"
            )))
        })?;

        *self.last_error.write() = None;
        Ok(value)
    }
}

#[cfg(feature = "reqwest")]
mod reqwest_client {
    use super::*;

    /// An [`HttpClient`] backed by `reqwest`.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestClient {
        client: reqwest::Client,
    }

    impl ReqwestClient {
        /// Creates a client with default settings.
        pub fn new() -> Self {
            Self::default()
        }

        /// Wraps an existing client (e.g. one configured with a timeout).
        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl HttpClient for ReqwestClient {
        async fn post(
            &self,
            url: &str,
            headers: &BTreeMap<String, String>,
            body: Vec<u8>,
        ) -> Result<HttpResponse, String> {
            let mut request = self
                .client
                .post(url)
                .header("content-type", "application/json");
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }

            let response = request.body(body).send().await.map_err(|e| e.to_string())?;
            let status = response.status().as_u16();
            let body = response.bytes().await.map_err(|e| e.to_string())?;

            Ok(HttpResponse {
                status,
                body: body.to_vec(),
            })
        }
    }
}

#[cfg(feature = "reqwest")]
pub use reqwest_client::ReqwestClient;
