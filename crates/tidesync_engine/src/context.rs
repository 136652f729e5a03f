//! Per-run execution context shared by the pull and push cycles.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tidesync_protocol::EchoTagger;
use tidesync_store::LocalStore;

use crate::checkpoint::CheckpointStore;
use crate::config::ReplicationOptions;
use crate::error::{ReplicationError, ReplicationResult};
use crate::events::ReplicationEvents;
use crate::transport::{RemoteRequest, RequestKind, Transport};

/// Everything one run needs, with headers snapshotted at run start.
pub(crate) struct RunContext<S: LocalStore, T: Transport> {
    pub store: Arc<S>,
    pub transport: Arc<T>,
    pub options: Arc<ReplicationOptions>,
    pub checkpoints: Arc<CheckpointStore<S>>,
    pub tagger: EchoTagger,
    pub events: ReplicationEvents,
    pub headers: BTreeMap<String, String>,
    pub cancelled: Arc<AtomicBool>,
}

impl<S: LocalStore, T: Transport> RunContext<S, T> {
    /// Fails with [`ReplicationError::Cancelled`] once the session stopped.
    pub fn ensure_active(&self) -> ReplicationResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(ReplicationError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sends a request and checks the response for remote errors.
    ///
    /// A response that arrives after cancellation is discarded.
    pub async fn send(&self, kind: RequestKind, body: Value) -> ReplicationResult<Value> {
        let request = RemoteRequest {
            url: self.options.url.clone(),
            headers: self.headers.clone(),
            body,
            kind,
        };

        let response = self.transport.send(request).await?;
        self.ensure_active()?;
        check_remote_errors(&response)?;
        Ok(response)
    }
}

/// Rejects responses carrying a non-empty top-level `errors` array.
fn check_remote_errors(response: &Value) -> ReplicationResult<()> {
    match response.get("errors").and_then(Value::as_array) {
        Some(errors) if !errors.is_empty() => {
            let message = errors
                .iter()
                .map(|err| match err.get("message").and_then(Value::as_str) {
                    Some(message) => message.to_string(),
                    None => err.to_string(),
                })
                .collect::<Vec<_>>()
                .join("; ");
            Err(ReplicationError::Remote(message))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::{PullOptions, PushOptions};
    use crate::transport::MockTransport;
    use tidesync_protocol::EndpointId;
    use tidesync_store::MemoryStore;

    pub const URL: &str = "https://sync.example.com/graphql";

    pub fn context(
        store: &Arc<MemoryStore>,
        transport: &Arc<MockTransport>,
        options: ReplicationOptions,
    ) -> RunContext<MemoryStore, MockTransport> {
        let endpoint = EndpointId::from_url(&options.url);
        RunContext {
            store: Arc::clone(store),
            transport: Arc::clone(transport),
            checkpoints: Arc::new(CheckpointStore::new(Arc::clone(store), endpoint.clone())),
            tagger: EchoTagger::new(endpoint),
            events: ReplicationEvents::new(),
            headers: options.headers.clone(),
            options: Arc::new(options),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pull_options() -> PullOptions {
        PullOptions::new(|cursor| serde_json::json!({ "cursor": cursor }))
    }

    pub fn push_options() -> PushOptions {
        PushOptions::new(|rows| serde_json::json!({ "rows": rows }))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::json;
    use tidesync_store::MemoryStore;

    #[tokio::test]
    async fn send_attaches_url_and_headers() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        transport.set_fallback(RequestKind::Push, Ok(json!({"ok": true})));
        let ctx = context(
            &store,
            &transport,
            ReplicationOptions::new(URL).with_header("x-tenant", "t1"),
        );

        ctx.send(RequestKind::Push, json!({"rows": []})).await.unwrap();

        let request = &transport.requests()[0];
        assert_eq!(request.url, URL);
        assert_eq!(request.headers["x-tenant"], "t1");
        assert_eq!(request.body, json!({"rows": []}));
    }

    #[tokio::test]
    async fn remote_errors_are_rejected() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        transport.set_fallback(
            RequestKind::Pull,
            Ok(json!({"errors": [{"message": "unauthorized"}], "data": null})),
        );
        let ctx = context(&store, &transport, ReplicationOptions::new(URL));

        let err = ctx.send(RequestKind::Pull, json!({})).await.unwrap_err();
        assert_eq!(err, ReplicationError::Remote("unauthorized".into()));
    }

    #[tokio::test]
    async fn empty_errors_array_is_accepted() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        transport.set_fallback(RequestKind::Pull, Ok(json!({"errors": [], "data": {}})));
        let ctx = context(&store, &transport, ReplicationOptions::new(URL));

        assert!(ctx.send(RequestKind::Pull, json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn response_after_cancel_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::new());
        transport.set_fallback(RequestKind::Pull, Ok(json!([])));
        let ctx = context(&store, &transport, ReplicationOptions::new(URL));
        ctx.cancelled.store(true, Ordering::SeqCst);

        let err = ctx.send(RequestKind::Pull, json!({})).await.unwrap_err();
        assert_eq!(err, ReplicationError::Cancelled);
        assert_eq!(transport.request_count(RequestKind::Pull), 1);
    }
}
