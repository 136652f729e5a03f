//! Test fixtures and replication helpers.
//!
//! The fixtures speak the reference server's wire format: pull requests
//! carry a keyset cursor of `{id, updatedAt}`, pull responses hold rows at
//! `data.pull`, and push requests carry a `rows` array.

use std::sync::Arc;

use serde_json::{json, Value};
use tidesync_engine::{PullOptions, PushOptions, ReplicationOptions, ReplicationSession};
use tidesync_server::{ServerConfig, SyncServer};
use tidesync_store::{FieldSchema, FieldType, MemoryStore};

use crate::transports::{loopback, LoopbackTransport};

/// Endpoint URL used by fixtures.
pub const TEST_URL: &str = "https://sync.test/graphql";

/// Builds a human document.
pub fn human(id: &str, first_name: &str, age: i64) -> Value {
    json!({ "id": id, "firstName": first_name, "age": age })
}

/// Builds `count` humans with ids `h000`, `h001`, ...
pub fn humans(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| human(&format!("h{i:03}"), &format!("name-{i}"), (i % 100) as i64))
        .collect()
}

/// Schema accepted for pulled humans.
pub fn human_schema() -> FieldSchema {
    FieldSchema::new()
        .field("id", FieldType::String)
        .field("firstName", FieldType::String)
        .field("age", FieldType::Integer)
        .field("updatedAt", FieldType::Integer)
        .required(["id", "firstName", "age"])
        .range("age", 0, 150)
        .closed()
}

/// Pull options for the reference server.
pub fn pull_options(page_size: usize) -> PullOptions {
    PullOptions::new(move |cursor| {
        json!({
            "operation": "pull",
            "cursor": cursor.cloned().unwrap_or(Value::Null),
            "limit": page_size,
        })
    })
    .with_data_path("data.pull")
    .with_cursor_builder(|row| json!({ "id": row["id"], "updatedAt": row["updatedAt"] }))
    .with_page_size(page_size)
}

/// Push options for the reference server.
pub fn push_options(batch_size: usize) -> PushOptions {
    PushOptions::new(|rows| json!({ "operation": "push", "rows": rows }))
        .with_batch_size(batch_size)
}

/// Options replicating in both directions against [`TEST_URL`].
pub fn replication_options() -> ReplicationOptions {
    ReplicationOptions::new(TEST_URL)
        .with_pull(pull_options(10))
        .with_push(push_options(5))
}

/// A local store wired to a reference server.
pub struct TestReplication {
    /// The remote side.
    pub server: Arc<SyncServer>,
    /// The local side.
    pub store: Arc<MemoryStore>,
    /// Transport from the local side to the server.
    pub transport: Arc<LoopbackTransport>,
}

impl TestReplication {
    /// Creates an empty store and an empty server.
    pub fn new() -> Self {
        Self::with_server(Arc::new(SyncServer::new(ServerConfig::default())))
    }

    /// Creates an empty store replicating against `server`.
    pub fn with_server(server: Arc<SyncServer>) -> Self {
        let transport = loopback(&server);
        Self {
            server,
            store: Arc::new(MemoryStore::new()),
            transport,
        }
    }

    /// Starts a session with the given options.
    pub fn start(
        &self,
        options: ReplicationOptions,
    ) -> ReplicationSession<MemoryStore, LoopbackTransport> {
        ReplicationSession::start(
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            options,
        )
        .expect("failed to start replication session")
    }

    /// Writes a document locally, keyed by its `id`.
    pub fn put_local(&self, document: Value) {
        let id = document["id"]
            .as_str()
            .expect("document needs a string id")
            .to_string();
        self.store.put(&id, document).expect("local write failed");
    }

    /// Number of requests the server has seen.
    pub fn request_count(&self) -> usize {
        self.transport.client().request_count()
    }
}

impl Default for TestReplication {
    fn default() -> Self {
        Self::new()
    }
}
