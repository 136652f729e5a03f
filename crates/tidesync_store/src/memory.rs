//! In-memory local store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tidesync_protocol::{is_reserved_key, Body, ChangeRecord, Document, Revision};
use tokio::sync::broadcast;

use crate::change_feed::ChangeFeed;
use crate::error::{StoreError, StoreResult};
use crate::traits::LocalStore;

#[derive(Default)]
struct State {
    /// Primary key -> (current state, sequence of the latest write).
    documents: BTreeMap<String, (Document, u64)>,
    /// Sequence -> primary key, holding only the latest write per key.
    by_sequence: BTreeMap<u64, String>,
    last_sequence: u64,
    destroyed: bool,
}

/// A [`LocalStore`] held entirely in memory.
///
/// Application writes go through [`put`](MemoryStore::put) and
/// [`remove`](MemoryStore::remove), which derive content-hash revisions.
/// The replication engine writes through [`LocalStore::upsert`], which
/// stores documents as given.
///
/// # Example
///
/// ```rust,ignore
/// let store = MemoryStore::new();
/// store.put("alice", json!({"id": "alice", "age": 30}))?;
/// let changes = store.changes_since(0, 10).await?;
/// ```
pub struct MemoryStore {
    state: RwLock<State>,
    feed: ChangeFeed,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            feed: ChangeFeed::new(),
        }
    }

    /// Writes `body` as the new state of `primary_key`.
    ///
    /// Non-object values are rejected.
    pub fn put(&self, primary_key: &str, body: Value) -> StoreResult<Document> {
        let Value::Object(body) = body else {
            return Err(StoreError::Backend(format!(
                "document {primary_key} is not an object"
            )));
        };
        self.write_local(primary_key, body, false)
    }

    /// Deletes `primary_key`, leaving a tombstone with its last body.
    ///
    /// Returns `None` if there was no live document.
    pub fn remove(&self, primary_key: &str) -> StoreResult<Option<Document>> {
        let body = {
            let state = self.state.read();
            match state.documents.get(primary_key) {
                Some((doc, _)) if !doc.deleted => doc.body.clone(),
                _ => return Ok(None),
            }
        };
        self.write_local(primary_key, body, true).map(Some)
    }

    /// Returns the current state of `primary_key`, tombstones included.
    pub fn document(&self, primary_key: &str) -> Option<Document> {
        self.state
            .read()
            .documents
            .get(primary_key)
            .map(|(doc, _)| doc.clone())
    }

    /// Returns all live user documents ordered by primary key.
    pub fn documents(&self) -> Vec<Document> {
        self.state
            .read()
            .documents
            .values()
            .filter(|(doc, _)| !doc.deleted && !is_reserved_key(&doc.primary_key))
            .map(|(doc, _)| doc.clone())
            .collect()
    }

    /// Returns the number of live user documents.
    pub fn len(&self) -> usize {
        self.documents().len()
    }

    /// Returns true if there are no live user documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the sequence of the latest write.
    pub fn last_sequence(&self) -> u64 {
        self.state.read().last_sequence
    }

    /// Destroys the store. The change stream closes and every later
    /// operation fails with [`StoreError::Closed`].
    pub fn destroy(&self) {
        self.state.write().destroyed = true;
        self.feed.close();
        tracing::debug!("memory store destroyed");
    }

    /// Returns true if the store was destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.state.read().destroyed
    }

    fn write_local(&self, primary_key: &str, body: Body, deleted: bool) -> StoreResult<Document> {
        let previous = {
            let state = self.state.read();
            if state.destroyed {
                return Err(StoreError::Closed);
            }
            state
                .documents
                .get(primary_key)
                .and_then(|(doc, _)| doc.parsed_revision())
        };

        let mut document = Document::new(primary_key, body).with_deleted(deleted);
        let revision = Revision::next_local(previous.as_ref(), &document.content());
        document.revision = revision.to_string();

        self.commit(document.clone())?;
        Ok(document)
    }

    fn commit(&self, document: Document) -> StoreResult<u64> {
        let mut state = self.state.write();
        if state.destroyed {
            return Err(StoreError::Closed);
        }

        state.last_sequence += 1;
        let sequence = state.last_sequence;
        let key = document.primary_key.clone();

        if let Some((_, old)) = state.documents.insert(key.clone(), (document.clone(), sequence)) {
            state.by_sequence.remove(&old);
        }
        state.by_sequence.insert(sequence, key);

        // Emitted under the write lock so subscribers see commit order.
        self.feed.emit(ChangeRecord::new(sequence, document));
        Ok(sequence)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn changes_since(&self, sequence: u64, limit: usize) -> StoreResult<Vec<ChangeRecord>> {
        let state = self.state.read();
        if state.destroyed {
            return Err(StoreError::Closed);
        }

        let records = state
            .by_sequence
            .range(sequence.saturating_add(1)..)
            .take(limit)
            .filter_map(|(seq, key)| {
                state
                    .documents
                    .get(key)
                    .map(|(doc, _)| ChangeRecord::new(*seq, doc.clone()))
            })
            .collect();
        Ok(records)
    }

    async fn upsert(&self, document: Document) -> StoreResult<u64> {
        self.commit(document)
    }

    async fn get(&self, primary_key: &str) -> StoreResult<Option<Document>> {
        if self.is_destroyed() {
            return Err(StoreError::Closed);
        }
        Ok(self.document(primary_key))
    }

    fn subscribe(&self) -> StoreResult<broadcast::Receiver<ChangeRecord>> {
        self.feed.subscribe()
    }
}
