//! The local store contract.

use crate::error::StoreResult;
use async_trait::async_trait;
use tidesync_protocol::{ChangeRecord, Document};
use tokio::sync::broadcast;

/// A local document store the replication engine can drive.
///
/// Implementations own the sequence counter. Every successful
/// [`upsert`](LocalStore::upsert) becomes visible to
/// [`changes_since`](LocalStore::changes_since) and is then published on the
/// change stream.
///
/// The change stream is shared: any number of consumers may subscribe, and
/// none of them may assume exclusive consumption. When the store is
/// destroyed the stream closes, which replication sessions treat as an
/// implicit cancellation.
#[async_trait]
pub trait LocalStore: Send + Sync + 'static {
    /// Returns changes with sequence greater than `sequence`, ordered by
    /// sequence, at most `limit` records. Each primary key appears at most
    /// once, at the sequence of its latest write.
    async fn changes_since(&self, sequence: u64, limit: usize) -> StoreResult<Vec<ChangeRecord>>;

    /// Writes `document` as-is, including its revision and deletion state,
    /// replacing any existing state for its primary key. Returns the sequence
    /// assigned to the write.
    async fn upsert(&self, document: Document) -> StoreResult<u64>;

    /// Reads the current state of a document, tombstones included.
    async fn get(&self, primary_key: &str) -> StoreResult<Option<Document>>;

    /// Subscribes to the live change stream.
    fn subscribe(&self) -> StoreResult<broadcast::Receiver<ChangeRecord>>;
}
