//! Change feed for observing committed writes.
//!
//! The change feed publishes a [`ChangeRecord`] for every write after it
//! becomes visible, enabling:
//! - Replication (live push triggers)
//! - Incremental query maintenance
//! - Reactive UI updates
//!
//! # Usage
//!
//! ```rust,ignore
//! let feed = ChangeFeed::new();
//! let mut rx = feed.subscribe().unwrap();
//!
//! feed.emit(record);
//! let received = rx.recv().await?;
//! ```

use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use tidesync_protocol::ChangeRecord;
use tokio::sync::broadcast;

/// Default number of records buffered per subscriber.
const DEFAULT_CAPACITY: usize = 1024;

/// A change feed that distributes committed writes to subscribers.
///
/// The change feed:
/// - Emits only committed writes
/// - Preserves commit order
/// - Supports multiple subscribers
/// - Is thread-safe
///
/// Subscribers that fall behind by more than the capacity observe a
/// `Lagged` error and skip ahead; the change scan on the store remains the
/// source of truth.
pub struct ChangeFeed {
    sender: RwLock<Option<broadcast::Sender<ChangeRecord>>>,
}

impl ChangeFeed {
    /// Creates a new change feed.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a change feed buffering `capacity` records per subscriber.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    /// Subscribes to the change feed.
    ///
    /// Returns a receiver for all future change records, or
    /// [`StoreError::Closed`] if the feed was closed.
    pub fn subscribe(&self) -> StoreResult<broadcast::Receiver<ChangeRecord>> {
        self.sender
            .read()
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or(StoreError::Closed)
    }

    /// Emits a change record to all subscribers.
    ///
    /// Emitting with no subscribers is a no-op.
    pub fn emit(&self, record: ChangeRecord) {
        if let Some(tx) = self.sender.read().as_ref() {
            let _ = tx.send(record);
        }
    }

    /// Closes the feed. Current subscribers drain buffered records and then
    /// observe `Closed`.
    pub fn close(&self) {
        self.sender.write().take();
    }

    /// Returns true if the feed was closed.
    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use tidesync_protocol::Document;
    use tokio::sync::broadcast::error::RecvError;

    fn record(sequence: u64, key: &str) -> ChangeRecord {
        ChangeRecord::new(sequence, Document::new(key, Map::new()))
    }

    #[tokio::test]
    async fn emit_and_receive() {
        let feed = ChangeFeed::new();
        let mut rx = feed.subscribe().unwrap();

        feed.emit(record(1, "a"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.sequence, 1);
        assert_eq!(received.primary_key(), "a");
    }

    #[tokio::test]
    async fn multiple_subscribers() {
        let feed = ChangeFeed::new();
        let mut rx1 = feed.subscribe().unwrap();
        let mut rx2 = feed.subscribe().unwrap();
        assert_eq!(feed.subscriber_count(), 2);

        feed.emit(record(1, "a"));

        assert_eq!(rx1.recv().await.unwrap().sequence, 1);
        assert_eq!(rx2.recv().await.unwrap().sequence, 1);
    }

    #[test]
    fn emit_without_subscribers() {
        let feed = ChangeFeed::new();
        feed.emit(record(1, "a"));
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn close_ends_subscriptions() {
        let feed = ChangeFeed::new();
        let mut rx = feed.subscribe().unwrap();

        feed.emit(record(1, "a"));
        feed.close();

        assert!(feed.is_closed());
        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert!(matches!(rx.recv().await, Err(RecvError::Closed)));
        assert!(matches!(feed.subscribe(), Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn slow_subscriber_lags() {
        let feed = ChangeFeed::with_capacity(2);
        let mut rx = feed.subscribe().unwrap();

        for i in 1..=5 {
            feed.emit(record(i, "a"));
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(_))));
        assert_eq!(rx.recv().await.unwrap().sequence, 4);
    }
}
