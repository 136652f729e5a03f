//! Observable replication events.

use tidesync_protocol::{Body, Document};
use tokio::sync::broadcast;

use crate::error::ReplicationError;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast channels for received documents, sent rows, activity
/// transitions and errors.
///
/// Publishing with no subscribers is a no-op. Late subscribers only see
/// events published after they subscribed.
#[derive(Debug, Clone)]
pub struct ReplicationEvents {
    received: broadcast::Sender<Document>,
    sent: broadcast::Sender<Body>,
    active: broadcast::Sender<bool>,
    errors: broadcast::Sender<ReplicationError>,
}

impl ReplicationEvents {
    /// Creates a new set of channels.
    pub fn new() -> Self {
        Self {
            received: broadcast::channel(CHANNEL_CAPACITY).0,
            sent: broadcast::channel(CHANNEL_CAPACITY).0,
            active: broadcast::channel(CHANNEL_CAPACITY).0,
            errors: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribes to documents written by pulls.
    pub fn subscribe_received(&self) -> broadcast::Receiver<Document> {
        self.received.subscribe()
    }

    /// Subscribes to rows acknowledged by the remote.
    pub fn subscribe_sent(&self) -> broadcast::Receiver<Body> {
        self.sent.subscribe()
    }

    /// Subscribes to run start (`true`) and end (`false`) transitions.
    pub fn subscribe_active(&self) -> broadcast::Receiver<bool> {
        self.active.subscribe()
    }

    /// Subscribes to errors.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ReplicationError> {
        self.errors.subscribe()
    }

    pub(crate) fn received(&self, document: Document) {
        let _ = self.received.send(document);
    }

    pub(crate) fn sent(&self, row: Body) {
        let _ = self.sent.send(row);
    }

    pub(crate) fn active(&self, active: bool) {
        let _ = self.active.send(active);
    }

    pub(crate) fn error(&self, error: ReplicationError) {
        let _ = self.errors.send(error);
    }
}

impl Default for ReplicationEvents {
    fn default() -> Self {
        Self::new()
    }
}
