//! Durable replication progress.

use std::sync::Arc;

use serde_json::Value;
use tidesync_protocol::{checkpoint_key, Checkpoint, Document, EndpointId, Revision};
use tidesync_store::LocalStore;

use crate::error::ReplicationResult;

/// Reads and writes the checkpoint document of one endpoint.
///
/// The checkpoint lives in the local store under a reserved key, so it
/// survives restarts and is never replicated. Every setter is a local
/// write with a fresh local revision.
pub struct CheckpointStore<S: LocalStore> {
    store: Arc<S>,
    endpoint: EndpointId,
    key: String,
}

impl<S: LocalStore> CheckpointStore<S> {
    /// Creates a checkpoint store for `endpoint`.
    pub fn new(store: Arc<S>, endpoint: EndpointId) -> Self {
        let key = checkpoint_key(&endpoint);
        Self {
            store,
            endpoint,
            key,
        }
    }

    /// Returns the endpoint this store belongs to.
    pub fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    /// Returns the primary key of the checkpoint document.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Loads the checkpoint, or the zero checkpoint if none was written.
    pub async fn load(&self) -> ReplicationResult<Checkpoint> {
        Ok(self.read().await?.1)
    }

    /// Returns the last acknowledged push sequence (0 if none).
    pub async fn get_push_checkpoint(&self) -> ReplicationResult<u64> {
        Ok(self.load().await?.last_push_sequence)
    }

    /// Persists the push sequence. Values not above the stored one are
    /// ignored, so the sequence never moves backwards.
    pub async fn set_push_checkpoint(&self, sequence: u64) -> ReplicationResult<()> {
        self.advance_push(sequence, || Ok(())).await
    }

    /// Returns the last acknowledged pull cursor.
    pub async fn get_pull_checkpoint(&self) -> ReplicationResult<Option<Value>> {
        Ok(self.load().await?.last_pull_cursor)
    }

    /// Persists the pull cursor.
    pub async fn set_pull_checkpoint(&self, cursor: Value) -> ReplicationResult<()> {
        self.advance_pull(cursor, || Ok(())).await
    }

    /// Like [`set_push_checkpoint`](Self::set_push_checkpoint), but `guard`
    /// runs between the read and the write and can veto the write.
    pub(crate) async fn advance_push(
        &self,
        sequence: u64,
        guard: impl Fn() -> ReplicationResult<()>,
    ) -> ReplicationResult<()> {
        let (previous, mut checkpoint) = self.read().await?;
        if sequence <= checkpoint.last_push_sequence {
            return Ok(());
        }
        checkpoint.last_push_sequence = sequence;
        guard()?;
        self.write(previous, &checkpoint).await
    }

    /// Like [`set_pull_checkpoint`](Self::set_pull_checkpoint), with a
    /// `guard` checked right before the write.
    pub(crate) async fn advance_pull(
        &self,
        cursor: Value,
        guard: impl Fn() -> ReplicationResult<()>,
    ) -> ReplicationResult<()> {
        let (previous, mut checkpoint) = self.read().await?;
        if checkpoint.last_pull_cursor.as_ref() == Some(&cursor) {
            return Ok(());
        }
        checkpoint.last_pull_cursor = Some(cursor);
        guard()?;
        self.write(previous, &checkpoint).await
    }

    async fn read(&self) -> ReplicationResult<(Option<Revision>, Checkpoint)> {
        match self.store.get(&self.key).await? {
            Some(doc) if !doc.deleted => {
                let checkpoint = Checkpoint::from_body(&doc.body)?;
                Ok((doc.parsed_revision(), checkpoint))
            }
            Some(doc) => Ok((doc.parsed_revision(), Checkpoint::default())),
            None => Ok((None, Checkpoint::default())),
        }
    }

    async fn write(&self, previous: Option<Revision>, checkpoint: &Checkpoint) -> ReplicationResult<()> {
        let mut document = Document::new(self.key.clone(), checkpoint.to_body()?);
        document.revision = Revision::next_local(previous.as_ref(), &document.content()).to_string();

        let sequence = self.store.upsert(document).await?;
        tracing::trace!(
            endpoint = %self.endpoint.short(),
            sequence,
            push = checkpoint.last_push_sequence,
            "checkpoint written"
        );
        Ok(())
    }
}
