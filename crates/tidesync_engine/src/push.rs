//! The push cycle.
//!
//! Scans the local change stream from the push checkpoint, skips checkpoint
//! documents and documents pulled from this endpoint, and sends one request
//! per batch. The checkpoint moves only after the remote acknowledged the
//! batch.

use tidesync_protocol::{coalesce, is_reserved_key};
use tidesync_store::LocalStore;
use tracing::debug;

use crate::config::PushOptions;
use crate::context::RunContext;
use crate::error::ReplicationResult;
use crate::state::PushOutcome;
use crate::transport::{RequestKind, Transport};

/// Pushes until the change scan is exhausted.
///
/// `outcome` counts acknowledged batches, including those acknowledged
/// before a failure.
pub(crate) async fn push_cycle<S: LocalStore, T: Transport>(
    ctx: &RunContext<S, T>,
    push: &PushOptions,
    outcome: &mut PushOutcome,
) -> ReplicationResult<()> {
    let mut position = ctx.checkpoints.get_push_checkpoint().await?;

    loop {
        ctx.ensure_active()?;
        let records = ctx.store.changes_since(position, push.batch_size).await?;
        let Some(highest) = records.iter().map(|record| record.sequence).max() else {
            break;
        };
        let exhausted = records.len() < push.batch_size;

        let mut handled = 0usize;
        let mut rows = Vec::with_capacity(records.len());
        for record in coalesce(records) {
            if is_reserved_key(record.primary_key()) {
                continue;
            }
            handled += 1;

            if ctx.tagger.was_tagged_by(&record.document.revision) {
                outcome.suppressed += 1;
                continue;
            }

            let row = record.document.to_wire(&ctx.options.deleted_field);
            match &push.modifier {
                Some(modifier) => match modifier(row) {
                    Some(row) => rows.push(row),
                    None => outcome.dropped += 1,
                },
                None => rows.push(row),
            }
        }

        if !rows.is_empty() {
            let body = (push.request_builder)(&rows);
            ctx.send(RequestKind::Push, body).await?;
            outcome.requests += 1;
            outcome.sent += rows.len() as u64;
            debug!(
                endpoint = %ctx.tagger.endpoint().short(),
                rows = rows.len(),
                through = highest,
                "pushed batch"
            );
            for row in rows {
                ctx.events.sent(row);
            }
        }

        // Batches holding only checkpoint writes move the scan position
        // without writing, so a quiet run leaves the store untouched.
        if handled > 0 {
            ctx.checkpoints
                .advance_push(highest, || ctx.ensure_active())
                .await?;
        }
        position = highest;

        if exhausted {
            break;
        }
    }

    Ok(())
}
