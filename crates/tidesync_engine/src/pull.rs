//! The pull cycle.
//!
//! Pages remote rows into the local store. Every stored row carries an
//! echo-tagged revision for this endpoint and unconditionally replaces the
//! local state of its primary key. The cursor advances only after a page
//! has been applied.

use serde_json::Value;
use tidesync_protocol::{primary_key_of, Body, Document, Revision};
use tidesync_store::LocalStore;
use tracing::{debug, warn};

use crate::config::PullOptions;
use crate::context::RunContext;
use crate::error::{ReplicationError, ReplicationResult};
use crate::state::PullOutcome;
use crate::transport::{RequestKind, Transport};

/// Pulls until a page returns fewer than `page_size` rows.
///
/// `outcome` counts what was applied, including pages applied before a
/// failure.
pub(crate) async fn pull_cycle<S: LocalStore, T: Transport>(
    ctx: &RunContext<S, T>,
    pull: &PullOptions,
    outcome: &mut PullOutcome,
) -> ReplicationResult<()> {
    let mut cursor = ctx.checkpoints.get_pull_checkpoint().await?;

    loop {
        ctx.ensure_active()?;
        let body = (pull.request_builder)(cursor.as_ref());
        let response = ctx.send(RequestKind::Pull, body).await?;
        let rows = extract_rows(pull, &response)?;
        outcome.pages += 1;

        for raw in &rows {
            apply_row(ctx, pull, raw, outcome).await?;
        }

        if let Some(last) = rows.last() {
            let next = match &pull.cursor_builder {
                Some(builder) => builder(last),
                None => last.clone(),
            };
            ctx.checkpoints
                .advance_pull(next.clone(), || ctx.ensure_active())
                .await?;
            cursor = Some(next);
        }

        debug!(
            endpoint = %ctx.tagger.endpoint().short(),
            page = outcome.pages,
            rows = rows.len(),
            "pulled page"
        );

        if rows.len() < pull.page_size {
            break;
        }
    }

    Ok(())
}

async fn apply_row<S: LocalStore, T: Transport>(
    ctx: &RunContext<S, T>,
    pull: &PullOptions,
    raw: &Value,
    outcome: &mut PullOutcome,
) -> ReplicationResult<()> {
    let Value::Object(row) = raw else {
        reject(ctx, outcome, ReplicationError::validation(None, "pulled row is not an object"));
        return Ok(());
    };

    let mut row: Body = match &pull.modifier {
        Some(modifier) => match modifier(row.clone()) {
            Some(row) => row,
            None => {
                outcome.dropped += 1;
                return Ok(());
            }
        },
        None => row.clone(),
    };

    let deleted = matches!(row.remove(&ctx.options.deleted_field), Some(Value::Bool(true)));

    let primary_key = match primary_key_of(&row, &ctx.options.primary_path) {
        Ok(key) => key,
        Err(e) => {
            reject(ctx, outcome, ReplicationError::validation(None, e.to_string()));
            return Ok(());
        }
    };

    if !deleted {
        if let Err(e) = ctx.options.validator.validate(&row) {
            reject(
                ctx,
                outcome,
                ReplicationError::validation(Some(primary_key), e.to_string()),
            );
            return Ok(());
        }
    }

    ctx.ensure_active()?;
    let previous = ctx
        .store
        .get(&primary_key)
        .await?
        .and_then(|doc| doc.parsed_revision());

    let mut document = Document::new(primary_key, row).with_deleted(deleted);
    document.revision =
        Revision::next_pulled(previous.as_ref(), &ctx.tagger, &document.content()).to_string();

    ctx.ensure_active()?;
    ctx.store.upsert(document.clone()).await?;
    outcome.received += 1;
    ctx.events.received(document);
    Ok(())
}

fn reject<S: LocalStore, T: Transport>(
    ctx: &RunContext<S, T>,
    outcome: &mut PullOutcome,
    error: ReplicationError,
) {
    warn!(endpoint = %ctx.tagger.endpoint().short(), error = %error, "pulled row rejected");
    outcome.rejected += 1;
    ctx.events.error(error);
}

/// Locates the row array in a pull response.
///
/// Order of precedence: the custom extractor, the configured dotted data
/// path, then the default shape (a bare array, or the first field of a
/// top-level `data` object).
fn extract_rows(pull: &PullOptions, response: &Value) -> ReplicationResult<Vec<Value>> {
    if let Some(extractor) = &pull.response_extractor {
        return extractor(response).ok_or_else(|| {
            ReplicationError::Protocol("response extractor found no rows".into())
        });
    }

    let rows = match &pull.data_path {
        Some(path) => path
            .split('.')
            .filter(|segment| !segment.is_empty())
            .try_fold(response, |value, segment| value.get(segment)),
        None => match response {
            Value::Array(_) => Some(response),
            _ => response
                .get("data")
                .and_then(Value::as_object)
                .and_then(|data| data.values().next()),
        },
    };

    match rows {
        Some(Value::Array(rows)) => Ok(rows.clone()),
        _ => Err(ReplicationError::Protocol(match &pull.data_path {
            Some(path) => format!("no row array at '{path}'"),
            None => "response contains no row array".to_string(),
        })),
    }
}
