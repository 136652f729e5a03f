//! Server-side document table.
//!
//! Every write stamps the row with the next value of a logical clock, so
//! `(updatedAt, id)` gives a total order that pull pages walk with a keyset
//! cursor. Deletions keep the row as a tombstone so clients learn about
//! them.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use serde_json::{Map, Value};

use crate::error::{ServerError, ServerResult};

/// Field holding the primary key.
pub const ID_FIELD: &str = "id";
/// Field holding the logical write time.
pub const UPDATED_AT_FIELD: &str = "updatedAt";
/// Field marking a tombstone.
pub const DELETED_FIELD: &str = "deleted";

/// Keyset position: the last row a client has seen.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PullCursor {
    /// Logical write time of the row.
    pub updated_at: u64,
    /// Primary key of the row.
    pub id: String,
}

impl PullCursor {
    /// Reads a cursor of the form `{"id": .., "updatedAt": ..}`.
    ///
    /// `null` means "from the beginning".
    pub fn from_value(value: &Value) -> ServerResult<Option<Self>> {
        if value.is_null() {
            return Ok(None);
        }
        let id = value
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| ServerError::InvalidRequest("cursor needs a string id".into()))?;
        let updated_at = value
            .get(UPDATED_AT_FIELD)
            .and_then(Value::as_u64)
            .ok_or_else(|| ServerError::InvalidRequest("cursor needs an integer updatedAt".into()))?;
        Ok(Some(Self {
            updated_at,
            id: id.to_string(),
        }))
    }
}

#[derive(Debug, Clone)]
struct StoredRow {
    fields: Map<String, Value>,
    updated_at: u64,
    deleted: bool,
}

/// In-memory document table ordered by write time.
#[derive(Debug, Default)]
pub struct DocumentTable {
    rows: BTreeMap<String, StoredRow>,
    by_time: BTreeSet<(u64, String)>,
    clock: u64,
}

impl DocumentTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current logical time.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Number of live (non-deleted) rows.
    pub fn live_count(&self) -> usize {
        self.rows.values().filter(|row| !row.deleted).count()
    }

    /// Number of rows including tombstones.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if nothing was ever written.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Writes a row coming from a client or a test fixture.
    ///
    /// The row needs a string `id`. `deleted` marks a tombstone and
    /// `updatedAt` is always reassigned.
    pub fn write(&mut self, row: Value) -> ServerResult<u64> {
        let Value::Object(mut fields) = row else {
            return Err(ServerError::InvalidRequest("row must be an object".into()));
        };
        let id = match fields.get(ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => return Err(ServerError::InvalidRequest("row needs a string id".into())),
        };
        let deleted = match fields.remove(DELETED_FIELD) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(deleted)) => deleted,
            Some(other) => {
                return Err(ServerError::InvalidRequest(format!(
                    "deleted must be a boolean, got {other}"
                )))
            }
        };
        fields.remove(UPDATED_AT_FIELD);

        self.clock += 1;
        let updated_at = self.clock;
        if let Some(previous) = self.rows.get(&id) {
            self.by_time.remove(&(previous.updated_at, id.clone()));
        }
        self.by_time.insert((updated_at, id.clone()));
        self.rows.insert(
            id,
            StoredRow {
                fields,
                updated_at,
                deleted,
            },
        );
        Ok(updated_at)
    }

    /// Marks a row deleted. Returns false if it was never written.
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(row) = self.rows.get(id) else {
            return false;
        };
        let mut fields = row.fields.clone();
        fields.insert(DELETED_FIELD.to_string(), Value::Bool(true));
        self.write(Value::Object(fields)).is_ok()
    }

    /// Returns the wire form of a row, tombstones included.
    pub fn get(&self, id: &str) -> Option<Value> {
        self.rows.get(id).map(wire_row)
    }

    /// Returns up to `limit` rows strictly after `cursor` in
    /// `(updatedAt, id)` order.
    pub fn page_after(&self, cursor: Option<&PullCursor>, limit: usize) -> Vec<Value> {
        let keys: Vec<&(u64, String)> = match cursor {
            Some(cursor) => {
                let after = (cursor.updated_at, cursor.id.clone());
                self.by_time
                    .range((Bound::Excluded(after), Bound::Unbounded))
                    .take(limit)
                    .collect()
            }
            None => self.by_time.iter().take(limit).collect(),
        };

        keys.into_iter()
            .filter_map(|(_, id)| self.rows.get(id))
            .map(wire_row)
            .collect()
    }
}

fn wire_row(row: &StoredRow) -> Value {
    let mut fields = row.fields.clone();
    fields.insert(UPDATED_AT_FIELD.to_string(), Value::from(row.updated_at));
    fields.insert(DELETED_FIELD.to_string(), Value::Bool(row.deleted));
    Value::Object(fields)
}
