//! Documents and change records.

use crate::error::{ProtocolError, ProtocolResult};
use crate::revision::Revision;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// A document body: a JSON object holding the user-visible fields.
pub type Body = Map<String, Value>;

/// Metadata of a stored attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    /// Content digest.
    pub digest: String,
    /// Size in bytes.
    pub length: u64,
    /// MIME type.
    pub content_type: String,
}

/// A document as held by the local store.
///
/// `revision` and `attachments` are internal to the local store and are
/// never sent to a remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Primary key.
    pub primary_key: String,
    /// Revision string (`<height>-<hash>`).
    pub revision: String,
    /// Whether this is a tombstone.
    pub deleted: bool,
    /// User fields, including the primary key field.
    pub body: Body,
    /// Attachment metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attachments: BTreeMap<String, AttachmentMeta>,
}

impl Document {
    /// Creates a live document with an empty revision.
    pub fn new(primary_key: impl Into<String>, body: Body) -> Self {
        Self {
            primary_key: primary_key.into(),
            revision: String::new(),
            deleted: false,
            body,
            attachments: BTreeMap::new(),
        }
    }

    /// Sets the revision.
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// Marks the document as deleted.
    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    /// Parses the revision, if it is well formed.
    pub fn parsed_revision(&self) -> Option<Revision> {
        self.revision.parse().ok()
    }

    /// Returns the content hashed into revisions: the body plus the
    /// deletion state.
    pub fn content(&self) -> Value {
        let mut content = self.body.clone();
        content.insert("_deleted".to_string(), Value::Bool(self.deleted));
        Value::Object(content)
    }

    /// Returns the row sent to a remote: the user body with deletion
    /// expressed through `deleted_field`.
    ///
    /// The revision and attachment metadata are held outside the body and
    /// never reach the wire.
    pub fn to_wire(&self, deleted_field: &str) -> Body {
        let mut row = self.body.clone();
        row.insert(deleted_field.to_string(), Value::Bool(self.deleted));
        row
    }
}

/// Extracts the primary key from `body` at the dotted field `path`.
///
/// String and integer keys are accepted; integers are rendered in decimal.
pub fn primary_key_of(body: &Body, path: &str) -> ProtocolResult<String> {
    let mut segments = path.split('.').filter(|segment| !segment.is_empty());
    let value = segments
        .next()
        .and_then(|first| body.get(first))
        .and_then(|head| segments.try_fold(head, |value, segment| value.get(segment)));
    match value {
        None | Some(Value::Null) => Err(ProtocolError::MissingPrimaryKey {
            path: path.to_string(),
        }),
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        Some(_) => Err(ProtocolError::InvalidPrimaryKey {
            path: path.to_string(),
        }),
    }
}

/// A single entry of the local change stream.
///
/// A change record identifies one document by primary key, carries its
/// current full state (or a tombstone) and the local sequence number at
/// which that state became visible.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    /// Local sequence number.
    pub sequence: u64,
    /// Document state at `sequence`.
    pub document: Document,
}

impl ChangeRecord {
    /// Creates a change record.
    pub fn new(sequence: u64, document: Document) -> Self {
        Self { sequence, document }
    }

    /// Returns the primary key of the changed document.
    pub fn primary_key(&self) -> &str {
        &self.document.primary_key
    }

    /// Returns true if the change is a deletion.
    pub fn is_deletion(&self) -> bool {
        self.document.deleted
    }
}

/// Coalesces change records to one entry per primary key.
///
/// The entry with the highest sequence wins. The result is ordered by
/// primary key so batches are deterministic for a fixed change set.
pub fn coalesce(records: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
    let mut newest: HashMap<String, ChangeRecord> = HashMap::with_capacity(records.len());
    for record in records {
        match newest.get(record.primary_key()) {
            Some(existing) if existing.sequence >= record.sequence => {}
            _ => {
                newest.insert(record.primary_key().to_string(), record);
            }
        }
    }

    let mut out: Vec<ChangeRecord> = newest.into_values().collect();
    out.sort_by(|a, b| a.primary_key().cmp(b.primary_key()));
    out
}
