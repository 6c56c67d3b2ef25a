//! Document envelope stored in every replica.

use crate::{DocumentId, Revision, Timestamp};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Field map carried by a document.
pub type Payload = Map<String, Value>;

/// Number of ancestor revisions a document remembers.
pub const REVISION_HISTORY_LIMIT: usize = 100;

/// A revision of a document.
///
/// The envelope (`id`, `rev`, `kind`) is all the engine looks at; the payload
/// belongs to whoever registered the kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Stable unique identifier
    pub id: DocumentId,
    /// Revision of this version of the document
    pub rev: Revision,
    /// Kind tag selecting the payload schema
    pub kind: String,
    /// Domain fields
    #[serde(default)]
    pub payload: Payload,
    /// When the document was first written (milliseconds since epoch)
    #[serde(default, deserialize_with = "lenient_timestamp_or_zero")]
    pub created_at: Timestamp,
    /// When this revision was written. `None` when missing or malformed.
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<Timestamp>,
    /// Tombstone flag
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    /// Competing leaf revisions awaiting conflict resolution
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Revision>,
    /// Ancestor revisions, newest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revisions: Vec<Revision>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Document {
    /// Build the first revision of a document.
    pub fn new(
        id: impl Into<DocumentId>,
        kind: impl Into<String>,
        payload: Payload,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            rev: Revision::first(),
            kind: kind.into(),
            payload,
            created_at: timestamp,
            updated_at: Some(timestamp),
            deleted: false,
            conflicts: Vec::new(),
            revisions: Vec::new(),
        }
    }

    /// Build the revision that follows this one.
    pub fn successor(&self, payload: Payload, updated_at: Option<Timestamp>) -> Self {
        let mut revisions = Vec::with_capacity(self.revisions.len() + 1);
        revisions.push(self.rev.clone());
        revisions.extend(self.revisions.iter().cloned());
        revisions.truncate(REVISION_HISTORY_LIMIT);

        Self {
            id: self.id.clone(),
            rev: self.rev.next(),
            kind: self.kind.clone(),
            payload,
            created_at: self.created_at,
            updated_at,
            deleted: false,
            conflicts: Vec::new(),
            revisions,
        }
    }

    /// Whether `rev` is an ancestor of this revision.
    pub fn descends_from(&self, rev: &Revision) -> bool {
        self.revisions.contains(rev)
    }

    pub fn is_conflicted(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// What a caller hands to the facade to create or upsert a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInput {
    /// Chosen identifier; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocumentId>,
    pub kind: String,
    #[serde(default)]
    pub payload: Payload,
}

impl DocumentInput {
    pub fn new(kind: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            payload,
        }
    }

    pub fn with_id(mut self, id: impl Into<DocumentId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Fix the identifier so a replay later writes the same document.
    pub(crate) fn ensure_id(&mut self) -> DocumentId {
        self.id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone()
    }
}

/// Overlay `patch` on top of `base`, field by field.
pub fn merge_fields(base: &Payload, patch: &Payload) -> Payload {
    let mut merged = base.clone();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Read a timestamp from a JSON value: integer milliseconds or RFC 3339.
pub fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .and_then(|dt| Timestamp::try_from(dt.timestamp_millis()).ok()),
        _ => None,
    }
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}

fn lenient_timestamp_or_zero<'de, D>(deserializer: D) -> Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_timestamp(deserializer)?.unwrap_or_default())
}
