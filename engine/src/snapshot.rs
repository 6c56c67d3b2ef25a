//! Snapshot types for persisting and restoring a [`MemoryStore`].
//!
//! Snapshots are the bridge between the in-memory store and whatever storage
//! the host uses. They serialize deterministically: documents and checkpoints
//! are kept in `BTreeMap`s so two snapshots of the same state produce the
//! same JSON.

use crate::{
    error::Result,
    revtree::Leaves,
    store::{Entry, Inner, LocalStore, MemoryStore},
    DatabaseName, DocumentId, Error, Schema, Sequence,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// One document's leaves and the sequence of its last change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub leaves: Leaves,
    pub seq: Sequence,
}

/// A point-in-time copy of one local database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Database the snapshot was taken from
    pub database: DatabaseName,
    /// Store update sequence at snapshot time
    pub update_seq: Sequence,
    /// Every document, tombstones included
    pub documents: BTreeMap<DocumentId, SnapshotEntry>,
    /// Replication checkpoints by key
    #[serde(default)]
    pub checkpoints: BTreeMap<String, Sequence>,
}

impl StoreSnapshot {
    /// Create a new empty snapshot.
    pub fn new(database: impl Into<DatabaseName>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            database: database.into(),
            update_seq: 0,
            documents: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
        }
    }

    /// Count documents, tombstones included.
    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    /// Count documents whose current revision is not deleted.
    pub fn live_count(&self) -> usize {
        self.documents
            .values()
            .filter(|e| !e.leaves.current().deleted)
            .count()
    }

    pub fn conflicted_count(&self) -> usize {
        self.documents
            .values()
            .filter(|e| e.leaves.is_conflicted())
            .count()
    }

    /// Check internal consistency and validate live documents against a
    /// schema.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        for (id, entry) in &self.documents {
            let current = entry.leaves.current();
            if &current.id != id {
                return Err(Error::InvalidSnapshot(format!(
                    "document '{}' stored under '{}'",
                    current.id, id
                )));
            }
            if entry.seq > self.update_seq {
                return Err(Error::InvalidSnapshot(format!(
                    "document '{}' at sequence {} beyond update sequence {}",
                    id, entry.seq, self.update_seq
                )));
            }
            if !current.deleted {
                schema.validate(&current.kind, &current.payload)?;
            }
        }
        Ok(())
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

/// Metadata about a snapshot (without the full data).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub format_version: u32,
    pub database: DatabaseName,
    pub update_seq: Sequence,
    pub document_count: usize,
    pub conflicted_count: usize,
}

impl From<&StoreSnapshot> for SnapshotMetadata {
    fn from(snapshot: &StoreSnapshot) -> Self {
        Self {
            format_version: snapshot.format_version,
            database: snapshot.database.clone(),
            update_seq: snapshot.update_seq,
            document_count: snapshot.document_count(),
            conflicted_count: snapshot.conflicted_count(),
        }
    }
}

impl MemoryStore {
    /// Copy the whole store out.
    pub async fn export_state(&self) -> StoreSnapshot {
        let inner = self.inner.read().await;
        StoreSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            database: self.name().to_string(),
            update_seq: inner.update_seq,
            documents: inner
                .entries
                .iter()
                .map(|(id, entry)| {
                    (
                        id.clone(),
                        SnapshotEntry {
                            leaves: entry.leaves.clone(),
                            seq: entry.seq,
                        },
                    )
                })
                .collect(),
            checkpoints: inner
                .checkpoints
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }

    /// Replace the store's contents with `snapshot`.
    ///
    /// The snapshot must come from a database with the same name. Watchers
    /// are woken with the restored update sequence.
    pub async fn import_state(&self, snapshot: StoreSnapshot) -> Result<()> {
        if snapshot.database != self.name() {
            return Err(Error::InvalidSnapshot(format!(
                "snapshot of '{}' cannot be imported into '{}'",
                snapshot.database,
                self.name()
            )));
        }
        snapshot.validate(&Schema::permissive())?;

        let restored = Inner {
            entries: snapshot
                .documents
                .into_iter()
                .map(|(id, e)| {
                    (
                        id,
                        Entry {
                            leaves: e.leaves,
                            seq: e.seq,
                        },
                    )
                })
                .collect(),
            update_seq: snapshot.update_seq,
            checkpoints: snapshot.checkpoints.into_iter().collect(),
        };

        let seq = restored.update_seq;
        *self.inner.write().await = restored;
        self.publish(seq);
        tracing::debug!(db = self.name(), update_seq = seq, "Imported store snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Payload;
    use crate::schema::{FieldType, KindSchema};
    use crate::store::Edit;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new("employees");
        store
            .put(Edit::create("emp-1", "employee", payload(json!({"name": "Ada"}))))
            .await
            .unwrap();
        store
            .put(Edit::create("emp-2", "employee", payload(json!({"name": "Grace"}))))
            .await
            .unwrap();
        store.set_checkpoint("push:memory://hr", 2).await.unwrap();
        store
    }

    #[tokio::test]
    async fn export_then_import() {
        let store = seeded().await;
        let snapshot = store.export_state().await;
        assert_eq!(snapshot.document_count(), 2);
        assert_eq!(snapshot.update_seq, 2);

        let restored = MemoryStore::new("employees");
        restored
            .import_state(StoreSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap())
            .await
            .unwrap();
        assert_eq!(restored.len().await, 2);
        assert_eq!(
            restored.get("emp-1").await.unwrap(),
            store.get("emp-1").await.unwrap()
        );
        assert_eq!(restored.checkpoint("push:memory://hr").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn restored_store_continues_its_sequence() {
        let restored = MemoryStore::new("employees");
        restored
            .import_state(seeded().await.export_state().await)
            .await
            .unwrap();
        assert_eq!(*restored.watch().borrow(), 2);

        restored
            .put(Edit::create("emp-3", "employee", Payload::new()))
            .await
            .unwrap();
        let page = restored.changes(2, 10).await.unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].id, "emp-3");
        assert_eq!(page.last_seq, 3);
    }

    #[tokio::test]
    async fn import_into_other_database_is_rejected() {
        let snapshot = seeded().await.export_state().await;
        let other = MemoryStore::new("payroll");
        let result = other.import_state(snapshot).await;
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
        assert!(other.is_empty().await);
    }

    #[tokio::test]
    async fn validate_against_schema() {
        let snapshot = seeded().await.export_state().await;
        let schema = Schema::new(1).with_kind(
            "employee",
            KindSchema::new().required("name", FieldType::String),
        );
        assert!(snapshot.validate(&schema).is_ok());

        let strict = Schema::new(1).with_kind(
            "employee",
            KindSchema::new().required("salary", FieldType::Float),
        );
        assert!(matches!(
            snapshot.validate(&strict),
            Err(Error::MissingRequiredField(_))
        ));
    }

    #[tokio::test]
    async fn sequence_beyond_update_seq_is_invalid() {
        let mut snapshot = seeded().await.export_state().await;
        snapshot.update_seq = 1;
        assert!(matches!(
            snapshot.validate(&Schema::permissive()),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_metadata() {
        let snapshot = seeded().await.export_state().await;
        let metadata: SnapshotMetadata = (&snapshot).into();
        assert_eq!(metadata.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(metadata.database, "employees");
        assert_eq!(metadata.update_seq, 2);
        assert_eq!(metadata.document_count, 2);
        assert_eq!(metadata.conflicted_count, 0);
    }

    #[test]
    fn reject_future_format_version() {
        let json = r#"{
            "formatVersion": 999,
            "database": "employees",
            "updateSeq": 0,
            "documents": {}
        }"#;

        let result = StoreSnapshot::from_json(json);
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }
}
