//! Offline operation queue.
//!
//! Writes issued while disconnected are buffered here, one FIFO per database,
//! and replayed in order once connectivity returns. Delivery is
//! at-least-once: an operation stays queued until its replay succeeded, so a
//! drain interrupted mid-operation replays it again next time.

use crate::{
    document::{DocumentInput, Payload},
    error::Result,
    DatabaseName, DocumentId, Error, Timestamp,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// Version of the queue snapshot format.
pub const QUEUE_FORMAT_VERSION: u32 = 1;

/// The write a queued operation will perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum QueuedWrite {
    Create { document: DocumentInput },
    Update { id: DocumentId, patch: Payload },
    Delete { id: DocumentId },
    BulkWrite { documents: Vec<DocumentInput> },
}

impl QueuedWrite {
    pub fn kind(&self) -> &'static str {
        match self {
            QueuedWrite::Create { .. } => "create",
            QueuedWrite::Update { .. } => "update",
            QueuedWrite::Delete { .. } => "delete",
            QueuedWrite::BulkWrite { .. } => "bulkWrite",
        }
    }
}

/// A buffered write awaiting replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub id: String,
    pub database: DatabaseName,
    pub enqueued_at: Timestamp,
    pub write: QueuedWrite,
}

impl QueuedOperation {
    pub fn new(database: impl Into<DatabaseName>, write: QueuedWrite) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            database: database.into(),
            enqueued_at: crate::now_millis(),
            write,
        }
    }
}

/// Where queued operations are replayed.
#[async_trait]
pub trait ReplayTarget: Send + Sync {
    async fn replay(&self, op: &QueuedOperation) -> Result<()>;
}

/// Outcome of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub requeued: usize,
}

/// Serializable copy of the queue, for hosts that persist it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub format_version: u32,
    /// Operations grouped by database, each group in enqueue order
    pub operations: Vec<QueuedOperation>,
}

impl QueueSnapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;
        if snapshot.format_version > QUEUE_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported queue format version: {} (max supported: {})",
                snapshot.format_version, QUEUE_FORMAT_VERSION
            )));
        }
        Ok(snapshot)
    }
}

/// Per-database FIFO of writes made while offline.
#[derive(Debug, Default)]
pub struct OfflineQueue {
    queues: DashMap<DatabaseName, VecDeque<QueuedOperation>>,
    drain_lock: Mutex<()>,
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail of the operation's database queue.
    pub fn enqueue(&self, op: QueuedOperation) {
        tracing::debug!(
            db = %op.database,
            op_id = %op.id,
            kind = op.write.kind(),
            "Queued offline write"
        );
        self.queues
            .entry(op.database.clone())
            .or_default()
            .push_back(op);
    }

    /// Operations waiting for `database`.
    pub fn len(&self, database: &str) -> usize {
        self.queues.get(database).map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }

    /// Copy of the operations waiting for `database`, oldest first.
    pub fn pending(&self, database: &str) -> Vec<QueuedOperation> {
        self.queues
            .get(database)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The newest queued input that creates `id` in `database`, if any.
    pub fn queued_input(&self, database: &str, id: &str) -> Option<DocumentInput> {
        let queue = self.queues.get(database)?;
        queue.iter().rev().find_map(|op| match &op.write {
            QueuedWrite::Create { document } if document.id.as_deref() == Some(id) => {
                Some(document.clone())
            }
            QueuedWrite::BulkWrite { documents } => documents
                .iter()
                .find(|d| d.id.as_deref() == Some(id))
                .cloned(),
            _ => None,
        })
    }

    /// Replay every database's queue against `target`.
    ///
    /// Only the operations queued when the drain started are replayed. A
    /// failing operation moves to the tail of its queue and is retried on the
    /// next drain; the drain itself carries on with the next operation.
    pub async fn drain(&self, target: &dyn ReplayTarget) -> DrainReport {
        let _guard = self.drain_lock.lock().await;
        let mut report = DrainReport::default();

        let mut databases: Vec<DatabaseName> =
            self.queues.iter().map(|q| q.key().clone()).collect();
        databases.sort();

        for database in databases {
            let count = self.len(&database);
            for _ in 0..count {
                let Some(op) = self.front(&database) else {
                    break;
                };

                match target.replay(&op).await {
                    Ok(()) => {
                        self.pop_front(&database);
                        report.applied += 1;
                    }
                    Err(e) => {
                        let err = Error::QueueReplay {
                            op_id: op.id.clone(),
                            kind: op.write.kind().to_string(),
                            database: database.clone(),
                            reason: e.to_string(),
                        };
                        tracing::warn!("{}; re-queued", err);
                        if let Some(failed) = self.pop_front(&database) {
                            self.enqueue(failed);
                        }
                        report.requeued += 1;
                    }
                }
                tokio::task::yield_now().await;
            }
        }

        if report.applied > 0 || report.requeued > 0 {
            tracing::info!(
                applied = report.applied,
                requeued = report.requeued,
                "Offline queue drained"
            );
        }
        report
    }

    /// Copy the whole queue out.
    pub fn export(&self) -> QueueSnapshot {
        let mut databases: Vec<DatabaseName> =
            self.queues.iter().map(|q| q.key().clone()).collect();
        databases.sort();

        let operations = databases
            .iter()
            .flat_map(|db| self.pending(db))
            .collect();
        QueueSnapshot {
            format_version: QUEUE_FORMAT_VERSION,
            operations,
        }
    }

    /// Append a snapshot's operations after whatever is already queued.
    pub fn import(&self, snapshot: QueueSnapshot) -> usize {
        let count = snapshot.operations.len();
        for op in snapshot.operations {
            self.queues
                .entry(op.database.clone())
                .or_default()
                .push_back(op);
        }
        count
    }

    fn front(&self, database: &str) -> Option<QueuedOperation> {
        self.queues.get(database)?.front().cloned()
    }

    fn pop_front(&self, database: &str) -> Option<QueuedOperation> {
        self.queues.get_mut(database)?.pop_front()
    }
}
