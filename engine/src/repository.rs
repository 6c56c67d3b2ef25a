//! Document store facade.
//!
//! The one entry point domain services use for reads and writes. Writes made
//! while offline are queued and answered optimistically; online writes go to
//! the local store with compare-and-swap and are re-merged on a lost race.
//! Reads never fail: problems are logged and surface as empty results.

use crate::{
    connectivity::Connectivity,
    document::{merge_fields, DocumentInput, Payload},
    error::Result,
    queue::{OfflineQueue, QueuedOperation, QueuedWrite, ReplayTarget},
    retry::{retry, RetryPolicy},
    store::{Databases, Edit, LocalStore},
    Document, DocumentId, Error, Revision, Schema,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Attempts a write gets before a lost compare-and-swap becomes
/// [`Error::Conflict`].
pub const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Result of a single write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteResult {
    /// The stored document, or the optimistic one when queued
    pub document: Document,
    /// Whether the write waits in the offline queue
    pub queued: bool,
}

impl WriteResult {
    fn stored(document: Document) -> Self {
        Self {
            document,
            queued: false,
        }
    }

    fn queued(document: Document) -> Self {
        Self {
            document,
            queued: true,
        }
    }
}

/// A bulk entry that could not be written.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkFailure {
    pub id: DocumentId,
    pub error: Error,
}

/// Result of a bulk write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteResult {
    pub written: Vec<Document>,
    pub failed: Vec<BulkFailure>,
    pub queued: bool,
}

impl BulkWriteResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// CRUD facade over the local databases.
pub struct Repository {
    databases: Databases,
    schema: Arc<Schema>,
    connectivity: Arc<dyn Connectivity>,
    queue: Arc<OfflineQueue>,
}

impl Repository {
    pub fn new(
        databases: Databases,
        schema: Arc<Schema>,
        connectivity: Arc<dyn Connectivity>,
        queue: Arc<OfflineQueue>,
    ) -> Self {
        Self {
            databases,
            schema,
            connectivity,
            queue,
        }
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    fn offline(&self) -> bool {
        !self.connectivity.is_online()
    }

    /// Create a document. Writing an id that already exists merges the
    /// given fields over the stored ones.
    pub async fn create(&self, db: &str, input: DocumentInput) -> Result<WriteResult> {
        let store = self.databases.get(db)?;
        self.schema.validate(&input.kind, &input.payload)?;

        let mut input = input;
        let id = input.ensure_id();
        if self.offline() {
            let document = optimistic(&input, &id);
            self.queue.enqueue(QueuedOperation::new(
                db,
                QueuedWrite::Create { document: input },
            ));
            return Ok(WriteResult::queued(document));
        }

        let document = self
            .write_merged(&*store, &id, Some(&input.kind), &input.payload)
            .await?;
        Ok(WriteResult::stored(document))
    }

    /// Merge `patch` into an existing document.
    pub async fn update(&self, db: &str, id: &str, patch: Payload) -> Result<WriteResult> {
        let store = self.databases.get(db)?;

        if self.offline() {
            let base = self.offline_base(&*store, db, id).await?;
            self.schema.validate_patch(&base.kind, &patch)?;

            let mut document = base;
            document.payload = merge_fields(&document.payload, &patch);
            document.rev = Revision::provisional();
            document.updated_at = Some(crate::now_millis());
            self.queue.enqueue(QueuedOperation::new(
                db,
                QueuedWrite::Update {
                    id: id.to_string(),
                    patch,
                },
            ));
            return Ok(WriteResult::queued(document));
        }

        let document = self.write_merged(&*store, id, None, &patch).await?;
        Ok(WriteResult::stored(document))
    }

    /// Tombstone a document.
    pub async fn delete(&self, db: &str, id: &str) -> Result<WriteResult> {
        let store = self.databases.get(db)?;

        if self.offline() {
            let mut document = self.offline_base(&*store, db, id).await?;
            document.payload = Payload::new();
            document.deleted = true;
            document.rev = Revision::provisional();
            document.updated_at = Some(crate::now_millis());
            self.queue.enqueue(QueuedOperation::new(
                db,
                QueuedWrite::Delete { id: id.to_string() },
            ));
            return Ok(WriteResult::queued(document));
        }

        let document = self.delete_online(&*store, id).await?;
        Ok(WriteResult::stored(document))
    }

    /// Write a batch. Every entry is validated before any is written; offline
    /// the batch is queued as one operation.
    pub async fn bulk_write(&self, db: &str, inputs: Vec<DocumentInput>) -> Result<BulkWriteResult> {
        let store = self.databases.get(db)?;
        for input in &inputs {
            self.schema.validate(&input.kind, &input.payload)?;
        }

        let mut inputs = inputs;
        let ids: Vec<DocumentId> = inputs.iter_mut().map(|i| i.ensure_id()).collect();

        if self.offline() {
            let written = inputs
                .iter()
                .zip(&ids)
                .map(|(input, id)| optimistic(input, id))
                .collect();
            self.queue.enqueue(QueuedOperation::new(
                db,
                QueuedWrite::BulkWrite { documents: inputs },
            ));
            return Ok(BulkWriteResult {
                written,
                failed: Vec::new(),
                queued: true,
            });
        }

        let mut result = BulkWriteResult::default();
        for (input, id) in inputs.iter().zip(ids) {
            match self
                .write_merged(&*store, &id, Some(&input.kind), &input.payload)
                .await
            {
                Ok(document) => result.written.push(document),
                Err(error) => {
                    tracing::warn!(db, id = %id, "Bulk entry failed: {}", error);
                    result.failed.push(BulkFailure { id, error });
                }
            }
        }
        Ok(result)
    }

    /// Current revision of a live document.
    pub async fn get_by_id(&self, db: &str, id: &str) -> Option<Document> {
        let result: Result<Option<Document>> = async { self.databases.get(db)?.get(id).await }.await;
        result.unwrap_or_else(|e| {
            tracing::warn!(db, id, "Read failed: {}", e);
            None
        })
    }

    /// Every live document.
    pub async fn get_all(&self, db: &str) -> Vec<Document> {
        let result: Result<Vec<Document>> = async { self.databases.get(db)?.all().await }.await;
        result.unwrap_or_else(|e| {
            tracing::warn!(db, "Read failed: {}", e);
            Vec::new()
        })
    }

    /// Live documents matching `predicate`.
    pub async fn find<P>(&self, db: &str, predicate: P) -> Vec<Document>
    where
        P: Fn(&Document) -> bool,
    {
        let mut docs = self.get_all(db).await;
        docs.retain(|d| predicate(d));
        docs
    }

    /// Create or merge-update `id` with compare-and-swap, re-merging over
    /// the newest base after a lost race. `create_kind` is `None` when the
    /// document must already exist.
    async fn write_merged(
        &self,
        store: &dyn LocalStore,
        id: &str,
        create_kind: Option<&str>,
        fields: &Payload,
    ) -> Result<Document> {
        let schema = &*self.schema;
        let result = retry(
            &RetryPolicy::write_conflict(MAX_WRITE_ATTEMPTS),
            move |attempt| async move {
                if attempt > 1 {
                    tracing::debug!(db = store.name(), id, attempt, "Re-merging after write conflict");
                }
                let edit = match (store.get(id).await?, create_kind) {
                    (Some(current), _) => {
                        let merged = merge_fields(&current.payload, fields);
                        schema.validate(&current.kind, &merged)?;
                        Edit::update(&current, merged)
                    }
                    (None, Some(kind)) => Edit::create(id, kind, fields.clone()),
                    (None, None) => return Err(Error::NotFound(id.to_string())),
                };
                store.put(edit).await
            },
            Error::is_write_conflict,
        )
        .await;
        result.map_err(|e| exhausted(id, e))
    }

    async fn delete_online(&self, store: &dyn LocalStore, id: &str) -> Result<Document> {
        let result = retry(
            &RetryPolicy::write_conflict(MAX_WRITE_ATTEMPTS),
            move |_| async move {
                let current = store
                    .get(id)
                    .await?
                    .ok_or_else(|| Error::NotFound(id.to_string()))?;
                store.put(Edit::delete(&current)).await
            },
            Error::is_write_conflict,
        )
        .await;
        result.map_err(|e| exhausted(id, e))
    }

    /// What an offline write builds on: the stored document, or one still
    /// waiting in the queue.
    async fn offline_base(&self, store: &dyn LocalStore, db: &str, id: &str) -> Result<Document> {
        if let Some(document) = store.get(id).await? {
            return Ok(document);
        }
        self.queue
            .queued_input(db, id)
            .map(|input| optimistic(&input, id))
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}

#[async_trait]
impl ReplayTarget for Repository {
    async fn replay(&self, op: &QueuedOperation) -> Result<()> {
        let store = self.databases.get(&op.database)?;
        match &op.write {
            QueuedWrite::Create { document } => {
                let mut input = document.clone();
                let id = input.ensure_id();
                self.write_merged(&*store, &id, Some(&input.kind), &input.payload)
                    .await?;
            }
            QueuedWrite::Update { id, patch } => {
                self.write_merged(&*store, id, None, patch).await?;
            }
            QueuedWrite::Delete { id } => match self.delete_online(&*store, id).await {
                Ok(_) => {}
                Err(Error::NotFound(_)) => {
                    tracing::debug!(db = %op.database, id = %id, "Replayed delete already applied");
                }
                Err(e) => return Err(e),
            },
            QueuedWrite::BulkWrite { documents } => {
                let mut first_error = None;
                for document in documents {
                    let mut input = document.clone();
                    let id = input.ensure_id();
                    if let Err(e) = self
                        .write_merged(&*store, &id, Some(&input.kind), &input.payload)
                        .await
                    {
                        first_error.get_or_insert(e);
                    }
                }
                if let Some(e) = first_error {
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

fn exhausted(id: &str, error: Error) -> Error {
    if error.is_write_conflict() {
        tracing::warn!(id, attempts = MAX_WRITE_ATTEMPTS, "Write conflict not resolved");
        Error::Conflict {
            id: id.to_string(),
            attempts: MAX_WRITE_ATTEMPTS,
        }
    } else {
        error
    }
}

fn optimistic(input: &DocumentInput, id: &str) -> Document {
    let mut document = Document::new(
        id,
        input.kind.clone(),
        input.payload.clone(),
        crate::now_millis(),
    );
    document.rev = Revision::provisional();
    document
}
