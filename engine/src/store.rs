//! Local document stores.
//!
//! A [`LocalStore`] is the replica living next to the application. It is
//! shared by the facade, the conflict resolver and replication, with no
//! locking beyond per-document compare-and-swap on revisions: a write names
//! the revision it was based on and is rejected if that is no longer current.

use crate::{
    document::Payload, error::Result, revtree::Leaves, revtree::MergeOutcome, DatabaseName,
    Document, DocumentId, Error, Revision, Sequence, Timestamp,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// A local edit: create, update, delete or resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub id: DocumentId,
    /// Revision the edit was based on; `None` for a create
    pub base: Option<Revision>,
    pub kind: String,
    pub payload: Payload,
    pub deleted: bool,
    pub updated_at: Option<Timestamp>,
    /// Conflicting leaves this edit replaces
    pub supersedes: Vec<Revision>,
}

impl Edit {
    /// Create a document.
    pub fn create(id: impl Into<DocumentId>, kind: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: id.into(),
            base: None,
            kind: kind.into(),
            payload,
            deleted: false,
            updated_at: Some(crate::now_millis()),
            supersedes: Vec::new(),
        }
    }

    /// Replace the payload of `base`.
    pub fn update(base: &Document, payload: Payload) -> Self {
        Self {
            id: base.id.clone(),
            base: Some(base.rev.clone()),
            kind: base.kind.clone(),
            payload,
            deleted: false,
            updated_at: Some(crate::now_millis()),
            supersedes: Vec::new(),
        }
    }

    /// Tombstone `base`.
    pub fn delete(base: &Document) -> Self {
        Self {
            deleted: true,
            ..Self::update(base, Payload::new())
        }
    }

    pub fn at(mut self, updated_at: Option<Timestamp>) -> Self {
        self.updated_at = updated_at;
        self
    }

    /// Check the edit against the stored current revision and mint the
    /// revision it produces.
    ///
    /// A create over a tombstone continues from the tombstone; any other
    /// create over an existing id, or an update whose base is no longer
    /// current, is rejected.
    pub fn apply_to(self, current: Option<&Document>) -> Result<Document> {
        match (current, self.base.clone()) {
            (None, None) => Ok(mint(self, None)),
            (None, Some(_)) => Err(Error::NotFound(self.id)),
            (Some(current), None) => {
                if !current.deleted {
                    return Err(Error::AlreadyExists(self.id));
                }
                let mut doc = mint(self, Some(current));
                doc.created_at = doc.updated_at.unwrap_or(current.created_at);
                Ok(doc)
            }
            (Some(current), Some(base)) => {
                if current.rev != base {
                    return Err(Error::RevisionMismatch {
                        id: self.id,
                        expected: base,
                        actual: current.rev.clone(),
                    });
                }
                Ok(mint(self, Some(current)))
            }
        }
    }
}

/// One entry of a changes feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub seq: Sequence,
    pub id: DocumentId,
    /// Every leaf revision, current first
    pub revs: Vec<Revision>,
    #[serde(default)]
    pub deleted: bool,
}

/// A page of the changes feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesPage {
    pub results: Vec<Change>,
    /// Sequence to resume from
    pub last_seq: Sequence,
    /// Changes left after this page
    #[serde(default)]
    pub pending: u64,
}

/// Missing revisions, keyed by document id.
pub type RevsDiff = BTreeMap<DocumentId, Vec<Revision>>;

/// The local replica seam.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Database name this store holds.
    fn name(&self) -> &str;

    /// Current revision of a live document, with its conflicts listed.
    async fn get(&self, id: &str) -> Result<Option<Document>>;

    /// A specific leaf revision, live or tombstoned.
    async fn get_revision(&self, id: &str, rev: &Revision) -> Result<Option<Document>>;

    /// Every live document, ordered by id.
    async fn all(&self) -> Result<Vec<Document>>;

    /// Apply a local edit with compare-and-swap on `edit.base`.
    async fn put(&self, edit: Edit) -> Result<Document>;

    /// Merge revisions produced elsewhere, keeping their revision tokens.
    async fn insert_replicated(&self, docs: Vec<Document>) -> Result<usize>;

    /// Which of the given revisions this store does not have.
    async fn revs_diff(&self, revs: RevsDiff) -> Result<RevsDiff>;

    /// Changes after `since`, oldest first.
    async fn changes(&self, since: Sequence, limit: usize) -> Result<ChangesPage>;

    /// Current revisions of documents that carry conflicts.
    async fn conflicted(&self) -> Result<Vec<Document>>;

    /// Replication checkpoint stored under `key`.
    async fn checkpoint(&self, key: &str) -> Result<Sequence>;

    async fn set_checkpoint(&self, key: &str, seq: Sequence) -> Result<()>;

    /// Receiver that observes the store's update sequence.
    fn watch(&self) -> watch::Receiver<Sequence>;
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) leaves: Leaves,
    pub(crate) seq: Sequence,
}

#[derive(Debug, Default)]
pub(crate) struct Inner {
    pub(crate) entries: BTreeMap<DocumentId, Entry>,
    pub(crate) update_seq: Sequence,
    pub(crate) checkpoints: HashMap<String, Sequence>,
}

impl Inner {
    fn bump(&mut self) -> Sequence {
        self.update_seq += 1;
        self.update_seq
    }
}

/// In-memory [`LocalStore`].
#[derive(Debug)]
pub struct MemoryStore {
    name: DatabaseName,
    pub(crate) inner: RwLock<Inner>,
    seq_tx: watch::Sender<Sequence>,
}

impl MemoryStore {
    pub fn new(name: impl Into<DatabaseName>) -> Self {
        let (seq_tx, _) = watch::channel(0);
        Self {
            name: name.into(),
            inner: RwLock::new(Inner::default()),
            seq_tx,
        }
    }

    pub(crate) fn publish(&self, seq: Sequence) {
        self.seq_tx.send_replace(seq);
    }

    /// Number of live documents.
    pub async fn len(&self) -> usize {
        let inner = self.inner.read().await;
        inner
            .entries
            .values()
            .filter(|e| !e.leaves.current().deleted)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn update_seq(&self) -> Sequence {
        self.inner.read().await.update_seq
    }
}

/// Named database handles shared by the facade, resolver and replication.
#[derive(Clone, Default)]
pub struct Databases {
    stores: Arc<BTreeMap<DatabaseName, Arc<dyn LocalStore>>>,
}

impl Databases {
    pub fn new(stores: impl IntoIterator<Item = Arc<dyn LocalStore>>) -> Self {
        let stores = stores
            .into_iter()
            .map(|store| (store.name().to_string(), store))
            .collect();
        Self {
            stores: Arc::new(stores),
        }
    }

    /// Handle for `name`, or [`Error::UnknownDatabase`].
    pub fn get(&self, name: &str) -> Result<Arc<dyn LocalStore>> {
        self.stores
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownDatabase(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Databases {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

fn mint(edit: Edit, current: Option<&Document>) -> Document {
    let mut doc = match current {
        Some(base) => base.successor(edit.payload, edit.updated_at),
        None => {
            let mut doc = Document::new(
                edit.id,
                edit.kind.clone(),
                edit.payload,
                edit.updated_at.unwrap_or_else(crate::now_millis),
            );
            doc.updated_at = edit.updated_at;
            doc
        }
    };
    doc.kind = edit.kind;
    doc.deleted = edit.deleted;
    if !edit.supersedes.is_empty() {
        let at = usize::from(current.is_some());
        for (offset, rev) in edit.supersedes.into_iter().enumerate() {
            doc.revisions.insert(at + offset, rev);
        }
    }
    doc
}

#[async_trait]
impl LocalStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .get(id)
            .filter(|e| !e.leaves.current().deleted)
            .map(|e| e.leaves.document()))
    }

    async fn get_revision(&self, id: &str, rev: &Revision) -> Result<Option<Document>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .get(id)
            .and_then(|e| e.leaves.leaf(rev))
            .cloned())
    }

    async fn all(&self) -> Result<Vec<Document>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .values()
            .filter(|e| !e.leaves.current().deleted)
            .map(|e| e.leaves.document())
            .collect())
    }

    async fn put(&self, edit: Edit) -> Result<Document> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let current = inner.entries.get(&edit.id).map(|e| e.leaves.current());
        let doc = edit.apply_to(current)?;

        let seq = inner.bump();
        match inner.entries.get_mut(&doc.id) {
            Some(entry) => {
                entry.leaves.commit(doc.clone());
                entry.seq = seq;
            }
            None => {
                inner.entries.insert(
                    doc.id.clone(),
                    Entry {
                        leaves: Leaves::new(doc.clone()),
                        seq,
                    },
                );
            }
        }
        let stored = inner
            .entries
            .get(&doc.id)
            .map(|e| e.leaves.document())
            .unwrap_or(doc);
        drop(guard);

        self.publish(seq);
        tracing::trace!(db = %self.name, id = %stored.id, rev = %stored.rev, "Local write");
        Ok(stored)
    }

    async fn insert_replicated(&self, docs: Vec<Document>) -> Result<usize> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let mut applied = 0;

        for doc in docs {
            if doc.rev.is_provisional() {
                return Err(Error::InvalidPayload(format!(
                    "cannot replicate provisional revision of '{}'",
                    doc.id
                )));
            }
            let outcome = match inner.entries.get_mut(&doc.id) {
                Some(entry) => entry.leaves.merge(doc.clone()),
                None => {
                    inner.entries.insert(
                        doc.id.clone(),
                        Entry {
                            leaves: Leaves::new(doc.clone()),
                            seq: 0,
                        },
                    );
                    MergeOutcome::Applied
                }
            };
            if outcome == MergeOutcome::Applied {
                let seq = inner.bump();
                if let Some(entry) = inner.entries.get_mut(&doc.id) {
                    entry.seq = seq;
                }
                applied += 1;
            }
        }

        let seq = inner.update_seq;
        drop(guard);
        if applied > 0 {
            self.publish(seq);
        }
        Ok(applied)
    }

    async fn revs_diff(&self, revs: RevsDiff) -> Result<RevsDiff> {
        let inner = self.inner.read().await;
        let mut missing = RevsDiff::new();
        for (id, wanted) in revs {
            let absent: Vec<Revision> = match inner.entries.get(&id) {
                Some(entry) => wanted
                    .into_iter()
                    .filter(|rev| !entry.leaves.knows(rev))
                    .collect(),
                None => wanted,
            };
            if !absent.is_empty() {
                missing.insert(id, absent);
            }
        }
        Ok(missing)
    }

    async fn changes(&self, since: Sequence, limit: usize) -> Result<ChangesPage> {
        let inner = self.inner.read().await;
        let mut newer: Vec<(&DocumentId, &Entry)> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.seq > since)
            .collect();
        newer.sort_by_key(|(_, e)| e.seq);

        let total = newer.len();
        let results: Vec<Change> = newer
            .into_iter()
            .take(limit)
            .map(|(id, e)| Change {
                seq: e.seq,
                id: id.clone(),
                revs: e.leaves.leaf_revs(),
                deleted: e.leaves.current().deleted,
            })
            .collect();
        let last_seq = results.last().map(|c| c.seq).unwrap_or(since);

        Ok(ChangesPage {
            pending: (total - results.len()) as u64,
            results,
            last_seq,
        })
    }

    async fn conflicted(&self) -> Result<Vec<Document>> {
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .values()
            .filter(|e| e.leaves.is_conflicted())
            .map(|e| e.leaves.document())
            .collect())
    }

    async fn checkpoint(&self, key: &str) -> Result<Sequence> {
        let inner = self.inner.read().await;
        Ok(inner.checkpoints.get(key).copied().unwrap_or(0))
    }

    async fn set_checkpoint(&self, key: &str, seq: Sequence) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.checkpoints.insert(key.to_string(), seq);
        Ok(())
    }

    fn watch(&self) -> watch::Receiver<Sequence> {
        self.seq_tx.subscribe()
    }
}
