//! Single replication batches.
//!
//! A push batch reads the local changes feed from the push checkpoint, asks
//! the remote which of those leaf revisions it lacks and sends exactly those.
//! A pull batch does the same in the other direction. Both advance their
//! checkpoint only after the batch landed, so an interrupted batch is simply
//! repeated; replicating a revision twice is a no-op.

use crate::{
    error::Result,
    remote::{wire::DocRef, Remote},
    store::{ChangesPage, LocalStore, RevsDiff},
    Sequence,
};
use std::time::Duration;

/// What a batch moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Change entries read from the source feed
    pub changes: usize,
    /// Documents actually transferred
    pub docs: usize,
    /// Source changes still waiting after this batch
    pub pending: u64,
    pub last_seq: Sequence,
}

impl BatchOutcome {
    /// The source feed had nothing new.
    pub fn is_idle(&self) -> bool {
        self.changes == 0
    }
}

/// Checkpoint key for one direction against one remote.
pub fn checkpoint_key(direction: &str, url: &str) -> String {
    format!("{direction}:{url}")
}

fn wanted(page: &ChangesPage) -> RevsDiff {
    page.results
        .iter()
        .map(|change| (change.id.clone(), change.revs.clone()))
        .collect()
}

/// Send one batch of local changes to `remote`. Local documents are only
/// read; the push checkpoint is the only local state written.
pub async fn push_batch(
    local: &dyn LocalStore,
    remote: &dyn Remote,
    checkpoint: &str,
    limit: usize,
) -> Result<BatchOutcome> {
    let since = local.checkpoint(checkpoint).await?;
    let page = local.changes(since, limit).await?;
    if page.results.is_empty() {
        return Ok(BatchOutcome {
            last_seq: since,
            ..Default::default()
        });
    }

    let missing = remote.revs_diff(wanted(&page)).await?;
    let mut docs = Vec::new();
    for (id, revs) in &missing {
        for rev in revs {
            match local.get_revision(id, rev).await? {
                Some(doc) if !doc.rev.is_provisional() => docs.push(doc),
                _ => tracing::debug!(db = local.name(), id = %id, rev = %rev, "Leaf gone before push"),
            }
        }
    }

    let sent = docs.len();
    if !docs.is_empty() {
        remote.bulk_docs(docs).await?;
    }
    local.set_checkpoint(checkpoint, page.last_seq).await?;

    tracing::debug!(
        db = local.name(),
        changes = page.results.len(),
        sent,
        pending = page.pending,
        "Pushed batch"
    );
    Ok(BatchOutcome {
        changes: page.results.len(),
        docs: sent,
        pending: page.pending,
        last_seq: page.last_seq,
    })
}

/// Bring one batch of remote changes into `local`. Nothing is sent to the
/// remote except the reads needed to fetch documents.
pub async fn pull_batch(
    local: &dyn LocalStore,
    remote: &dyn Remote,
    checkpoint: &str,
    limit: usize,
    wait: Option<Duration>,
) -> Result<BatchOutcome> {
    let since = local.checkpoint(checkpoint).await?;
    let page = remote.changes(since, limit, wait).await?;
    if page.results.is_empty() {
        return Ok(BatchOutcome {
            last_seq: since.max(page.last_seq),
            ..Default::default()
        });
    }

    let missing = local.revs_diff(wanted(&page)).await?;
    let refs: Vec<DocRef> = missing
        .into_iter()
        .flat_map(|(id, revs)| {
            revs.into_iter().map(move |rev| DocRef {
                id: id.clone(),
                rev,
            })
        })
        .collect();

    let docs = if refs.is_empty() {
        Vec::new()
    } else {
        remote.bulk_get(refs).await?
    };
    let fetched = docs.len();
    local.insert_replicated(docs).await?;
    local.set_checkpoint(checkpoint, page.last_seq).await?;

    tracing::debug!(
        db = local.name(),
        changes = page.results.len(),
        fetched,
        pending = page.pending,
        "Pulled batch"
    );
    Ok(BatchOutcome {
        changes: page.results.len(),
        docs: fetched,
        pending: page.pending,
        last_seq: page.last_seq,
    })
}
