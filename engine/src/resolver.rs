//! Last-write-wins conflict resolution.
//!
//! For every document with competing leaves the resolver keeps the leaf with
//! the latest valid `updatedAt` and writes its content as a new revision on
//! top of the current one. The new revision lists every losing leaf in its
//! ancestry, so replicas that receive it discard those leaves as well.
//!
//! Field-level edits on a losing leaf are dropped with it; two concurrent
//! edits to different fields of one document keep only one side.

use crate::{
    error::Result,
    store::{Edit, LocalStore},
    Document, Error,
};

/// Pick the surviving leaf.
///
/// A leaf with a valid timestamp beats any leaf without one; among valid
/// timestamps the latest wins; remaining ties go to the higher revision.
pub fn pick_winner(leaves: &[Document]) -> Option<&Document> {
    leaves.iter().max_by(|a, b| {
        a.updated_at
            .is_some()
            .cmp(&b.updated_at.is_some())
            .then_with(|| a.updated_at.cmp(&b.updated_at))
            .then_with(|| a.rev.cmp(&b.rev))
    })
}

/// Resolve every conflicted document in `store`. Returns how many were
/// resolved.
pub async fn resolve_conflicts(store: &dyn LocalStore) -> Result<usize> {
    let conflicted = store.conflicted().await?;
    if conflicted.is_empty() {
        return Ok(0);
    }

    let mut resolved = 0;
    for current in conflicted {
        let mut leaves = Vec::with_capacity(current.conflicts.len() + 1);
        for rev in &current.conflicts {
            match store.get_revision(&current.id, rev).await? {
                Some(leaf) => leaves.push(leaf),
                None => {
                    tracing::debug!(db = store.name(), id = %current.id, rev = %rev, "Conflict leaf vanished");
                }
            }
        }
        leaves.push(current.clone());

        let Some(winner) = pick_winner(&leaves) else {
            continue;
        };

        let edit = Edit {
            id: current.id.clone(),
            base: Some(current.rev.clone()),
            kind: winner.kind.clone(),
            payload: winner.payload.clone(),
            deleted: winner.deleted,
            updated_at: winner.updated_at,
            supersedes: current.conflicts.clone(),
        };

        match store.put(edit).await {
            Ok(doc) => {
                tracing::debug!(
                    db = store.name(),
                    id = %doc.id,
                    winner = %winner.rev,
                    discarded = current.conflicts.len(),
                    "Conflict resolved"
                );
                resolved += 1;
            }
            Err(e @ Error::RevisionMismatch { .. }) => {
                // A concurrent writer moved the document; the next pass
                // sees its new leaves.
                tracing::warn!(db = store.name(), id = %current.id, "Skipped conflict: {}", e);
            }
            Err(e) => return Err(e),
        }
    }

    if resolved > 0 {
        tracing::info!(db = store.name(), resolved, "Resolved conflicts");
    }
    Ok(resolved)
}
