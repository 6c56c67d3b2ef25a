//! Leaf bookkeeping for a single document id.
//!
//! Every replica keeps, per document, the set of *leaf* revisions: the current
//! one plus any competing branches that replication brought in. Local edits
//! extend the current leaf; replicated revisions either fast-forward a leaf,
//! turn out to be stale, or open a new branch. The current leaf is always
//! picked by the same deterministic rule so that replicas agree on it.

use crate::{Document, Revision};
use serde::{Deserialize, Serialize};

/// What happened when a replicated revision was merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The revision (or a descendant of it) was already present
    Unchanged,
    /// The revision replaced or extended a leaf
    Applied,
}

/// The leaf revisions of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaves {
    /// Winning leaf, stored with an empty `conflicts` list
    current: Document,
    /// Losing leaves
    #[serde(default)]
    others: Vec<Document>,
}

impl Leaves {
    pub fn new(mut doc: Document) -> Self {
        doc.conflicts.clear();
        Self {
            current: doc,
            others: Vec::new(),
        }
    }

    /// The winning leaf with its competing revisions listed in `conflicts`.
    pub fn document(&self) -> Document {
        let mut doc = self.current.clone();
        doc.conflicts = self.others.iter().map(|d| d.rev.clone()).collect();
        doc.conflicts.sort();
        doc
    }

    pub fn current(&self) -> &Document {
        &self.current
    }

    pub fn is_conflicted(&self) -> bool {
        !self.others.is_empty()
    }

    /// Revisions of every leaf, current first.
    pub fn leaf_revs(&self) -> Vec<Revision> {
        std::iter::once(&self.current)
            .chain(self.others.iter())
            .map(|d| d.rev.clone())
            .collect()
    }

    /// Every leaf, current first.
    pub fn leaves(&self) -> impl Iterator<Item = &Document> {
        std::iter::once(&self.current).chain(self.others.iter())
    }

    /// Find a leaf by revision.
    pub fn leaf(&self, rev: &Revision) -> Option<&Document> {
        self.leaves().find(|d| &d.rev == rev)
    }

    /// Whether `rev` is a leaf or an ancestor of one.
    pub fn knows(&self, rev: &Revision) -> bool {
        self.leaves().any(|d| &d.rev == rev || d.descends_from(rev))
    }

    /// Replace the current leaf with a locally minted successor.
    ///
    /// Leaves named in the new revision's ancestry are dropped, which is how a
    /// conflict resolution discards the losing branches.
    pub fn commit(&mut self, next: Document) {
        let mut next = next;
        next.conflicts.clear();
        self.others.retain(|d| !next.descends_from(&d.rev));
        self.current = next;
        self.elect();
    }

    /// Merge a revision produced by another replica.
    pub fn merge(&mut self, incoming: Document) -> MergeOutcome {
        if self.knows(&incoming.rev) {
            return MergeOutcome::Unchanged;
        }

        let mut incoming = incoming;
        incoming.conflicts.clear();

        let mut leaves: Vec<Document> = std::iter::once(self.current.clone())
            .chain(self.others.drain(..))
            .filter(|d| !incoming.descends_from(&d.rev))
            .collect();
        leaves.push(incoming);

        let winner = winning_index(&leaves);
        self.current = leaves.swap_remove(winner);
        self.others = leaves;
        MergeOutcome::Applied
    }

    fn elect(&mut self) {
        if self.others.is_empty() {
            return;
        }
        let mut leaves: Vec<Document> = std::iter::once(self.current.clone())
            .chain(self.others.drain(..))
            .collect();
        let winner = winning_index(&leaves);
        self.current = leaves.swap_remove(winner);
        self.others = leaves;
    }
}

/// Live leaves beat tombstones, then the higher revision wins.
fn winning_index(leaves: &[Document]) -> usize {
    leaves
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            (!a.deleted)
                .cmp(&!b.deleted)
                .then_with(|| a.rev.cmp(&b.rev))
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Payload;
    use serde_json::json;

    fn doc(name: &str) -> Document {
        Document::new(
            "emp-1",
            "employee",
            json!({ "name": name }).as_object().cloned().unwrap(),
            1000,
        )
    }

    fn edit(base: &Document, name: &str, at: u64) -> Document {
        base.successor(
            json!({ "name": name }).as_object().cloned().unwrap(),
            Some(at),
        )
    }

    #[test]
    fn fast_forward_replaces_current() {
        let base = doc("Ada");
        let mut leaves = Leaves::new(base.clone());
        let next = edit(&base, "Ada L.", 2000);

        assert_eq!(leaves.merge(next.clone()), MergeOutcome::Applied);
        assert_eq!(leaves.current().rev, next.rev);
        assert!(!leaves.is_conflicted());
    }

    #[test]
    fn stale_revision_is_ignored() {
        let base = doc("Ada");
        let next = edit(&base, "Ada L.", 2000);
        let mut leaves = Leaves::new(next.clone());

        assert_eq!(leaves.merge(base), MergeOutcome::Unchanged);
        assert_eq!(leaves.merge(next.clone()), MergeOutcome::Unchanged);
        assert_eq!(leaves.current().rev, next.rev);
    }

    #[test]
    fn divergent_edits_open_a_conflict() {
        let base = doc("Ada");
        let local = edit(&base, "local", 2000);
        let remote = edit(&base, "remote", 3000);

        let mut leaves = Leaves::new(local.clone());
        assert_eq!(leaves.merge(remote.clone()), MergeOutcome::Applied);
        assert!(leaves.is_conflicted());

        let expected = std::cmp::max(local.rev.clone(), remote.rev.clone());
        assert_eq!(leaves.current().rev, expected);
        assert_eq!(leaves.document().conflicts.len(), 1);
    }

    #[test]
    fn winner_is_the_same_regardless_of_arrival_order() {
        let base = doc("Ada");
        let a = edit(&base, "a", 2000);
        let b = edit(&base, "b", 3000);

        let mut first = Leaves::new(a.clone());
        first.merge(b.clone());
        let mut second = Leaves::new(b);
        second.merge(a);

        assert_eq!(first.current().rev, second.current().rev);
        assert_eq!(first.document().conflicts, second.document().conflicts);
    }

    #[test]
    fn commit_drops_superseded_leaves() {
        let base = doc("Ada");
        let a = edit(&base, "a", 2000);
        let b = edit(&base, "b", 3000);
        let mut leaves = Leaves::new(a);
        leaves.merge(b.clone());

        let current = leaves.current().clone();
        let loser = leaves.document().conflicts[0].clone();
        let mut resolved = current.successor(Payload::new(), Some(3000));
        resolved.revisions.insert(1, loser);
        leaves.commit(resolved.clone());

        assert!(!leaves.is_conflicted());
        assert_eq!(leaves.current().rev, resolved.rev);
    }

    #[test]
    fn live_leaf_beats_tombstone() {
        let base = doc("Ada");
        let mut tombstone = edit(&base, "gone", 2000);
        tombstone.deleted = true;
        let mut tombstone = tombstone.successor(Payload::new(), Some(2500));
        tombstone.deleted = true;
        let live = edit(&base, "kept", 1500);

        let mut leaves = Leaves::new(tombstone);
        leaves.merge(live.clone());
        assert_eq!(leaves.current().rev, live.rev);
    }
}
