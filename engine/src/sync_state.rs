//! Per-database synchronization status.
//!
//! Each database gets one [`SyncStateHandle`], a watch channel holding its
//! current [`SyncState`]. Sessions and one-shot passes drive transitions;
//! UI collaborators subscribe and read.

use crate::{DatabaseName, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of a database's replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Active,
    Paused,
    Complete,
    Error,
    Denied,
}

impl SyncStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Staying in the same status is always allowed so progress fields can
    /// be refreshed.
    pub fn can_transition_to(self, next: SyncStatus) -> bool {
        use SyncStatus::*;

        if self == next || next == Idle {
            return true;
        }
        match self {
            Idle => next == Active,
            Active => matches!(next, Paused | Complete | Error | Denied),
            Paused => matches!(next, Active | Complete | Error | Denied),
            Error => matches!(next, Active | Denied),
            Complete => next == Active,
            Denied => false,
        }
    }

    /// Whether replication is underway for this status.
    pub fn is_running(self) -> bool {
        matches!(self, SyncStatus::Active | SyncStatus::Paused)
    }
}

/// Which way documents flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Push,
    Pull,
    Both,
}

impl Direction {
    pub fn pushes(self) -> bool {
        matches!(self, Direction::Push | Direction::Both)
    }

    pub fn pulls(self) -> bool {
        matches!(self, Direction::Pull | Direction::Both)
    }
}

/// Read-only snapshot of a database's sync status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_synced_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub direction: Option<Direction>,
    /// Changes still waiting to be replicated, as last reported
    pub pending: u64,
}

/// Shared, observable [`SyncState`] of one database.
#[derive(Debug, Clone)]
pub struct SyncStateHandle {
    database: DatabaseName,
    tx: Arc<watch::Sender<SyncState>>,
}

impl SyncStateHandle {
    pub fn new(database: impl Into<DatabaseName>) -> Self {
        let (tx, _) = watch::channel(SyncState::default());
        Self {
            database: database.into(),
            tx: Arc::new(tx),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn snapshot(&self) -> SyncState {
        self.tx.borrow().clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.tx.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }

    /// Move to `next` and apply `update`, if the transition is legal.
    ///
    /// Returns `false` (and logs) when the transition is rejected; the state
    /// is left untouched in that case.
    pub fn transition(&self, next: SyncStatus, update: impl FnOnce(&mut SyncState)) -> bool {
        let mut from = SyncStatus::Idle;
        let mut accepted = false;
        self.tx.send_if_modified(|state| {
            from = state.status;
            if !state.status.can_transition_to(next) {
                return false;
            }
            accepted = true;
            let before = state.clone();
            state.status = next;
            update(state);
            *state != before
        });

        if !accepted {
            tracing::warn!(
                db = %self.database,
                ?from,
                to = ?next,
                "Rejected sync state transition"
            );
        } else if from != next {
            tracing::debug!(db = %self.database, ?from, to = ?next, "Sync state changed");
        }
        accepted
    }

    /// A batch is in flight or just moved.
    pub fn set_active(&self, direction: Direction, pending: u64) -> bool {
        self.transition(SyncStatus::Active, |state| {
            state.direction = Some(direction);
            state.pending = pending;
            state.last_error = None;
        })
    }

    /// Caught up; waiting for more changes.
    pub fn set_paused(&self, synced_at: Option<Timestamp>) -> bool {
        self.transition(SyncStatus::Paused, |state| {
            if synced_at.is_some() {
                state.last_synced_at = synced_at;
                state.pending = 0;
            }
        })
    }

    pub fn set_complete(&self, synced_at: Timestamp) -> bool {
        self.transition(SyncStatus::Complete, |state| {
            state.last_synced_at = Some(synced_at);
            state.last_error = None;
            state.pending = 0;
        })
    }

    /// Record a failure. Denials land in [`SyncStatus::Denied`].
    pub fn set_failed(&self, error: &crate::Error) -> bool {
        let status = if error.is_denied() {
            SyncStatus::Denied
        } else {
            SyncStatus::Error
        };
        let message = error.to_string();
        self.transition(status, |state| state.last_error = Some(message))
    }

    /// Back to idle, keeping `last_synced_at`.
    pub fn reset(&self) {
        self.transition(SyncStatus::Idle, |state| {
            state.direction = None;
            state.pending = 0;
            state.last_error = None;
        });
    }
}
