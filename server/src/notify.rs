//! Change notification for long-polling readers.
//!
//! Writers publish the newest sequence of a database after committing;
//! `_changes` requests waiting on that database wake up and re-read the feed.

use dashmap::DashMap;
use tokio::sync::watch;

/// Per-database sequence channels.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    channels: DashMap<String, watch::Sender<u64>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, db: &str) -> watch::Sender<u64> {
        self.channels
            .entry(db.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .value()
            .clone()
    }

    /// Receiver that observes every sequence published for `db`.
    pub fn subscribe(&self, db: &str) -> watch::Receiver<u64> {
        self.sender(db).subscribe()
    }

    /// Announce that `db` reached `seq`. Sequences never move backwards.
    pub fn publish(&self, db: &str, seq: u64) {
        let sender = self.sender(db);
        let advanced = sender.send_if_modified(|current| {
            if seq > *current {
                *current = seq;
                true
            } else {
                false
            }
        });
        if advanced {
            tracing::trace!(db = %db, seq, "Published change");
        }
    }

    /// Databases with at least one channel.
    pub fn database_count(&self) -> usize {
        self.channels.len()
    }
}
