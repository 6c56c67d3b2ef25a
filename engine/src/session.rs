//! Live replication.
//!
//! A session is a background task that keeps one local database and its
//! remote counterpart in step: it pushes local changes, pulls remote ones,
//! then waits on whichever side changes next. Transient failures are retried
//! with exponential backoff; a denial halts the session for good.

use crate::{
    config::RemoteEndpointConfig,
    connectivity::Connectivity,
    error::Result,
    remote::Remote,
    replication::{checkpoint_key, pull_batch, push_batch, BatchOutcome},
    resolver,
    retry::{delay_millis, RetryPolicy},
    store::LocalStore,
    sync_state::{Direction, SyncStateHandle, SyncStatus},
    Error, Sequence,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a running live replication.
///
/// Dropping the handle cancels the task without touching the sync state;
/// [`stop`](Self::stop) also resets the state to idle.
#[derive(Debug)]
pub struct ReplicationSession {
    state: SyncStateHandle,
    suspend: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReplicationSession {
    /// Spawn a session. Must be called from within a tokio runtime.
    pub fn start(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn Remote>,
        config: RemoteEndpointConfig,
        state: SyncStateHandle,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        let (suspend, suspended) = watch::channel(false);
        if state.status() != SyncStatus::Idle {
            state.reset();
        }
        state.set_active(Direction::Both, 0);

        tracing::info!(db = local.name(), url = %config.url, "Starting live replication");
        let worker = Worker {
            push_key: checkpoint_key("push", &config.url),
            pull_key: checkpoint_key("pull", &config.url),
            local,
            remote,
            config,
            state: state.clone(),
            connectivity,
            suspended,
        };
        let task = tokio::spawn(worker.run());

        Self {
            state,
            suspend,
            task,
        }
    }

    /// Park the session: it finishes nothing further and makes no more
    /// remote calls until stopped. There is no resume.
    pub fn pause(&self) {
        self.suspend.send_replace(true);
    }

    pub fn is_paused(&self) -> bool {
        *self.suspend.borrow()
    }

    /// Whether the task has exited (denied, fatal error, or cancelled).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the task, in-flight batch included, and reset the state.
    pub fn stop(self) {
        self.task.abort();
        self.state.reset();
        tracing::info!(db = %self.state.database(), "Stopped live replication");
    }
}

impl Drop for ReplicationSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

enum Wake {
    Remote(Result<BatchOutcome>),
    Local,
    Suspended,
}

struct Worker {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn Remote>,
    config: RemoteEndpointConfig,
    state: SyncStateHandle,
    connectivity: Arc<dyn Connectivity>,
    suspended: watch::Receiver<bool>,
    push_key: String,
    pull_key: String,
}

impl Worker {
    async fn run(mut self) {
        let mut backoff = RetryPolicy::live_session().backoff();
        let mut local_rx = self.local.watch();

        loop {
            if self.is_suspended() {
                tracing::debug!(db = self.local.name(), "Session parked");
                std::future::pending::<()>().await;
            }

            let error = match self.cycle(&mut local_rx).await {
                Ok(()) => {
                    backoff.reset();
                    continue;
                }
                Err(e) => e,
            };

            if error.is_denied() {
                self.state.set_failed(&error);
                tracing::warn!(db = self.local.name(), "Replication denied, halting: {}", error);
                return;
            }
            if !error.is_transient() || !self.config.retry {
                self.state.set_failed(&error);
                tracing::error!(db = self.local.name(), "Replication stopped: {}", error);
                return;
            }

            if self.is_suspended() || !self.connectivity.is_online() {
                tracing::debug!(db = self.local.name(), "Replication failed while offline: {}", error);
            } else {
                self.state.set_failed(&error);
            }

            let Some(delay) = backoff.next_delay() else {
                return;
            };
            tracing::warn!(
                db = self.local.name(),
                attempt = backoff.failures(),
                delay_ms = delay_millis(delay),
                "Replication failed, retrying: {}",
                error
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.suspended.changed() => {}
            }
        }
    }

    /// Push everything, pull everything, then wait for the next change on
    /// either side.
    async fn cycle(&mut self, local_rx: &mut watch::Receiver<Sequence>) -> Result<()> {
        local_rx.borrow_and_update();
        let limit = self.config.batch_limit();

        loop {
            let outcome =
                push_batch(&*self.local, &*self.remote, &self.push_key, limit).await?;
            if outcome.is_idle() {
                break;
            }
            self.progress(outcome.pending);
        }
        let mut pulled = 0;
        loop {
            let outcome =
                pull_batch(&*self.local, &*self.remote, &self.pull_key, limit, None).await?;
            if outcome.is_idle() {
                break;
            }
            pulled += outcome.docs;
            self.progress(outcome.pending);
        }
        if pulled > 0 {
            self.resolve().await?;
        }
        self.caught_up();

        let wake = tokio::select! {
            outcome = pull_batch(
                &*self.local,
                &*self.remote,
                &self.pull_key,
                limit,
                Some(self.config.heartbeat()),
            ) => Wake::Remote(outcome),
            _ = local_rx.changed() => Wake::Local,
            _ = self.suspended.changed() => Wake::Suspended,
        };

        match wake {
            Wake::Remote(outcome) => {
                let outcome = outcome?;
                if !outcome.is_idle() {
                    self.progress(outcome.pending);
                }
                if outcome.docs > 0 {
                    self.resolve().await?;
                }
            }
            Wake::Local => {
                tracing::trace!(db = self.local.name(), "Local change, pushing");
            }
            Wake::Suspended => {}
        }
        Ok(())
    }

    /// Collapse conflicts brought in by a pull. The resolution is a local
    /// write, so the next cycle pushes it.
    async fn resolve(&self) -> Result<()> {
        let resolved = resolver::resolve_conflicts(&*self.local).await?;
        if resolved > 0 {
            tracing::debug!(db = self.local.name(), resolved, "Resolved pulled conflicts");
        }
        Ok(())
    }

    fn is_suspended(&self) -> bool {
        *self.suspended.borrow()
    }

    fn progress(&self, pending: u64) {
        if !self.is_suspended() {
            self.state.set_active(Direction::Both, pending);
        }
    }

    fn caught_up(&self) {
        if self.is_suspended() {
            return;
        }
        if self.state.status() == SyncStatus::Error {
            self.state.set_active(Direction::Both, 0);
        }
        self.state.set_paused(Some(crate::now_millis()));
    }
}
