//! One-shot synchronization pass.

use crate::{
    config::RemoteEndpointConfig,
    error::Result,
    remote::Remote,
    replication::{checkpoint_key, pull_batch, push_batch},
    resolver::resolve_conflicts,
    store::LocalStore,
    sync_state::{Direction, SyncStateHandle},
};
use serde::{Deserialize, Serialize};

/// Most batches a single pass moves in each direction.
pub const MAX_BATCHES_PER_DIRECTION: usize = 5;

/// What a pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub direction: Direction,
    pub pushed: usize,
    pub pulled: usize,
    pub batches: usize,
    pub conflicts_resolved: usize,
}

impl SyncReport {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            pushed: 0,
            pulled: 0,
            batches: 0,
            conflicts_resolved: 0,
        }
    }
}

/// Run one bounded pass and record the outcome in `state`.
///
/// On success the conflict resolver runs before returning. Failures are not
/// retried here.
pub async fn sync_once(
    local: &dyn LocalStore,
    remote: &dyn Remote,
    direction: Direction,
    config: &RemoteEndpointConfig,
    state: &SyncStateHandle,
) -> Result<SyncReport> {
    state.set_active(direction, 0);

    match run(local, remote, direction, config, state).await {
        Ok(report) => {
            state.set_complete(crate::now_millis());
            tracing::info!(
                db = local.name(),
                ?direction,
                pushed = report.pushed,
                pulled = report.pulled,
                resolved = report.conflicts_resolved,
                "Sync pass complete"
            );
            Ok(report)
        }
        Err(e) => {
            state.set_failed(&e);
            tracing::warn!(db = local.name(), ?direction, "Sync pass failed: {}", e);
            Err(e)
        }
    }
}

async fn run(
    local: &dyn LocalStore,
    remote: &dyn Remote,
    direction: Direction,
    config: &RemoteEndpointConfig,
    state: &SyncStateHandle,
) -> Result<SyncReport> {
    let mut report = SyncReport::new(direction);
    let limit = config.batch_limit();

    if direction.pushes() {
        let key = checkpoint_key("push", &config.url);
        for _ in 0..MAX_BATCHES_PER_DIRECTION {
            let outcome = push_batch(local, remote, &key, limit).await?;
            if outcome.is_idle() {
                break;
            }
            report.batches += 1;
            report.pushed += outcome.docs;
            state.set_active(direction, outcome.pending);
            if outcome.pending == 0 {
                break;
            }
        }
    }

    if direction.pulls() {
        let key = checkpoint_key("pull", &config.url);
        for _ in 0..MAX_BATCHES_PER_DIRECTION {
            let outcome = pull_batch(local, remote, &key, limit, None).await?;
            if outcome.is_idle() {
                break;
            }
            report.batches += 1;
            report.pulled += outcome.docs;
            state.set_active(direction, outcome.pending);
            if outcome.pending == 0 {
                break;
            }
        }
    }

    report.conflicts_resolved = resolve_conflicts(local).await?;
    Ok(report)
}
