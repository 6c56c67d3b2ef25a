//! Sync coordinator.
//!
//! Owns the [`SyncState`] of every database and the live sessions running
//! against them. Going offline parks every session and marks active ones
//! paused; coming back online restarts nothing. Live sync resumes only when
//! a caller asks for it again.

use crate::{
    config::{EndpointOverrides, RemoteEndpointConfig},
    connectivity::{Connectivity, Status},
    error::Result,
    oneshot::{self, SyncReport},
    remote::Connector,
    resolver,
    session::ReplicationSession,
    store::Databases,
    sync_state::{Direction, SyncState, SyncStateHandle, SyncStatus},
    DatabaseName, Error,
};
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct SyncCoordinator {
    databases: Databases,
    connector: Arc<dyn Connector>,
    connectivity: Arc<dyn Connectivity>,
    endpoint: Option<RemoteEndpointConfig>,
    states: DashMap<DatabaseName, SyncStateHandle>,
    sessions: DashMap<DatabaseName, ReplicationSession>,
}

impl SyncCoordinator {
    /// Every database starts out idle.
    pub fn new(
        databases: Databases,
        connector: Arc<dyn Connector>,
        connectivity: Arc<dyn Connectivity>,
        endpoint: Option<RemoteEndpointConfig>,
    ) -> Self {
        let states = databases
            .names()
            .map(|name| (name.to_string(), SyncStateHandle::new(name)))
            .collect();
        Self {
            databases,
            connector,
            connectivity,
            endpoint,
            states,
            sessions: DashMap::new(),
        }
    }

    fn state(&self, db: &str) -> Result<SyncStateHandle> {
        self.states
            .get(db)
            .map(|s| s.value().clone())
            .ok_or_else(|| Error::UnknownDatabase(db.to_string()))
    }

    fn endpoint(&self, overrides: Option<&EndpointOverrides>) -> Result<RemoteEndpointConfig> {
        let base = self.endpoint.clone().unwrap_or_default();
        let config = match overrides {
            Some(overrides) => base.with_overrides(overrides),
            None => base,
        };
        if config.url.is_empty() {
            return Err(Error::Configuration("no remote endpoint URL".into()));
        }
        Ok(config)
    }

    /// Start live replication for `db`, replacing any session already
    /// running for it.
    pub fn start_sync(&self, db: &str, overrides: Option<&EndpointOverrides>) -> Result<()> {
        let local = self.databases.get(db)?;
        let state = self.state(db)?;
        let config = self.endpoint(overrides)?;

        if !self.connectivity.is_online() {
            return Err(Error::Connectivity(
                "cannot start live replication while offline".into(),
            ));
        }
        let remote = self.connector.connect(db, &config)?;

        if let Some((_, previous)) = self.sessions.remove(db) {
            previous.stop();
        }
        let session = ReplicationSession::start(
            local,
            remote,
            config,
            state,
            Arc::clone(&self.connectivity),
        );
        self.sessions.insert(db.to_string(), session);
        Ok(())
    }

    /// Cancel live replication for `db` and reset its state to idle.
    pub fn stop_sync(&self, db: &str) -> Result<()> {
        let state = self.state(db)?;
        match self.sessions.remove(db) {
            Some((_, session)) => session.stop(),
            None => state.reset(),
        }
        Ok(())
    }

    /// One bounded pass. While a live session is replicating `db`, the pass
    /// leaves the session's state alone; otherwise (no session, or one parked
    /// by a connectivity loss) the outcome is recorded in `db`'s state.
    pub async fn sync_once(
        &self,
        db: &str,
        direction: Direction,
        overrides: Option<&EndpointOverrides>,
    ) -> Result<SyncReport> {
        let local = self.databases.get(db)?;
        let config = self.endpoint(overrides)?;
        let remote = self.connector.connect(db, &config)?;

        let state = if self.is_running(db) {
            SyncStateHandle::new(db)
        } else {
            let state = self.state(db)?;
            if state.status() == SyncStatus::Denied {
                state.reset();
            }
            state
        };

        oneshot::sync_once(&*local, &*remote, direction, &config, &state).await
    }

    pub async fn resolve_conflicts(&self, db: &str) -> Result<usize> {
        let local = self.databases.get(db)?;
        resolver::resolve_conflicts(&*local).await
    }

    /// Snapshot of `db`'s sync state.
    pub fn sync_info(&self, db: &str) -> Result<SyncState> {
        Ok(self.state(db)?.snapshot())
    }

    pub fn subscribe(&self, db: &str) -> Result<watch::Receiver<SyncState>> {
        Ok(self.state(db)?.subscribe())
    }

    /// Whether a live session for `db` is still replicating. Finished and
    /// parked sessions are not running.
    pub fn is_running(&self, db: &str) -> bool {
        self.sessions
            .get(db)
            .map(|s| !s.is_finished() && !s.is_paused())
            .unwrap_or(false)
    }

    /// React to a connectivity change.
    pub fn handle_connectivity(&self, status: Status) {
        match status {
            Status::Offline => {
                let mut paused = 0;
                for entry in self.sessions.iter() {
                    let session = entry.value();
                    if session.is_finished() || session.is_paused() {
                        continue;
                    }
                    session.pause();
                    if let Some(state) = self.states.get(entry.key()) {
                        if state.status() == SyncStatus::Active {
                            state.set_paused(None);
                        }
                    }
                    paused += 1;
                }
                if paused > 0 {
                    tracing::info!(sessions = paused, "Offline, paused live replication");
                }
            }
            Status::Online => {
                let parked = self.sessions.iter().filter(|s| s.is_paused()).count();
                if parked > 0 {
                    tracing::info!(
                        sessions = parked,
                        "Online; paused sessions stay paused until restarted"
                    );
                }
            }
        }
    }

    /// Follow the connectivity source until the coordinator is dropped.
    pub fn attach(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator: Weak<Self> = Arc::downgrade(self);
        let mut rx = self.connectivity.subscribe();

        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let status = *rx.borrow_and_update();
                match coordinator.upgrade() {
                    Some(coordinator) => coordinator.handle_connectivity(status),
                    None => break,
                }
            }
        })
    }

    /// Stop every live session.
    pub fn shutdown(&self) {
        let databases: Vec<DatabaseName> = self.sessions.iter().map(|s| s.key().clone()).collect();
        for db in databases {
            if let Some((_, session)) = self.sessions.remove(&db) {
                session.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityMonitor;
    use crate::remote::MemoryConnector;
    use crate::store::{LocalStore, MemoryStore};
    use std::time::Duration;

    struct Fixture {
        coordinator: Arc<SyncCoordinator>,
        connector: Arc<MemoryConnector>,
        connectivity: Arc<ConnectivityMonitor>,
    }

    fn fixture() -> Fixture {
        let connector = Arc::new(MemoryConnector::new());
        let connectivity = Arc::new(ConnectivityMonitor::online());
        let mut endpoint = RemoteEndpointConfig::new("memory://hr");
        endpoint.heartbeat_ms = 100;
        let coordinator = Arc::new(SyncCoordinator::new(
            Databases::new([Arc::new(MemoryStore::new("employees")) as Arc<dyn LocalStore>]),
            connector.clone(),
            connectivity.clone(),
            Some(endpoint),
        ));
        Fixture {
            coordinator,
            connector,
            connectivity,
        }
    }

    async fn wait_for(coordinator: &SyncCoordinator, status: SyncStatus) {
        let mut rx = coordinator.subscribe("employees").unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.status == status))
            .await
            .expect("status not reached")
            .unwrap();
    }

    #[test]
    fn databases_start_idle() {
        let f = fixture();
        let info = f.coordinator.sync_info("employees").unwrap();
        assert_eq!(info.status, SyncStatus::Idle);
        assert!(info.last_synced_at.is_none());
        assert!(matches!(
            f.coordinator.sync_info("payroll"),
            Err(Error::UnknownDatabase(_))
        ));
    }

    #[tokio::test]
    async fn start_and_stop() {
        let f = fixture();
        f.coordinator.start_sync("employees", None).unwrap();
        assert!(f.coordinator.is_running("employees"));
        wait_for(&f.coordinator, SyncStatus::Paused).await;

        f.coordinator.stop_sync("employees").unwrap();
        assert!(!f.coordinator.is_running("employees"));
        assert_eq!(
            f.coordinator.sync_info("employees").unwrap().status,
            SyncStatus::Idle
        );
    }

    #[tokio::test]
    async fn start_requires_an_endpoint() {
        let coordinator = SyncCoordinator::new(
            Databases::new([Arc::new(MemoryStore::new("employees")) as Arc<dyn LocalStore>]),
            Arc::new(MemoryConnector::new()),
            Arc::new(ConnectivityMonitor::online()),
            None,
        );
        assert!(matches!(
            coordinator.start_sync("employees", None),
            Err(Error::Configuration(_))
        ));

        let overrides = EndpointOverrides {
            url: Some("memory://other".into()),
            ..Default::default()
        };
        coordinator.start_sync("employees", Some(&overrides)).unwrap();
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn offline_pauses_and_online_does_not_restart() {
        let f = fixture();
        let _listener = f.coordinator.attach();
        f.coordinator.start_sync("employees", None).unwrap();
        wait_for(&f.coordinator, SyncStatus::Paused).await;

        // Force the session into the active state, then lose the network.
        let state = f.coordinator.state("employees").unwrap();
        state.set_active(Direction::Both, 0);
        f.connectivity.set_offline();
        wait_for(&f.coordinator, SyncStatus::Paused).await;

        let remote = f.connector.remote("employees");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let calls = remote.calls();

        f.connectivity.set_online();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            f.coordinator.sync_info("employees").unwrap().status,
            SyncStatus::Paused
        );
        assert_eq!(remote.calls(), calls);

        // An explicit restart replicates again.
        f.coordinator.start_sync("employees", None).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(remote.calls() > calls);
        f.coordinator.shutdown();
    }

    #[tokio::test]
    async fn sync_once_after_reconnect_is_recorded() {
        let f = fixture();
        let _listener = f.coordinator.attach();
        f.coordinator.start_sync("employees", None).unwrap();
        wait_for(&f.coordinator, SyncStatus::Paused).await;
        let before = f.coordinator.sync_info("employees").unwrap().last_synced_at;

        f.connectivity.set_offline();
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.connectivity.set_online();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!f.coordinator.is_running("employees"));

        f.coordinator
            .sync_once("employees", Direction::Both, None)
            .await
            .unwrap();
        let info = f.coordinator.sync_info("employees").unwrap();
        assert_eq!(info.status, SyncStatus::Complete);
        assert!(info.last_synced_at.is_some());
        assert!(info.last_synced_at > before);
        f.coordinator.shutdown();
    }

    #[tokio::test]
    async fn start_while_offline_is_refused() {
        let f = fixture();
        f.connectivity.set_offline();
        assert!(matches!(
            f.coordinator.start_sync("employees", None),
            Err(Error::Connectivity(_))
        ));
        assert!(!f.coordinator.is_running("employees"));
    }

    #[tokio::test]
    async fn sync_once_records_completion() {
        let f = fixture();
        let report = f
            .coordinator
            .sync_once("employees", Direction::Both, None)
            .await
            .unwrap();
        assert_eq!(report.batches, 0);

        let info = f.coordinator.sync_info("employees").unwrap();
        assert_eq!(info.status, SyncStatus::Complete);
        assert!(info.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn sync_once_after_denial_starts_over() {
        let f = fixture();
        let remote = f.connector.remote("employees");
        remote.fail_with(Some(Error::Denied("401".into()))).await;
        let denied = f
            .coordinator
            .sync_once("employees", Direction::Pull, None)
            .await;
        assert!(denied.is_err());
        assert_eq!(
            f.coordinator.sync_info("employees").unwrap().status,
            SyncStatus::Denied
        );

        remote.fail_with(None).await;
        f.coordinator
            .sync_once("employees", Direction::Pull, None)
            .await
            .unwrap();
        assert_eq!(
            f.coordinator.sync_info("employees").unwrap().status,
            SyncStatus::Complete
        );
    }
}
