//! Engine context.
//!
//! A [`SyncContext`] is the explicit registry a host builds once: the local
//! databases, the schema, the connectivity source, the offline queue, the
//! document facade and the sync coordinator. Nothing in the engine is global;
//! two contexts in one process never share state.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tandem_engine::{MemoryStore, RemoteEndpointConfig, SyncContext};
//!
//! # async fn run() -> tandem_engine::error::Result<()> {
//! let context = SyncContext::builder()
//!     .database(Arc::new(MemoryStore::new("employees")))
//!     .endpoint(RemoteEndpointConfig::new("http://localhost:3000"))
//!     .build()?;
//! context.start();
//! context.coordinator().start_sync("employees", None)?;
//! # Ok(())
//! # }
//! ```

use crate::{
    config::RemoteEndpointConfig,
    connectivity::{Connectivity, ConnectivityMonitor},
    coordinator::SyncCoordinator,
    error::Result,
    queue::{OfflineQueue, QueueSnapshot},
    remote::{Connector, HttpConnector},
    repository::Repository,
    schema::Schema,
    store::{Databases, LocalStore},
    Error,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Builder for [`SyncContext`].
#[derive(Default)]
pub struct SyncContextBuilder {
    stores: Vec<Arc<dyn LocalStore>>,
    schema: Option<Schema>,
    connectivity: Option<Arc<dyn Connectivity>>,
    connector: Option<Arc<dyn Connector>>,
    endpoint: Option<RemoteEndpointConfig>,
    queue: Option<QueueSnapshot>,
}

impl SyncContextBuilder {
    /// Register a local database under its store name.
    pub fn database(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.stores.push(store);
        self
    }

    /// Schema enforced at the store boundary. Defaults to accepting any kind.
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Defaults to a monitor that is always online.
    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Transport used to reach remotes. Defaults to HTTP.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Default remote endpoint for every database.
    pub fn endpoint(mut self, endpoint: RemoteEndpointConfig) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Offline operations persisted by an earlier run.
    pub fn restore_queue(mut self, snapshot: QueueSnapshot) -> Self {
        self.queue = Some(snapshot);
        self
    }

    pub fn build(self) -> Result<SyncContext> {
        let mut names = BTreeSet::new();
        for store in &self.stores {
            if !names.insert(store.name().to_string()) {
                return Err(Error::Configuration(format!(
                    "database '{}' registered twice",
                    store.name()
                )));
            }
        }

        let databases = Databases::new(self.stores);
        let schema = Arc::new(self.schema.unwrap_or_else(Schema::permissive));
        let connectivity = self
            .connectivity
            .unwrap_or_else(|| Arc::new(ConnectivityMonitor::online()));
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(HttpConnector));

        let queue = Arc::new(OfflineQueue::new());
        if let Some(snapshot) = self.queue {
            let restored = queue.import(snapshot);
            tracing::info!(operations = restored, "Restored offline queue");
        }

        let repository = Arc::new(Repository::new(
            databases.clone(),
            Arc::clone(&schema),
            Arc::clone(&connectivity),
            Arc::clone(&queue),
        ));
        let coordinator = Arc::new(SyncCoordinator::new(
            databases.clone(),
            connector,
            Arc::clone(&connectivity),
            self.endpoint,
        ));

        Ok(SyncContext {
            databases,
            schema,
            connectivity,
            queue,
            repository,
            coordinator,
            listeners: Mutex::new(Vec::new()),
        })
    }
}

/// Everything one engine instance owns.
pub struct SyncContext {
    databases: Databases,
    schema: Arc<Schema>,
    connectivity: Arc<dyn Connectivity>,
    queue: Arc<OfflineQueue>,
    repository: Arc<Repository>,
    coordinator: Arc<SyncCoordinator>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncContext {
    pub fn builder() -> SyncContextBuilder {
        SyncContextBuilder::default()
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the connectivity listeners: the coordinator pauses sessions when
    /// the network drops, and the offline queue drains whenever it returns.
    /// Calling `start` twice is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut listeners = self.listeners();
        if !listeners.is_empty() {
            return;
        }
        listeners.push(self.coordinator.attach());
        listeners.push(self.spawn_drain());
        tracing::debug!(databases = ?self.database_names(), "Sync context started");
    }

    fn spawn_drain(&self) -> JoinHandle<()> {
        let repository = Arc::clone(&self.repository);
        let mut rx = self.connectivity.subscribe();

        tokio::spawn(async move {
            let mut online = rx.borrow_and_update().is_online();
            loop {
                if online && !repository.queue().is_empty() {
                    repository.queue().drain(&*repository).await;
                }
                if rx.changed().await.is_err() {
                    break;
                }
                online = rx.borrow_and_update().is_online();
            }
        })
    }

    /// Stop every live session and listener.
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
        for listener in self.listeners().drain(..) {
            listener.abort();
        }
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn connectivity(&self) -> &Arc<dyn Connectivity> {
        &self.connectivity
    }

    /// Handle to a registered database.
    pub fn database(&self, name: &str) -> Result<Arc<dyn LocalStore>> {
        self.databases.get(name)
    }

    pub fn database_names(&self) -> Vec<String> {
        self.databases.names().map(str::to_string).collect()
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        for listener in self.listeners().drain(..) {
            listener.abort();
        }
    }
}
