//! In-process remote replica.
//!
//! Backed by a [`MemoryStore`], it behaves like a server database and can be
//! told to fail, which makes it the remote of choice for tests and demos.

use super::wire::DocRef;
use super::{Connector, Remote};
use crate::{
    config::RemoteEndpointConfig,
    error::Result,
    store::{ChangesPage, LocalStore, MemoryStore, RevsDiff},
    DatabaseName, Document, Error, Sequence,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// A remote database held in memory.
#[derive(Debug)]
pub struct MemoryRemote {
    store: Arc<MemoryStore>,
    calls: AtomicUsize,
    pushes: AtomicUsize,
    failure: Mutex<Option<Error>>,
}

impl MemoryRemote {
    pub fn new(database: impl Into<DatabaseName>) -> Self {
        Self::with_store(Arc::new(MemoryStore::new(database)))
    }

    pub fn with_store(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            calls: AtomicUsize::new(0),
            pushes: AtomicUsize::new(0),
            failure: Mutex::new(None),
        }
    }

    /// The replica's own store, for seeding and inspection.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Transport calls received so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `bulk_docs` calls received so far.
    pub fn pushes(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Answer every call with `error` until cleared with `None`.
    pub async fn fail_with(&self, error: Option<Error>) {
        *self.failure.lock().await = error;
    }

    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.failure.lock().await {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Remote for MemoryRemote {
    async fn changes(
        &self,
        since: Sequence,
        limit: usize,
        wait: Option<Duration>,
    ) -> Result<ChangesPage> {
        self.enter().await?;
        let page = self.store.changes(since, limit).await?;
        let Some(wait) = wait else {
            return Ok(page);
        };
        if !page.results.is_empty() {
            return Ok(page);
        }

        let mut rx = self.store.watch();
        let newer = async { rx.wait_for(|seq| *seq > since).await.map(|_| ()) };
        match tokio::time::timeout(wait, newer).await {
            Ok(Ok(())) => self.store.changes(since, limit).await,
            _ => Ok(page),
        }
    }

    async fn revs_diff(&self, revs: RevsDiff) -> Result<RevsDiff> {
        self.enter().await?;
        self.store.revs_diff(revs).await
    }

    async fn bulk_get(&self, docs: Vec<DocRef>) -> Result<Vec<Document>> {
        self.enter().await?;
        let mut found = Vec::with_capacity(docs.len());
        for DocRef { id, rev } in docs {
            if let Some(doc) = self.store.get_revision(&id, &rev).await? {
                found.push(doc);
            }
        }
        Ok(found)
    }

    async fn bulk_docs(&self, docs: Vec<Document>) -> Result<()> {
        self.enter().await?;
        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.store.insert_replicated(docs).await?;
        Ok(())
    }
}

/// Hands out one [`MemoryRemote`] per database name.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    remotes: DashMap<DatabaseName, Arc<MemoryRemote>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The remote for `database`, created on first use.
    pub fn remote(&self, database: &str) -> Arc<MemoryRemote> {
        self.remotes
            .entry(database.to_string())
            .or_insert_with(|| Arc::new(MemoryRemote::new(database)))
            .clone()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, database: &str, _config: &RemoteEndpointConfig) -> Result<Arc<dyn Remote>> {
        Ok(self.remote(database))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Payload;
    use crate::store::Edit;

    #[tokio::test]
    async fn injected_failure_is_returned_and_counted() {
        let remote = MemoryRemote::new("employees");
        remote.fail_with(Some(Error::Denied("401".into()))).await;

        let result = remote.changes(0, 10, None).await;
        assert!(matches!(result, Err(Error::Denied(_))));
        assert_eq!(remote.calls(), 1);

        remote.fail_with(None).await;
        assert!(remote.changes(0, 10, None).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_times_out_empty() {
        let remote = MemoryRemote::new("employees");
        let page = remote
            .changes(0, 10, Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(page.results.is_empty());
    }

    #[tokio::test]
    async fn long_poll_wakes_on_write() {
        let remote = Arc::new(MemoryRemote::new("employees"));
        let waiter = {
            let remote = remote.clone();
            tokio::spawn(async move { remote.changes(0, 10, Some(Duration::from_secs(30))).await })
        };

        tokio::task::yield_now().await;
        remote
            .store()
            .put(Edit::create("emp-1", "employee", Payload::new()))
            .await
            .unwrap();

        let page = waiter.await.unwrap().unwrap();
        assert_eq!(page.results.len(), 1);
    }

    #[test]
    fn connector_reuses_remotes() {
        let connector = MemoryConnector::new();
        let a = connector.remote("employees");
        let b = connector.remote("employees");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
