//! Replica registry.
//!
//! Maps a database name from the URL to the store that holds it. Stores are
//! created on first use and shared by every later request.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tandem_engine::{LocalStore, MemoryStore};

use crate::db::{PgStore, Pool};
use crate::error::{AppError, Result};
use crate::notify::ChangeNotifier;

/// Source of replica stores by database name.
#[async_trait]
pub trait Replicas: Send + Sync {
    async fn open(&self, db: &str) -> Result<Arc<dyn LocalStore>>;
}

/// Database names are lowercase ASCII letters, digits, `_` and `-`, and
/// never start with `_` (those paths are endpoints).
pub fn validate_name(db: &str) -> Result<()> {
    if db.is_empty() || db.len() > 128 {
        return Err(AppError::BadRequest(format!("invalid database name '{db}'")));
    }
    if db.starts_with('_') {
        return Err(AppError::BadRequest(format!(
            "database name '{db}' must not start with '_'"
        )));
    }
    if !db
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
    {
        return Err(AppError::BadRequest(format!("invalid database name '{db}'")));
    }
    Ok(())
}

/// In-memory replicas for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryReplicas {
    stores: DashMap<String, Arc<MemoryStore>>,
}

impl MemoryReplicas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store for `db`, created if needed.
    pub fn store(&self, db: &str) -> Arc<MemoryStore> {
        self.stores
            .entry(db.to_string())
            .or_insert_with(|| Arc::new(MemoryStore::new(db)))
            .value()
            .clone()
    }
}

#[async_trait]
impl Replicas for MemoryReplicas {
    async fn open(&self, db: &str) -> Result<Arc<dyn LocalStore>> {
        validate_name(db)?;
        let store: Arc<dyn LocalStore> = self.store(db);
        Ok(store)
    }
}

/// Postgres-backed replicas sharing one pool.
pub struct PgReplicas {
    pool: Pool,
    notifier: Arc<ChangeNotifier>,
    stores: DashMap<String, Arc<PgStore>>,
}

impl PgReplicas {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            notifier: Arc::new(ChangeNotifier::new()),
            stores: DashMap::new(),
        }
    }
}

#[async_trait]
impl Replicas for PgReplicas {
    async fn open(&self, db: &str) -> Result<Arc<dyn LocalStore>> {
        validate_name(db)?;
        if let Some(store) = self.stores.get(db) {
            let store: Arc<dyn LocalStore> = store.value().clone();
            return Ok(store);
        }

        let store = Arc::new(PgStore::open(self.pool.clone(), db, self.notifier.clone()).await?);
        let store: Arc<dyn LocalStore> = self
            .stores
            .entry(db.to_string())
            .or_insert(store)
            .value()
            .clone();
        tracing::debug!(db = %db, "Opened replica");
        Ok(store)
    }
}
