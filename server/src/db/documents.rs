//! Postgres-backed replica store.
//!
//! Each document is one row holding its leaves as JSONB. Every write takes
//! the next value of a shared sequence, so `seq` orders the changes feed of
//! each database.
//!
//! Write transactions on one database are serialized by a transaction-scoped
//! advisory lock taken before anything else. Sequence values are therefore
//! committed in increasing order per database, and a reader that has seen
//! `seq = n` can never later observe a commit with a smaller `seq`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use tandem_engine::revtree::{Leaves, MergeOutcome};
use tandem_engine::store::{Change, ChangesPage, Edit, RevsDiff};
use tandem_engine::{Document, Error, LocalStore, Revision, Sequence};
use tokio::sync::watch;

use super::Pool;
use crate::notify::ChangeNotifier;

type EngineResult<T> = std::result::Result<T, Error>;

/// A stored document row.
#[derive(Debug)]
struct StoredEntry {
    id: String,
    seq: i64,
    leaves: Leaves,
}

impl<'r> sqlx::FromRow<'r, PgRow> for StoredEntry {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let Json(leaves): Json<Leaves> = row.try_get("body")?;
        Ok(StoredEntry {
            id: row.try_get("id")?,
            seq: row.try_get("seq")?,
            leaves,
        })
    }
}

impl StoredEntry {
    fn change(&self) -> Change {
        Change {
            seq: to_seq(self.seq),
            id: self.id.clone(),
            revs: self.leaves.leaf_revs(),
            deleted: self.leaves.current().deleted,
        }
    }
}

fn storage(e: sqlx::Error) -> Error {
    tracing::error!("Replica storage error: {:?}", e);
    Error::Storage(e.to_string())
}

fn to_seq(seq: i64) -> Sequence {
    Sequence::try_from(seq).unwrap_or(0)
}

fn from_seq(seq: Sequence) -> i64 {
    i64::try_from(seq).unwrap_or(i64::MAX)
}

/// One database stored in Postgres.
pub struct PgStore {
    pool: Pool,
    name: String,
    notifier: Arc<ChangeNotifier>,
}

impl PgStore {
    /// Open `name`, seeding the notifier with its newest sequence.
    pub async fn open(
        pool: Pool,
        name: impl Into<String>,
        notifier: Arc<ChangeNotifier>,
    ) -> Result<Self, sqlx::Error> {
        let name = name.into();
        let newest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(seq) FROM documents WHERE db = $1")
                .bind(&name)
                .fetch_one(&pool)
                .await?;
        notifier.publish(&name, newest.map(to_seq).unwrap_or(0));

        Ok(Self {
            pool,
            name,
            notifier,
        })
    }

    async fn fetch(&self, id: &str) -> EngineResult<Option<StoredEntry>> {
        sqlx::query_as::<_, StoredEntry>(
            "SELECT id, seq, body FROM documents WHERE db = $1 AND id = $2",
        )
        .bind(&self.name)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)
    }

    async fn fetch_all(&self) -> EngineResult<Vec<StoredEntry>> {
        sqlx::query_as::<_, StoredEntry>(
            "SELECT id, seq, body FROM documents WHERE db = $1 ORDER BY id",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)
    }

    /// Open a write transaction holding the database's write lock until
    /// commit or rollback.
    async fn begin_write(&self) -> EngineResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&self.name)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        Ok(tx)
    }

    async fn read_leaves(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        id: &str,
    ) -> EngineResult<Option<Leaves>> {
        let entry = sqlx::query_as::<_, StoredEntry>(
            "SELECT id, seq, body FROM documents WHERE db = $1 AND id = $2",
        )
        .bind(&self.name)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(storage)?;
        Ok(entry.map(|e| e.leaves))
    }

    async fn store(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        id: &str,
        leaves: &Leaves,
    ) -> EngineResult<Sequence> {
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO documents (db, id, body)
            VALUES ($1, $2, $3)
            ON CONFLICT (db, id)
            DO UPDATE SET body = EXCLUDED.body, seq = nextval('document_seq')
            RETURNING seq
            "#,
        )
        .bind(&self.name)
        .bind(id)
        .bind(Json(leaves))
        .fetch_one(&mut **tx)
        .await
        .map_err(storage)?;
        Ok(to_seq(seq))
    }
}

#[async_trait]
impl LocalStore for PgStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &str) -> EngineResult<Option<Document>> {
        Ok(self
            .fetch(id)
            .await?
            .filter(|e| !e.leaves.current().deleted)
            .map(|e| e.leaves.document()))
    }

    async fn get_revision(&self, id: &str, rev: &Revision) -> EngineResult<Option<Document>> {
        Ok(self
            .fetch(id)
            .await?
            .and_then(|e| e.leaves.leaf(rev).cloned()))
    }

    async fn all(&self) -> EngineResult<Vec<Document>> {
        Ok(self
            .fetch_all()
            .await?
            .into_iter()
            .filter(|e| !e.leaves.current().deleted)
            .map(|e| e.leaves.document())
            .collect())
    }

    async fn put(&self, edit: Edit) -> EngineResult<Document> {
        let mut tx = self.begin_write().await?;
        let existing = self.read_leaves(&mut tx, &edit.id).await?;

        let doc = edit.apply_to(existing.as_ref().map(Leaves::current))?;
        let leaves = match existing {
            Some(mut leaves) => {
                leaves.commit(doc.clone());
                leaves
            }
            None => Leaves::new(doc.clone()),
        };

        let seq = self.store(&mut tx, &doc.id, &leaves).await?;
        tx.commit().await.map_err(storage)?;

        self.notifier.publish(&self.name, seq);
        tracing::trace!(db = %self.name, id = %doc.id, rev = %doc.rev, "Replica write");
        Ok(leaves.document())
    }

    async fn insert_replicated(&self, docs: Vec<Document>) -> EngineResult<usize> {
        let mut tx = self.begin_write().await?;
        let mut applied = 0;
        let mut newest = None;

        for doc in docs {
            if doc.rev.is_provisional() {
                return Err(Error::InvalidPayload(format!(
                    "cannot replicate provisional revision of '{}'",
                    doc.id
                )));
            }
            let id = doc.id.clone();
            let leaves = match self.read_leaves(&mut tx, &id).await? {
                Some(mut leaves) => match leaves.merge(doc) {
                    MergeOutcome::Applied => leaves,
                    MergeOutcome::Unchanged => continue,
                },
                None => Leaves::new(doc),
            };
            newest = Some(self.store(&mut tx, &id, &leaves).await?);
            applied += 1;
        }

        tx.commit().await.map_err(storage)?;
        if let Some(seq) = newest {
            self.notifier.publish(&self.name, seq);
        }
        Ok(applied)
    }

    async fn revs_diff(&self, revs: RevsDiff) -> EngineResult<RevsDiff> {
        let ids: Vec<String> = revs.keys().cloned().collect();
        let known = sqlx::query_as::<_, StoredEntry>(
            "SELECT id, seq, body FROM documents WHERE db = $1 AND id = ANY($2)",
        )
        .bind(&self.name)
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut missing = RevsDiff::new();
        for (id, wanted) in revs {
            let absent: Vec<Revision> = match known.iter().find(|e| e.id == id) {
                Some(entry) => wanted
                    .into_iter()
                    .filter(|rev| !entry.leaves.knows(rev))
                    .collect(),
                None => wanted,
            };
            if !absent.is_empty() {
                missing.insert(id, absent);
            }
        }
        Ok(missing)
    }

    async fn changes(&self, since: Sequence, limit: usize) -> EngineResult<ChangesPage> {
        let since_seq = from_seq(since);
        let rows = sqlx::query_as::<_, StoredEntry>(
            "SELECT id, seq, body FROM documents WHERE db = $1 AND seq > $2 ORDER BY seq LIMIT $3",
        )
        .bind(&self.name)
        .bind(since_seq)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE db = $1 AND seq > $2")
                .bind(&self.name)
                .bind(since_seq)
                .fetch_one(&self.pool)
                .await
                .map_err(storage)?;

        let results: Vec<Change> = rows.iter().map(StoredEntry::change).collect();
        let last_seq = results.last().map(|c| c.seq).unwrap_or(since);
        let pending = u64::try_from(total)
            .unwrap_or(0)
            .saturating_sub(results.len() as u64);

        Ok(ChangesPage {
            results,
            last_seq,
            pending,
        })
    }

    async fn conflicted(&self) -> EngineResult<Vec<Document>> {
        Ok(self
            .fetch_all()
            .await?
            .into_iter()
            .filter(|e| e.leaves.is_conflicted())
            .map(|e| e.leaves.document())
            .collect())
    }

    async fn checkpoint(&self, key: &str) -> EngineResult<Sequence> {
        let seq: Option<i64> =
            sqlx::query_scalar("SELECT seq FROM checkpoints WHERE db = $1 AND key = $2")
                .bind(&self.name)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        Ok(seq.map(to_seq).unwrap_or(0))
    }

    async fn set_checkpoint(&self, key: &str, seq: Sequence) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (db, key, seq)
            VALUES ($1, $2, $3)
            ON CONFLICT (db, key) DO UPDATE SET seq = EXCLUDED.seq
            "#,
        )
        .bind(&self.name)
        .bind(key)
        .bind(from_seq(seq))
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    fn watch(&self) -> watch::Receiver<Sequence> {
        self.notifier.subscribe(&self.name)
    }
}
