//! Integration tests for the Postgres replica store.
//!
//! These tests require a running PostgreSQL database.
//! Set DATABASE_URL environment variable before running; without it they
//! return early.

use std::collections::BTreeSet;
use std::sync::Arc;

use tandem_engine::store::{Edit, LocalStore};
use tandem_engine::Payload;
use tandem_server::config::Config;
use tandem_server::db::{create_pool, run_migrations, PgStore};
use tandem_server::notify::ChangeNotifier;

async fn open_store() -> Option<Arc<PgStore>> {
    let url = std::env::var("DATABASE_URL").ok()?;
    let mut config = Config::local();
    config.database_url = url;

    let pool = create_pool(&config).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let db = format!(
        "test-{}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    let store = PgStore::open(pool, db, Arc::new(ChangeNotifier::new()))
        .await
        .unwrap();
    Some(Arc::new(store))
}

#[tokio::test]
async fn changes_follow_commit_order() {
    let Some(store) = open_store().await else {
        return;
    };

    let first = store
        .put(Edit::create("emp-1", "employee", Payload::new()))
        .await
        .unwrap();
    store
        .put(Edit::create("emp-2", "employee", Payload::new()))
        .await
        .unwrap();
    store.put(Edit::update(&first, Payload::new())).await.unwrap();

    let page = store.changes(0, 10).await.unwrap();
    let ids: Vec<&str> = page.results.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["emp-2", "emp-1"]);
    assert!(page.results[0].seq < page.results[1].seq);
}

#[tokio::test]
async fn concurrent_writers_never_hide_changes_from_a_reader() {
    let Some(store) = open_store().await else {
        return;
    };
    const WRITERS: usize = 8;
    const PER_WRITER: usize = 25;

    let mut writers = Vec::new();
    for w in 0..WRITERS {
        let store = store.clone();
        writers.push(tokio::spawn(async move {
            for i in 0..PER_WRITER {
                store
                    .put(Edit::create(format!("emp-{w}-{i}"), "employee", Payload::new()))
                    .await
                    .unwrap();
            }
        }));
    }

    // Follow the feed the way a replicator does: advance the checkpoint to
    // each page's last sequence and never look back.
    let mut since = 0;
    let mut seen = BTreeSet::new();
    loop {
        let done = writers.iter().all(|w| w.is_finished());
        let page = store.changes(since, 50).await.unwrap();
        since = page.last_seq;
        seen.extend(page.results.into_iter().map(|c| c.id));
        if done && page.pending == 0 {
            let tail = store.changes(since, 50).await.unwrap();
            seen.extend(tail.results.into_iter().map(|c| c.id));
            break;
        }
        tokio::task::yield_now().await;
    }

    for writer in writers {
        writer.await.unwrap();
    }
    assert_eq!(seen.len(), WRITERS * PER_WRITER);
}
