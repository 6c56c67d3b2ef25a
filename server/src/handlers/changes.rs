//! Changes feed with optional long-polling.

use std::time::Duration;

use tandem_engine::remote::wire::ChangesQuery;
use tandem_engine::store::ChangesPage;
use tandem_engine::LocalStore;

use crate::config::Config;
use crate::error::Result;

/// Page size when the request names none.
pub const DEFAULT_CHANGES_LIMIT: usize = 100;
/// Largest page served in one response.
pub const MAX_CHANGES_LIMIT: usize = 1_000;

/// Read the changes feed after `query.since`.
///
/// When nothing is newer and the request carries a `timeout`, the request is
/// held until the store publishes a newer sequence or the (clamped) timeout
/// elapses. A timed-out long-poll answers with an empty page.
pub async fn handle_changes(
    store: &dyn LocalStore,
    query: ChangesQuery,
    config: &Config,
) -> Result<ChangesPage> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_CHANGES_LIMIT)
        .clamp(1, MAX_CHANGES_LIMIT);

    // Subscribe before reading so a write between the two is not missed.
    let mut rx = store.watch();
    let page = store.changes(query.since, limit).await?;

    let wait = match query.timeout {
        Some(ms) if page.results.is_empty() => config.longpoll(ms),
        _ => return Ok(page),
    };
    if wait == Duration::ZERO {
        return Ok(page);
    }

    let since = query.since;
    let woken = matches!(
        tokio::time::timeout(wait, rx.wait_for(|seq| *seq > since)).await,
        Ok(Ok(_))
    );
    if !woken {
        return Ok(page);
    }
    tracing::debug!(db = %store.name(), since, "Long-poll woken by change");
    Ok(store.changes(since, limit).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tandem_engine::store::Edit;
    use tandem_engine::{MemoryStore, Payload};

    #[tokio::test]
    async fn limit_is_clamped() {
        let store = MemoryStore::new("employees");
        for i in 0..3 {
            store
                .put(Edit::create(format!("emp-{i}"), "employee", Payload::new()))
                .await
                .unwrap();
        }
        let query = ChangesQuery {
            since: 0,
            limit: Some(0),
            timeout: None,
        };
        let page = handle_changes(&store, query, &Config::local()).await.unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.pending, 2);
    }

    #[tokio::test]
    async fn longpoll_times_out_with_empty_page() {
        let store = MemoryStore::new("employees");
        let mut config = Config::local();
        config.longpoll_max_ms = 50;
        let query = ChangesQuery {
            since: 0,
            limit: None,
            timeout: Some(10_000),
        };

        let started = tokio::time::Instant::now();
        let page = handle_changes(&store, query, &config).await.unwrap();
        assert!(page.results.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn longpoll_wakes_on_write() {
        let store = Arc::new(MemoryStore::new("employees"));
        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer
                .put(Edit::create("emp-1", "employee", Payload::new()))
                .await
                .unwrap();
        });

        let query = ChangesQuery {
            since: 0,
            limit: None,
            timeout: Some(5_000),
        };
        let page = handle_changes(&*store, query, &Config::local()).await.unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].id, "emp-1");
    }
}
