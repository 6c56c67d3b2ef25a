//! Remote replicas.
//!
//! A [`Remote`] is one database on another replica, reached through the
//! revision-addressed transport: a changes feed, a revision diff, and bulk
//! reads and writes that carry revision tokens unchanged. A [`Connector`]
//! turns an endpoint configuration into a [`Remote`] for a database.

mod http;
mod memory;
pub mod wire;

pub use http::{HttpConnector, HttpRemote};
pub use memory::{MemoryConnector, MemoryRemote};

use crate::{
    config::RemoteEndpointConfig,
    error::Result,
    store::{ChangesPage, RevsDiff},
    Document, Sequence,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use wire::DocRef;

/// One database on a remote replica.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Changes after `since`. With `wait`, an empty feed is held open for up
    /// to that long before answering.
    async fn changes(
        &self,
        since: Sequence,
        limit: usize,
        wait: Option<Duration>,
    ) -> Result<ChangesPage>;

    /// Which of the given revisions the remote lacks.
    async fn revs_diff(&self, revs: RevsDiff) -> Result<RevsDiff>;

    /// Fetch specific leaf revisions.
    async fn bulk_get(&self, docs: Vec<DocRef>) -> Result<Vec<Document>>;

    /// Store revisions as they are, without minting new ones.
    async fn bulk_docs(&self, docs: Vec<Document>) -> Result<()>;
}

/// Opens [`Remote`]s from endpoint configuration.
pub trait Connector: Send + Sync {
    fn connect(&self, database: &str, config: &RemoteEndpointConfig) -> Result<Arc<dyn Remote>>;
}
