//! # Tandem Engine
//!
//! An offline-first document sync engine.
//!
//! Applications write documents to local databases whether or not the network
//! is there. When it is, the engine replicates those databases with a remote
//! replica in both directions and settles concurrent edits deterministically.
//!
//! ## Design Principles
//!
//! - **Local first**: every write lands locally (or in the offline queue)
//!   before replication sees it
//! - **Explicit context**: no globals; a [`SyncContext`] owns everything
//! - **Injected capabilities**: connectivity, storage and transport sit behind
//!   traits so tests swap them for in-memory versions
//! - **Deterministic merging**: replicas that saw the same revisions pick the
//!   same winner
//!
//! ## Core Concepts
//!
//! ### Documents and revisions
//!
//! A [`Document`] carries an id, a kind, a JSON payload and a [`Revision`]
//! token (`"{generation}-{hash}"`). Each edit mints a new revision on top of
//! the previous one. Concurrent edits on two replicas produce sibling
//! revisions; both survive replication as leaves and the document reports its
//! losing leaves in `conflicts`.
//!
//! ### Writes
//!
//! The [`Repository`] validates input against the [`Schema`], then writes it
//! with compare-and-swap. Lost races are re-merged over the latest revision a
//! bounded number of times. While offline, writes go to the [`OfflineQueue`]
//! and are replayed in order once the network returns.
//!
//! ### Replication
//!
//! [`SyncCoordinator::start_sync`] runs a live [`ReplicationSession`] per
//! database; [`SyncCoordinator::sync_once`] runs a single bounded pass. Both
//! publish a [`SyncState`] that callers can watch. After replication the
//! [`resolver`] collapses conflicts using last-writer-wins on `updated_at`.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use tandem_engine::{
//!     DocumentInput, FieldType, KindSchema, MemoryStore, Schema, SyncContext,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tandem_engine::error::Result<()> {
//! // 1. Define a schema
//! let schema = Schema::new(1).with_kind(
//!     "employee",
//!     KindSchema::new()
//!         .required("name", FieldType::String)
//!         .optional("email", FieldType::String),
//! );
//!
//! // 2. Build a context around a local database
//! let context = SyncContext::builder()
//!     .database(Arc::new(MemoryStore::new("employees")))
//!     .schema(schema)
//!     .build()?;
//!
//! // 3. Write
//! let payload = json!({"name": "Alice", "email": "alice@example.com"});
//! let written = context
//!     .repository()
//!     .create(
//!         "employees",
//!         DocumentInput::new("employee", payload.as_object().cloned().unwrap_or_default()),
//!     )
//!     .await?;
//! assert!(!written.queued);
//!
//! // 4. Read
//! let all = context.repository().get_all("employees").await;
//! assert_eq!(all.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistence
//!
//! Use [`MemoryStore::export_state`] and [`MemoryStore::import_state`] with
//! [`StoreSnapshot`], and [`OfflineQueue::export`] with [`QueueSnapshot`], to
//! carry state across restarts. Both serialize to JSON with deterministic
//! ordering.

pub mod config;
pub mod connectivity;
pub mod context;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod oneshot;
pub mod queue;
pub mod remote;
pub mod replication;
pub mod repository;
pub mod resolver;
pub mod retry;
pub mod revision;
pub mod revtree;
pub mod schema;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod sync_state;

// Re-export main types at crate root
pub use config::{Credentials, EndpointOverrides, RemoteEndpointConfig};
pub use connectivity::{Connectivity, ConnectivityMonitor, Status};
pub use context::{SyncContext, SyncContextBuilder};
pub use coordinator::SyncCoordinator;
pub use document::{Document, DocumentInput, Payload};
pub use error::Error;
pub use oneshot::SyncReport;
pub use queue::{DrainReport, OfflineQueue, QueueSnapshot, QueuedOperation, QueuedWrite};
pub use remote::{Connector, HttpConnector, MemoryConnector, MemoryRemote, Remote};
pub use repository::{BulkWriteResult, Repository, WriteResult};
pub use retry::RetryPolicy;
pub use revision::Revision;
pub use schema::{FieldType, KindSchema, Schema};
pub use session::ReplicationSession;
pub use snapshot::{SnapshotMetadata, StoreSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{Databases, LocalStore, MemoryStore};
pub use sync_state::{Direction, SyncState, SyncStatus};

/// Type aliases for clarity
pub type DocumentId = String;
pub type DatabaseName = String;
pub type Timestamp = u64;
pub type Sequence = u64;
pub type SchemaVersion = u32;

/// Milliseconds since the Unix epoch, by the wall clock.
pub fn now_millis() -> Timestamp {
    Timestamp::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
