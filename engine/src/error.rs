//! Error types for the Tandem engine.

use crate::{DatabaseName, DocumentId, Revision};
use thiserror::Error;

/// All possible errors from the Tandem engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Transport errors
    #[error("remote unreachable: {0}")]
    Connectivity(String),

    #[error("access denied by remote: {0}")]
    Denied(String),

    #[error("remote protocol error: {0}")]
    Protocol(String),

    // Write errors
    #[error("write conflict on '{id}' not resolved after {attempts} attempts")]
    Conflict { id: DocumentId, attempts: u32 },

    #[error("revision mismatch on '{id}': based on {expected}, current is {actual}")]
    RevisionMismatch {
        id: DocumentId,
        expected: Revision,
        actual: Revision,
    },

    #[error("document not found: {0}")]
    NotFound(DocumentId),

    #[error("document already exists: {0}")]
    AlreadyExists(DocumentId),

    // Validation errors
    #[error("unknown document kind: {0}")]
    UnknownKind(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Queue errors
    #[error("queued {kind} {op_id} on '{database}' failed: {reason}")]
    QueueReplay {
        op_id: String,
        kind: String,
        database: DatabaseName,
        reason: String,
    },

    // Context and storage errors
    #[error("unknown database: {0}")]
    UnknownDatabase(DatabaseName),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl Error {
    /// Errors a replication session may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Connectivity(_) | Error::Protocol(_))
    }

    /// Errors raised before a write reaches the store. They are returned to
    /// the caller unchanged and never queued.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::UnknownKind(_)
                | Error::InvalidPayload(_)
                | Error::MissingRequiredField(_)
                | Error::TypeMismatch { .. }
        )
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Error::Denied(_))
    }

    /// A local write lost a compare-and-swap race and may be re-merged.
    pub fn is_write_conflict(&self) -> bool {
        matches!(
            self,
            Error::RevisionMismatch { .. } | Error::AlreadyExists(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
