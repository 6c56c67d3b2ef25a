//! Request handlers for the replication transport.

mod changes;
mod documents;

pub use changes::*;
pub use documents::*;
