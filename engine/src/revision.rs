//! Revision tokens for optimistic concurrency and replication.
//!
//! A revision is written as `"{generation}-{hash}"`. The generation counts the
//! edits on a branch; the hash is a fresh random token minted by the store that
//! accepted the edit. Revisions are totally ordered, which gives every replica
//! the same answer when it has to pick one leaf over another.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Hash used for revisions handed out before a write reaches a store.
const PROVISIONAL_HASH: &str = "queued";

/// An opaque, totally ordered revision token.
///
/// Ordering rules:
/// 1. Higher generation wins
/// 2. If generations are equal, lexicographically higher hash wins
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision {
    generation: u64,
    hash: String,
}

impl Revision {
    /// Build a revision from its parts.
    pub fn new(generation: u64, hash: impl Into<String>) -> Self {
        Self {
            generation,
            hash: hash.into(),
        }
    }

    /// Mint the first revision of a new document.
    pub fn first() -> Self {
        Self::new(1, fresh_hash())
    }

    /// Placeholder revision for a write that is still sitting in the offline queue.
    pub fn provisional() -> Self {
        Self::new(0, PROVISIONAL_HASH)
    }

    /// Mint the revision that follows this one on the same branch.
    pub fn next(&self) -> Self {
        Self::new(self.generation + 1, fresh_hash())
    }

    /// Whether this is the placeholder given to queued writes.
    pub fn is_provisional(&self) -> bool {
        self.generation == 0
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }
}

fn fresh_hash() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.hash)
    }
}

impl FromStr for Revision {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, hash) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidPayload(format!("malformed revision '{s}'")))?;
        let generation = generation
            .parse()
            .map_err(|_| Error::InvalidPayload(format!("malformed revision '{s}'")))?;
        if hash.is_empty() {
            return Err(Error::InvalidPayload(format!("malformed revision '{s}'")));
        }
        Ok(Self::new(generation, hash))
    }
}

impl TryFrom<String> for Revision {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Revision> for String {
    fn from(rev: Revision) -> Self {
        rev.to_string()
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.generation
            .cmp(&other.generation)
            .then_with(|| self.hash.cmp(&other.hash))
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
