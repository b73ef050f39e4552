// src/repo/mod.rs

//! Key-addressable artifact stores.
//!
//! A [`Repository`] maps a job identifier to an opaque artifact. The
//! scheduler never assumes anything about the backing store beyond this
//! contract; backends range from in-process maps to filesystem directories,
//! with network-backed variants registered externally through the config
//! registry.
//!
//! The contract distinguishes "this id has no value" ([`RepositoryError::NotFound`])
//! from "the backend is down" ([`RepositoryError::Unavailable`]) so the
//! scheduler can tell "not ready" from "retry next tick".

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub mod file;
pub mod memory;

pub use file::{FileRepository, MetadataFileRepository};
pub use memory::MemoryRepository;

/// A stored value: raw bytes or structured metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Blob(Vec<u8>),
    Metadata(serde_json::Value),
}

impl Artifact {
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Artifact::Blob(bytes) => Some(bytes),
            Artifact::Metadata(_) => None,
        }
    }

    pub fn as_metadata(&self) -> Option<&serde_json::Value> {
        match self {
            Artifact::Blob(_) => None,
            Artifact::Metadata(value) => Some(value),
        }
    }
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Backend I/O failure; transient, retried next tick.
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    /// Normal "no value yet" signal, not a failure.
    #[error("no value for id {0:?}")]
    NotFound(String),

    /// The operation cannot be honored for this id (e.g. unsafe id, wrong
    /// artifact shape for the backend).
    #[error("conflict for id {id:?}: {reason}")]
    Conflict { id: String, reason: String },
}

/// Polymorphic key-addressable store.
///
/// Invariants:
/// - `put` is idempotent: repeating a put of the same value is observably
///   a no-op.
/// - `delete` of a missing id is not an error.
/// - `ids` is an unordered, restartable snapshot.
#[async_trait]
pub trait Repository: Send + Sync + fmt::Debug {
    async fn contains(&self, id: &str) -> Result<bool, RepositoryError>;
    async fn get(&self, id: &str) -> Result<Artifact, RepositoryError>;
    async fn put(&self, id: &str, value: Artifact) -> Result<(), RepositoryError>;
    async fn delete(&self, id: &str) -> Result<(), RepositoryError>;
    async fn ids(&self) -> Result<Vec<String>, RepositoryError>;
}

/// Job ids double as filesystem path components, object keys and label
/// values; reject anything that cannot be used that way.
pub(crate) fn validate_id(id: &str) -> Result<(), RepositoryError> {
    let unsafe_id = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains('/')
        || id.contains('\\')
        || id.contains('\0');
    if unsafe_id {
        return Err(RepositoryError::Conflict {
            id: id.to_string(),
            reason: "id is not safe as a path component".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsafe_ids() {
        assert!(validate_id("job-1").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("..").is_err());
        assert!(validate_id("a/b").is_err());
        assert!(validate_id("a\\b").is_err());
    }
}
