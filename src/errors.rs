// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Collaborator-specific enums (`RepositoryError`, `ExecutorError`,
//! `SessionError`, `QuotaParseError`) live next to their traits and are
//! re-exported here; `DatapipeError` is the umbrella used at module
//! boundaries and in the binary.

use thiserror::Error;

pub use crate::exec::ExecutorError;
pub use crate::quota::QuotaParseError;
pub use crate::repo::RepositoryError;
pub use crate::session::SessionError;

#[derive(Error, Debug)]
pub enum DatapipeError {
    /// Bad or unknown configuration key, unresolved reference, malformed
    /// value. Fatal at startup, never retried.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    QuotaParse(#[from] QuotaParseError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DatapipeError>;
