//! Error types for night-sync.
//!
//! Per-file failures never surface as errors: they are absorbed into
//! manifest entries. What remains here is configuration, session setup and
//! the local I/O the pipeline cannot do without.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown site identifier: {0}")]
    UnknownSite(String),

    #[error("Invalid date token '{0}' (expected YYYYMMDDUT, 'today' or 'yesterday')")]
    InvalidDate(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Attach the offending path to an I/O error.
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::IoAt {
        path: path.into(),
        source,
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
