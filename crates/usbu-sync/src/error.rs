//! Error types for the snapshot service

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use usbu_detect::DetectError;

/// Errors from the snapshot store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },

    /// The file exists but is not a snapshot array or record
    #[error("malformed snapshot file {}: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode snapshots: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors surfaced by [`SnapshotService`](crate::SnapshotService)
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Detect(#[from] DetectError),

    /// A blocking worker panicked or was cancelled
    #[error("background task failed: {0}")]
    Task(String),

    #[error("no USB backend configured")]
    NoUsbBackend,

    #[error("no live port found for {0}")]
    NotFound(String),

    #[error("{target} matches several ports ({}); pin an identity tag", .candidates.join(", "))]
    Ambiguous {
        target: String,
        candidates: Vec<String>,
    },

    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        source: tokio_serial::Error,
    },

    #[error("serial I/O on {port} failed: {source}")]
    Io { port: String, source: io::Error },

    #[error("no response from {port} within {timeout_ms}ms")]
    Timeout { port: String, timeout_ms: u64 },
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(e: tokio::task::JoinError) -> Self {
        ServiceError::Task(e.to_string())
    }
}
