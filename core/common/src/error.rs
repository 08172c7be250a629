//! Common error types for catch-sync.

use thiserror::Error;

/// Top-level error type for catch-sync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A record with this code is already stored.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request could not be assembled from local state.
    #[error("Request build error: {0}")]
    RequestBuild(String),

    /// No network path to the backend.
    #[error("Backend unreachable: {0}")]
    Unreachable(String),

    /// Backend answered with an error status.
    #[error("Server rejected request ({status}): {message}")]
    ServerRejected { status: u16, message: String },

    /// A media file referenced by a record is missing on disk.
    #[error("Local media missing: {0}")]
    LocalMediaMissing(String),

    /// A batch sync is already running.
    #[error("A sync pass is already in progress")]
    SyncInProgress,

    /// The sync worker is gone or dropped a request.
    #[error("Sync worker stopped: {0}")]
    WorkerStopped(String),

    /// Local database operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this is a recoverable per-record channel failure.
    ///
    /// The orchestrator logs these and moves on; everything else is a
    /// contract violation and propagates.
    pub fn is_channel_failure(&self) -> bool {
        matches!(
            self,
            Error::RequestBuild(_)
                | Error::Unreachable(_)
                | Error::ServerRejected { .. }
                | Error::LocalMediaMissing(_)
        )
    }
}

impl Clone for Error {
    /// I/O errors are rebuilt from their kind and message.
    fn clone(&self) -> Self {
        match self {
            Error::DuplicateKey(s) => Error::DuplicateKey(s.clone()),
            Error::NotFound(s) => Error::NotFound(s.clone()),
            Error::RequestBuild(s) => Error::RequestBuild(s.clone()),
            Error::Unreachable(s) => Error::Unreachable(s.clone()),
            Error::ServerRejected { status, message } => Error::ServerRejected {
                status: *status,
                message: message.clone(),
            },
            Error::LocalMediaMissing(s) => Error::LocalMediaMissing(s.clone()),
            Error::SyncInProgress => Error::SyncInProgress,
            Error::WorkerStopped(s) => Error::WorkerStopped(s.clone()),
            Error::Storage(s) => Error::Storage(s.clone()),
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
            Error::Serialization(s) => Error::Serialization(s.clone()),
            Error::InvalidInput(s) => Error::InvalidInput(s.clone()),
            Error::Config(s) => Error::Config(s.clone()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
