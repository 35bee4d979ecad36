//! Error types for the log store.

use thiserror::Error;

/// Errors returned by store operations.
///
/// Absence of data is never an error: queries against an organization or
/// source that has no entries yet return empty results. Only configuration
/// problems, storage failures, and encoding failures surface here.
#[derive(Debug, Error)]
pub enum Error {
    /// The configured store path was empty.
    #[error("store path must not be empty")]
    InvalidPath,

    /// A caller-supplied argument violated a documented precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Another process holds the store and the lock acquisition timed out.
    #[error("store is locked by another process")]
    Busy,

    /// The store has been closed; read operations are no longer served.
    #[error("store is closed")]
    Closed,

    /// An error from the underlying key-value store.
    #[error("storage error: {0}")]
    Storage(#[from] heed::Error),

    /// An I/O error while opening or locking the store.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A key or entry could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
