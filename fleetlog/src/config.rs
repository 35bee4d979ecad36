//! Configuration for opening a [`LogStore`](crate::LogStore).

use std::time::Duration;

/// Configuration for opening a [`LogStore`](crate::LogStore).
///
/// Only `path` is required; the remaining fields have defaults suitable for
/// a single-node deployment.
///
/// # Example
///
/// ```ignore
/// use fleetlog::{Config, LogStore};
///
/// let store = LogStore::open(Config::new("/var/lib/fleet/logs"))?;
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the store. Created if absent.
    ///
    /// Opening fails with [`Error::InvalidPath`](crate::Error::InvalidPath)
    /// when empty.
    pub path: String,

    /// Capacity of the write queue between producers and the writer task.
    ///
    /// When the queue is full, [`fire`](crate::LogStore::fire) blocks the
    /// producer rather than dropping the record or growing memory without
    /// bound. Defaults to 1000 pending records.
    pub queue_capacity: usize,

    /// Maximum size of the memory map backing the store, in bytes.
    ///
    /// This is an upper bound on the store's on-disk size, not a
    /// pre-allocation. Defaults to 1 GiB.
    pub map_size: usize,

    /// How long to retry acquiring the store's exclusive lock before
    /// failing with [`Error::Busy`](crate::Error::Busy).
    ///
    /// Keeps `open` from hanging indefinitely when another process holds
    /// the store. Defaults to 3 seconds.
    pub lock_timeout: Duration,
}

impl Config {
    /// Creates a configuration for the given path with default settings.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: String::new(),
            queue_capacity: 1000,
            map_size: 1 << 30,
            lock_timeout: Duration::from_secs(3),
        }
    }
}
