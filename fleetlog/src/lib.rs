//! fleetlog - an embedded append-only log storage engine.
//!
//! fleetlog durably persists structured log records in an embedded,
//! transactional key-value store, indexed per organization (tenant), per
//! log source, and per severity level, with reverse-chronological
//! paginated retrieval.
//!
//! # Architecture
//!
//! Producers hand records to [`LogStore::fire`] from any thread; each
//! record's field map is deep-copied through a pooled codec and pushed
//! onto a bounded queue. A single writer task drains the queue, resolves
//! the record's `(org, src)` routing fields, and commits one indexed
//! write per record. Readers query snapshot transactions concurrently
//! with the writer.
//!
//! A full queue blocks producers. This is deliberate backpressure: a burst
//! of log traffic slows producers instead of growing memory without bound
//! or silently dropping records.
//!
//! # Key Concepts
//!
//! - **LogStore**: the engine: open/close/wait lifecycle, `fire`, and
//!   the query operations.
//! - **LogStoreLayer**: a `tracing` layer forwarding events into the
//!   store, so the surrounding application logs through its normal
//!   framework.
//! - **Routing fields**: the reserved `org` and `src` fields scope each
//!   record to a tenant and source; they default to `0` / `"system"` and
//!   are stripped before persistence.
//! - **Sequence ids**: each source assigns monotonically increasing ids
//!   at commit time; the newest id doubles as the total used for
//!   pagination.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use fleetlog::{Config, Level, LogRecord, LogStore};
//!
//! let store = Arc::new(LogStore::open(Config::new("/var/lib/fleet/logs"))?);
//!
//! store.fire(
//!     &LogRecord::new(Level::Error, "disk full")
//!         .with_org(7)
//!         .with_source("device:42"),
//! )?;
//!
//! let page = store.get_list(7, "device:42", None, 0, 0, 50)?;
//! println!("{} of {} entries", page.entries.len(), page.total);
//!
//! // On shutdown, drain the queue before exiting.
//! store.close();
//! store.wait();
//! ```

mod config;
mod db;
mod error;
mod hook;
mod model;
mod pool;
mod serde;
mod store;
mod writer;

pub use config::Config;
pub use error::{Error, Result};
pub use hook::LogStoreLayer;
pub use model::{
    Entry, FieldMap, Level, ListPage, LogRecord, StoredEntry, DEFAULT_SOURCE, ORG_FIELD,
    SOURCE_FIELD,
};
pub use store::LogStore;
