//! Core data types for the log store.
//!
//! This module defines the record types flowing through the engine: the
//! caller-facing [`LogRecord`], the durable [`StoredEntry`], and the
//! [`Entry`]/[`ListPage`] types returned by queries.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reserved field key carrying the organization (tenant) id.
///
/// Stripped from the field map before persistence. Defaults to 0, meaning
/// system-wide.
pub const ORG_FIELD: &str = "org";

/// Reserved field key carrying the log source name.
///
/// Stripped from the field map before persistence. Defaults to
/// [`DEFAULT_SOURCE`].
pub const SOURCE_FIELD: &str = "src";

/// Source name used when a record carries no [`SOURCE_FIELD`].
pub const DEFAULT_SOURCE: &str = "system";

/// Structured fields attached to a record.
pub type FieldMap = BTreeMap<String, serde_json::Value>;

/// Severity of a log record.
///
/// The discriminant is part of the on-disk level index keys, so variants
/// must keep their values across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
    Panic = 6,
}

impl Level {
    const ALL: [Level; 7] = [
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
        Level::Fatal,
        Level::Panic,
    ];

    /// Every severity the store accepts.
    ///
    /// A capture layer forwards events at all of these levels; filtering
    /// is the subscriber's concern, not the store's.
    pub fn all() -> &'static [Level] {
        &Self::ALL
    }

    /// The lowercase name of the level, as used in serialized entries and
    /// in [`stats`](crate::LogStore::stats) keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
            Level::Panic => "panic",
        }
    }

    /// Decodes a level from its on-disk discriminant.
    pub(crate) fn from_tag(tag: u8) -> Option<Level> {
        Self::ALL.get(tag as usize).copied()
    }

    /// The on-disk discriminant of the level.
    pub(crate) fn tag(&self) -> u8 {
        *self as u8
    }

    /// Maps a `tracing` level onto a store level.
    ///
    /// `tracing` has no fatal or panic severities; those are only reachable
    /// through [`fire`](crate::LogStore::fire) directly.
    pub fn from_tracing(level: &tracing::Level) -> Level {
        match *level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

impl FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|l| l.as_str() == s)
            .copied()
            .ok_or_else(|| Error::InvalidArgument(format!("unknown level: {s:?}")))
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A log record handed to the store by a producer.
///
/// Records are ephemeral: the store deep-copies the field map before
/// queueing, so the caller keeps ownership of the record it passed in.
///
/// Two field keys are reserved for routing and are stripped before
/// persistence: [`ORG_FIELD`] (tenant id, defaults to 0) and
/// [`SOURCE_FIELD`] (source name, defaults to [`DEFAULT_SOURCE`]).
///
/// # Example
///
/// ```ignore
/// use fleetlog::{Level, LogRecord};
///
/// let record = LogRecord::new(Level::Error, "disk full")
///     .with_org(7)
///     .with_source("device:42")
///     .with_field("free_bytes", 0);
/// store.fire(&record)?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Severity of the record.
    pub level: Level,

    /// Human-readable message.
    pub message: String,

    /// Structured fields, including the reserved routing keys.
    pub fields: FieldMap,

    /// Wall-clock time of the record in milliseconds since the Unix epoch.
    pub time_ms: i64,
}

impl LogRecord {
    /// Creates a record at the given level, stamped with the current time.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            fields: FieldMap::new(),
            time_ms: now_ms(),
        }
    }

    /// Attaches a structured field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Routes the record to an organization.
    pub fn with_org(self, org: i64) -> Self {
        self.with_field(ORG_FIELD, org)
    }

    /// Routes the record to a source.
    pub fn with_source(self, source: impl Into<String>) -> Self {
        self.with_field(SOURCE_FIELD, source.into())
    }
}

/// The durable form of a record, serialized as a self-describing JSON blob.
///
/// The routing fields have already been stripped; what remains is exactly
/// what a caller gets back from [`Entry::content`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Severity of the entry.
    pub level: Level,

    /// Wall-clock time in milliseconds since the Unix epoch.
    pub time_ms: i64,

    /// Human-readable message.
    #[serde(rename = "msg")]
    pub message: String,

    /// Structured fields, without the routing keys.
    pub fields: FieldMap,
}

impl StoredEntry {
    /// Serializes the entry for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserializes an entry from its stored form.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// A single entry returned by [`get_list`](crate::LogStore::get_list).
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// The entry's sequence id within its source.
    pub id: u64,

    /// The serialized [`StoredEntry`]; decode with
    /// [`StoredEntry::from_bytes`].
    pub content: Bytes,
}

/// One page of entries returned by [`get_list`](crate::LogStore::get_list).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListPage {
    /// Entries in reverse-chronological order (descending id).
    pub entries: Vec<Entry>,

    /// Total number of entries ever written to the queried source (or to
    /// the queried level within it). Doubles as the newest sequence id.
    pub total: u64,

    /// The effective start cursor used by the scan.
    ///
    /// Callers paging through results pass this value back as `start` on
    /// subsequent calls (with a growing `offset`) so pages stay stable
    /// under concurrent writes.
    pub start: u64,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
