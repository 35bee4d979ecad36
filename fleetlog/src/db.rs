//! The embedded key-value store backing the log.
//!
//! This module owns the heed (LMDB) environment and the three databases
//! that make up the on-disk index (see [`crate::serde`] for the key
//! scheme). All mutations go through [`Db::append`] and [`Db::delete`],
//! which the engine serializes through its single writer task; reads run
//! on snapshot transactions concurrent with the writer.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use fs2::FileExt;
use heed::byteorder::BigEndian;
use heed::types::{Bytes as ByteSlice, U64};
use heed::{Database, Env, EnvOpenOptions};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Entry, Level, ListPage, StoredEntry};
use crate::serde::{
    bounds, org_prefix, prefix_range, source_prefix, CounterKey, CounterKind, EntryKey, LevelKey,
};

const LOCK_FILE: &str = ".lock";

/// Handle to the embedded store.
///
/// Cheap to clone: the environment is reference-counted and database
/// handles are plain indices. The advisory lock file is held for as long
/// as any clone is alive.
#[derive(Clone)]
pub(crate) struct Db {
    env: Env,
    entries: Database<ByteSlice, ByteSlice>,
    levels: Database<ByteSlice, U64<BigEndian>>,
    counters: Database<ByteSlice, U64<BigEndian>>,
    _lock: Arc<File>,
}

impl Db {
    /// Opens (creating if absent) the store at the configured path.
    ///
    /// Acquires an exclusive advisory lock first, retrying up to
    /// `config.lock_timeout` so that a store held by another process
    /// fails fast with [`Error::Busy`] instead of corrupting or hanging.
    pub(crate) fn open(config: &Config) -> Result<Db> {
        if config.path.is_empty() {
            return Err(Error::InvalidPath);
        }
        let path = Path::new(&config.path);
        std::fs::create_dir_all(path)?;
        let lock = acquire_lock(&path.join(LOCK_FILE), config.lock_timeout)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(config.map_size)
                .max_dbs(3)
                .open(path)?
        };

        let mut txn = env.write_txn()?;
        let entries = env.create_database::<ByteSlice, ByteSlice>(&mut txn, Some("entries"))?;
        let levels =
            env.create_database::<ByteSlice, U64<BigEndian>>(&mut txn, Some("levels"))?;
        let counters =
            env.create_database::<ByteSlice, U64<BigEndian>>(&mut txn, Some("counters"))?;
        txn.commit()?;

        Ok(Db {
            env,
            entries,
            levels,
            counters,
            _lock: Arc::new(lock),
        })
    }

    /// Commits one entry under `(org, source)` in a single transaction.
    ///
    /// Bumps the source's entry counter to assign the id, writes the
    /// serialized entry, then bumps the per-level counter and writes the
    /// level-index pointer. Counters are created lazily here; nothing
    /// pre-creates them.
    ///
    /// Returns the assigned sequence id.
    pub(crate) fn append(&self, org: i64, source: &str, entry: &StoredEntry) -> Result<u64> {
        ensure_org(org)?;
        let blob = entry.to_bytes()?;

        let mut txn = self.env.write_txn()?;

        let counter_key = CounterKey::entries(org, source).encode();
        let id = self.counters.get(&txn, &counter_key)?.unwrap_or(0) + 1;
        self.counters.put(&mut txn, &counter_key, &id)?;
        self.entries
            .put(&mut txn, &EntryKey::new(org, source, id).encode(), &blob)?;

        let level_counter_key = CounterKey::level(org, source, entry.level).encode();
        let lseq = self.counters.get(&txn, &level_counter_key)?.unwrap_or(0) + 1;
        self.counters.put(&mut txn, &level_counter_key, &lseq)?;
        self.levels.put(
            &mut txn,
            &LevelKey::new(org, source, entry.level, lseq).encode(),
            &id,
        )?;

        txn.commit()?;
        Ok(id)
    }

    /// Lists entries for `(org, source)` in reverse-chronological order.
    ///
    /// `total` is the target counter: the level counter when `level` is
    /// set, the entry counter otherwise. A `start` of 0 means "newest"; a
    /// `start` past the counter is clamped down to it. The scan begins at
    /// `start - offset` and walks toward older entries, collecting up to
    /// `limit`.
    ///
    /// A source or level that was never written is an empty page with
    /// `total = 0`, not an error.
    pub(crate) fn list(
        &self,
        org: i64,
        source: &str,
        level: Option<Level>,
        start: u64,
        offset: u64,
        limit: u64,
    ) -> Result<ListPage> {
        ensure_org(org)?;
        let txn = self.env.read_txn()?;

        let counter_key = match level {
            Some(level) => CounterKey::level(org, source, level),
            None => CounterKey::entries(org, source),
        }
        .encode();
        let total = self.counters.get(&txn, &counter_key)?.unwrap_or(0);

        let start = if start == 0 || start > total { total } else { start };
        let begin = start.saturating_sub(offset);

        let mut entries = Vec::new();
        if begin > 0 && limit > 0 {
            match level {
                None => {
                    let lo = EntryKey::new(org, source, 1).encode();
                    let hi = EntryKey::new(org, source, begin).encode();
                    let range = (Bound::Included(lo.as_slice()), Bound::Included(hi.as_slice()));
                    for item in self.entries.rev_range(&txn, &range)? {
                        let (key, value) = item?;
                        entries.push(Entry {
                            id: EntryKey::decode_seq(key)?,
                            content: Bytes::copy_from_slice(value),
                        });
                        if entries.len() as u64 >= limit {
                            break;
                        }
                    }
                }
                Some(level) => {
                    let lo = LevelKey::new(org, source, level, 1).encode();
                    let hi = LevelKey::new(org, source, level, begin).encode();
                    let range = (Bound::Included(lo.as_slice()), Bound::Included(hi.as_slice()));
                    for item in self.levels.rev_range(&txn, &range)? {
                        let (_, id) = item?;
                        let entry_key = EntryKey::new(org, source, id).encode();
                        // A dangling pointer is skipped, not an error.
                        let Some(value) = self.entries.get(&txn, &entry_key)? else {
                            continue;
                        };
                        entries.push(Entry {
                            id,
                            content: Bytes::copy_from_slice(value),
                        });
                        if entries.len() as u64 >= limit {
                            break;
                        }
                    }
                }
            }
        }

        Ok(ListPage {
            entries,
            total,
            start,
        })
    }

    /// Deletes everything written under `(org, source)` in one
    /// transaction: entries, level indices, and counters.
    ///
    /// Deleting a source that does not exist is a success; the operation
    /// is idempotent by design.
    pub(crate) fn delete(&self, org: i64, source: &str) -> Result<()> {
        ensure_org(org)?;
        let (lo, hi) = prefix_range(&source_prefix(org, source));
        let range = bounds(&lo, &hi);

        let mut txn = self.env.write_txn()?;
        self.entries.delete_range(&mut txn, &range)?;
        self.levels.delete_range(&mut txn, &range)?;
        self.counters.delete_range(&mut txn, &range)?;
        txn.commit()?;
        Ok(())
    }

    /// Per-level entry counts for an organization, aggregated across all
    /// of its sources.
    pub(crate) fn stats(&self, org: i64) -> Result<BTreeMap<String, u64>> {
        ensure_org(org)?;
        let (lo, hi) = prefix_range(&org_prefix(org));
        let range = bounds(&lo, &hi);

        let txn = self.env.read_txn()?;
        let mut stats = BTreeMap::new();
        for item in self.counters.range(&txn, &range)? {
            let (key, count) = item?;
            if let CounterKind::Level(level) = CounterKey::decode(key)?.kind {
                *stats.entry(level.as_str().to_string()).or_insert(0) += count;
            }
        }
        Ok(stats)
    }

    /// Distinct source names that have been written under an
    /// organization, in lexicographic order.
    pub(crate) fn sources(&self, org: i64) -> Result<Vec<String>> {
        ensure_org(org)?;
        let (lo, hi) = prefix_range(&org_prefix(org));
        let range = bounds(&lo, &hi);

        let txn = self.env.read_txn()?;
        let mut sources = Vec::new();
        for item in self.counters.range(&txn, &range)? {
            let (key, _) = item?;
            let counter = CounterKey::decode(key)?;
            if counter.kind == CounterKind::Entries {
                sources.push(counter.source);
            }
        }
        Ok(sources)
    }
}

fn ensure_org(org: i64) -> Result<()> {
    if org < 0 {
        return Err(Error::InvalidArgument(format!(
            "organization id must be non-negative, got {org}"
        )));
    }
    Ok(())
}

/// Acquires an exclusive advisory lock, retrying until the timeout.
fn acquire_lock(path: &Path, timeout: Duration) -> Result<File> {
    let file = OpenOptions::new().create(true).write(true).open(path)?;
    let deadline = Instant::now() + timeout;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(file),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(Error::Busy);
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(err) => return Err(Error::Io(err)),
        }
    }
}
