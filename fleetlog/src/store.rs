//! The log store engine.
//!
//! [`LogStore`] is the primary entry point: it owns the embedded store,
//! the bounded write queue, and the single writer task, and exposes the
//! read operations used by the surrounding backend.

use std::collections::BTreeMap;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::model::{Level, ListPage, LogRecord, DEFAULT_SOURCE};
use crate::pool::Pools;
use crate::writer::{self, QueuedRecord};

/// An embedded, per-tenant append-only log store.
///
/// Records enter through [`fire`](LogStore::fire) (directly or via the
/// [`LogStoreLayer`](crate::LogStoreLayer) capture layer), flow through a
/// bounded queue, and are committed by a single writer task. Queries run
/// on snapshot transactions concurrent with the writer.
///
/// # Lifecycle
///
/// [`open`](LogStore::open) spawns the writer; [`close`](LogStore::close)
/// stops admission and lets the writer drain; [`wait`](LogStore::wait)
/// blocks until every admitted record is durable and the backing file is
/// closed. Dropping the store closes it and joins the writer.
///
/// # Thread Safety
///
/// All methods take `&self`; any number of threads may fire records and
/// run queries concurrently.
///
/// # Example
///
/// ```ignore
/// use fleetlog::{Config, Level, LogRecord, LogStore};
///
/// let store = LogStore::open(Config::new("/var/lib/fleet/logs"))?;
/// store.fire(&LogRecord::new(Level::Error, "disk full").with_org(7))?;
/// // ... on shutdown:
/// store.close();
/// store.wait();
/// ```
pub struct LogStore {
    db: RwLock<Option<Db>>,
    sender: Mutex<Option<SyncSender<QueuedRecord>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    pools: Arc<Pools>,
}

impl LogStore {
    /// Opens (creating if absent) the store described by `config` and
    /// starts its writer task.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPath`] when the configured path is empty.
    /// - [`Error::Busy`] when another process holds the store and the
    ///   lock was not released within `config.lock_timeout`.
    /// - [`Error::Storage`]/[`Error::Io`] when the backing store cannot
    ///   be opened.
    pub fn open(config: Config) -> Result<Self> {
        Self::open_inner(config, None)
    }

    fn open_inner(config: Config, gate: Option<Receiver<()>>) -> Result<Self> {
        let db = Db::open(&config)?;
        let pools = Arc::new(Pools::new());
        let (sender, queue) = sync_channel(config.queue_capacity);
        let writer = writer::spawn(db.clone(), queue, Arc::clone(&pools), gate)?;

        Ok(Self {
            db: RwLock::new(Some(db)),
            sender: Mutex::new(Some(sender)),
            writer: Mutex::new(Some(writer)),
            pools,
        })
    }

    /// Enqueues a record for persistence.
    ///
    /// The record's field map is deep-copied before this returns, so the
    /// caller keeps ownership. When the queue is full the call blocks
    /// until the writer frees a slot; bursty producers are slowed rather
    /// than records dropped or memory grown without bound.
    ///
    /// After [`close`](LogStore::close) this is a no-op returning
    /// `Ok(())`: records produced during shutdown are silently dropped.
    /// This is deliberately asymmetric with the read operations (which
    /// return [`Error::Closed`]): a logging path that starts failing
    /// mid-shutdown would take its host down with it.
    ///
    /// # Errors
    ///
    /// Only [`Error::Encoding`] when the field map cannot be copied.
    pub fn fire(&self, record: &LogRecord) -> Result<()> {
        let Some(sender) = self.sender.lock().clone() else {
            return Ok(());
        };

        let fields = self.pools.copy_fields(&record.fields)?;
        let queued = QueuedRecord {
            level: record.level,
            time_ms: record.time_ms,
            message: record.message.clone(),
            fields,
        };

        if let Err(err) = sender.send(queued) {
            // Closed between the sender clone and the send: treat like
            // any other post-close record.
            self.pools.put_map(err.0.fields);
        }
        Ok(())
    }

    /// The severities this store accepts: all of them.
    ///
    /// Capture layers use this to declare which events to forward;
    /// filtering belongs to the subscriber, not the store.
    pub fn levels(&self) -> &'static [Level] {
        Level::all()
    }

    /// Stops accepting new records.
    ///
    /// Idempotent and non-blocking. Records already admitted keep
    /// draining; use [`wait`](LogStore::wait) to block until they are
    /// durable.
    pub fn close(&self) {
        self.sender.lock().take();
    }

    /// Whether [`close`](LogStore::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Blocks until the writer has drained every admitted record and the
    /// backing file is closed.
    ///
    /// Implies [`close`](LogStore::close). Intended for process-exit
    /// sequencing; after this returns, read operations fail with
    /// [`Error::Closed`].
    pub fn wait(&self) {
        self.close();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            let _ = writer.join();
        }
        self.db.write().take();
    }

    /// Closes the store when the given cancellation token fires.
    ///
    /// This bridges process-wide shutdown orchestration to the store
    /// without the orchestrator needing to know about its internals.
    /// Must be called from within a tokio runtime.
    pub fn watch_shutdown(self: &Arc<Self>, token: CancellationToken) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            token.cancelled().await;
            store.close();
        });
    }

    /// Lists entries for `(org, source)` in reverse-chronological order.
    ///
    /// An empty `source` defaults to `"system"`. `level` restricts the
    /// scan to one severity via the level index. The returned page's
    /// `start` is the effective cursor: pass it back unchanged (with a
    /// growing `offset`) to page through a stable snapshot of the log
    /// even while new records arrive.
    ///
    /// A source or level with no data yields an empty page with
    /// `total = 0`; that is a valid outcome, not an error.
    pub fn get_list(
        &self,
        org: i64,
        source: &str,
        level: Option<Level>,
        start: u64,
        offset: u64,
        limit: u64,
    ) -> Result<ListPage> {
        let source = if source.is_empty() {
            DEFAULT_SOURCE
        } else {
            source
        };
        self.db()?.list(org, source, level, start, offset, limit)
    }

    /// Deletes every entry, level index, and counter under
    /// `(org, source)` in one transaction.
    ///
    /// Deleting a source that does not exist succeeds; the operation is
    /// idempotent.
    pub fn delete(&self, org: i64, source: &str) -> Result<()> {
        self.db()?.delete(org, source)
    }

    /// Per-level entry counts for an organization, aggregated across all
    /// of its sources.
    pub fn stats(&self, org: i64) -> Result<BTreeMap<String, u64>> {
        self.db()?.stats(org)
    }

    /// Distinct source names written under an organization, in
    /// lexicographic order.
    pub fn sources(&self, org: i64) -> Result<Vec<String>> {
        self.db()?.sources(org)
    }

    fn db(&self) -> Result<Db> {
        self.db.read().clone().ok_or(Error::Closed)
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        self.close();
        if let Some(writer) = self.writer.get_mut().take() {
            let _ = writer.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::model::StoredEntry;

    impl LogStore {
        /// Opens a store whose writer does not start draining until the
        /// returned gate is dropped. Lets tests observe queue behavior.
        fn open_paused(config: Config) -> Result<(Self, SyncSender<()>)> {
            let (gate_tx, gate_rx) = sync_channel(1);
            let store = Self::open_inner(config, Some(gate_rx))?;
            Ok((store, gate_tx))
        }
    }

    fn config_for(dir: &tempfile::TempDir) -> Config {
        Config::new(dir.path().to_str().unwrap())
    }

    fn record(level: Level, message: &str) -> LogRecord {
        LogRecord::new(level, message)
    }

    #[test]
    fn should_persist_admitted_records_before_wait_returns() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(config_for(&dir)).unwrap();
        for i in 0..50 {
            store
                .fire(&record(Level::Info, &format!("m{i}")).with_org(3).with_source("dev"))
                .unwrap();
        }

        // when - close immediately and wait for the drain
        store.close();
        store.wait();
        drop(store);

        // then - every record fired before close is durable
        let store = LogStore::open(config_for(&dir)).unwrap();
        let page = store.get_list(3, "dev", None, 0, 0, 100).unwrap();
        assert_eq!(page.total, 50);
        assert_eq!(page.entries.len(), 50);
    }

    #[test]
    fn should_silently_drop_records_fired_after_close() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(config_for(&dir)).unwrap();
        store.fire(&record(Level::Info, "before")).unwrap();
        store.close();

        // when - firing after close is a documented no-op success
        let result = store.fire(&record(Level::Info, "after"));
        store.wait();
        drop(store);

        // then
        assert!(result.is_ok());
        let store = LogStore::open(config_for(&dir)).unwrap();
        let page = store.get_list(0, "", None, 0, 0, 10).unwrap();
        assert_eq!(page.total, 1);
        let entry = StoredEntry::from_bytes(&page.entries[0].content).unwrap();
        assert_eq!(entry.message, "before");
    }

    #[test]
    fn should_route_records_without_routing_fields_to_defaults() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(config_for(&dir)).unwrap();

        // when
        store.fire(&record(Level::Warn, "no routing")).unwrap();
        store.wait();
        drop(store);

        // then - retrievable under org 0, source "system"
        let store = LogStore::open(config_for(&dir)).unwrap();
        let page = store.get_list(0, "system", None, 0, 0, 10).unwrap();
        assert_eq!(page.entries.len(), 1);
    }

    #[test]
    fn should_serve_reads_concurrently_with_the_writer() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(config_for(&dir)).unwrap();

        // when
        store.fire(&record(Level::Info, "live")).unwrap();

        // then - the record becomes visible without closing the store
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let page = store.get_list(0, "", None, 0, 0, 10).unwrap();
            if page.total == 1 {
                break;
            }
            assert!(Instant::now() < deadline, "record never became visible");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn should_fail_reads_after_wait() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(config_for(&dir)).unwrap();

        // when
        store.wait();

        // then
        assert!(matches!(
            store.get_list(0, "", None, 0, 0, 10),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn should_be_safe_to_close_and_wait_repeatedly() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(config_for(&dir)).unwrap();

        // when/then - no panic, no deadlock
        store.close();
        store.close();
        store.wait();
        store.wait();
    }

    #[test]
    fn should_block_producer_when_queue_is_full() {
        // given - a tiny queue and a writer that is not draining yet
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(&dir);
        config.queue_capacity = 2;
        let (store, gate) = LogStore::open_paused(config).unwrap();
        let store = Arc::new(store);

        store.fire(&record(Level::Info, "q0")).unwrap();
        store.fire(&record(Level::Info, "q1")).unwrap();

        // when - one more producer than the queue has room for
        let done = Arc::new(AtomicBool::new(false));
        let blocked = {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                store.fire(&record(Level::Info, "q2")).unwrap();
                done.store(true, Ordering::SeqCst);
            })
        };
        std::thread::sleep(Duration::from_millis(200));

        // then - the extra producer is blocked, not dropped or errored
        assert!(!done.load(Ordering::SeqCst));

        // when - the writer starts draining
        drop(gate);
        blocked.join().unwrap();
        assert!(done.load(Ordering::SeqCst));

        store.wait();
        drop(store);

        // then - all three records were persisted
        let store = LogStore::open(config_for(&dir)).unwrap();
        let page = store.get_list(0, "", None, 0, 0, 10).unwrap();
        assert_eq!(page.total, 3);
    }

    #[test]
    fn should_declare_every_severity() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::open(config_for(&dir)).unwrap();

        // when/then
        assert_eq!(store.levels().len(), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn should_close_when_shutdown_token_fires() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open(config_for(&dir)).unwrap());
        let token = CancellationToken::new();
        store.watch_shutdown(token.clone());

        // when
        token.cancel();

        // then
        let deadline = Instant::now() + Duration::from_secs(5);
        while !store.is_closed() {
            assert!(Instant::now() < deadline, "store never closed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
