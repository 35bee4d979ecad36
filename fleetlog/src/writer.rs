//! The single writer task.
//!
//! One dedicated thread owns every mutation of the store. Producers hand
//! it records through a bounded queue; it resolves each record's routing
//! fields and commits one indexed write per record. A failed write is
//! logged and the record dropped, so one bad record never stalls the
//! pipeline. On shutdown the thread keeps draining until the queue is
//! closed and empty, which is what makes `close` + `wait` lossless.

use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::db::Db;
use crate::model::{FieldMap, Level, StoredEntry, DEFAULT_SOURCE, ORG_FIELD, SOURCE_FIELD};
use crate::pool::Pools;

/// A record detached from its producer, pending commit.
pub(crate) struct QueuedRecord {
    pub level: Level,
    pub time_ms: i64,
    pub message: String,
    pub fields: FieldMap,
}

/// Spawns the writer thread.
///
/// The thread exits once every sender is dropped and the queue has been
/// drained. `gate`, when present, holds the thread before its first pop;
/// tests use it to keep the queue full.
pub(crate) fn spawn(
    db: Db,
    queue: Receiver<QueuedRecord>,
    pools: Arc<Pools>,
    gate: Option<Receiver<()>>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("fleetlog-writer".to_string())
        .spawn(move || {
            if let Some(gate) = gate {
                let _ = gate.recv();
            }
            run(db, queue, pools);
        })
}

fn run(db: Db, queue: Receiver<QueuedRecord>, pools: Arc<Pools>) {
    // recv errors only when the queue is closed and empty, so every
    // record admitted before close is processed before the thread exits.
    while let Ok(record) = queue.recv() {
        let mut fields = record.fields;
        let (org, source) = resolve_routing(&mut fields);

        let entry = StoredEntry {
            level: record.level,
            time_ms: record.time_ms,
            message: record.message,
            fields,
        };

        if let Err(err) = db.append(org, &source, &entry) {
            tracing::warn!(
                target: "fleetlog::writer",
                %err,
                org,
                source = source.as_str(),
                "dropping log record after failed write"
            );
        }

        pools.put_map(entry.fields);
    }
}

/// Extracts the routing fields from a record's field map, removing both
/// reserved keys so they are not persisted.
///
/// An absent or non-integer `org` defaults to 0 (system-wide); an absent
/// or non-string `src` defaults to [`DEFAULT_SOURCE`].
fn resolve_routing(fields: &mut FieldMap) -> (i64, String) {
    let org = fields
        .remove(ORG_FIELD)
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let source = fields
        .remove(SOURCE_FIELD)
        .and_then(|v| match v {
            serde_json::Value::String(s) => Some(s),
            _ => None,
        })
        .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
    (org, source)
}
