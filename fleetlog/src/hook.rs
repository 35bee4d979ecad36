//! A `tracing` layer that captures events into the store.
//!
//! [`LogStoreLayer`] turns structured tracing events into log records and
//! fires them into a [`LogStore`]. Event fields become the record's field
//! map; the reserved `org` and `src` fields route the record to its
//! tenant and source as usual.

use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::model::{now_ms, FieldMap, Level, LogRecord};
use crate::store::LogStore;

/// Forwards tracing events into a [`LogStore`].
///
/// The layer forwards events at every severity ([`Level::all`]); level
/// filtering belongs to the surrounding subscriber. Failures to enqueue
/// (for example a codec failure, or the store being closed during
/// shutdown) are swallowed; a logging hook must never take its host
/// process down.
///
/// # Example
///
/// ```ignore
/// use tracing_subscriber::prelude::*;
///
/// let store = Arc::new(LogStore::open(config)?);
/// tracing_subscriber::registry()
///     .with(LogStoreLayer::new(Arc::clone(&store)))
///     .init();
///
/// tracing::error!(org = 7, src = "device:42", "disk full");
/// ```
pub struct LogStoreLayer {
    store: Arc<LogStore>,
}

impl LogStoreLayer {
    /// Creates a layer that fires captured events into `store`.
    pub fn new(store: Arc<LogStore>) -> Self {
        Self { store }
    }

    /// The severities this layer forwards: every level the store
    /// defines.
    pub fn levels(&self) -> &'static [Level] {
        Level::all()
    }
}

impl<S> Layer<S> for LogStoreLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // The writer task reports its own failures through tracing;
        // capturing those again would feed the queue from inside the
        // engine. Events from this crate are not forwarded.
        let target = event.metadata().target();
        if target == "fleetlog" || target.starts_with("fleetlog::") {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let record = LogRecord {
            level: Level::from_tracing(event.metadata().level()),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
            time_ms: now_ms(),
        };
        let _ = self.store.fire(&record);
    }
}

/// Collects an event's fields into a record's field map, pulling the
/// `message` field out as the record message.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: FieldMap,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), serde_json::json!(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(rendered);
        } else {
            self.fields
                .insert(field.name().to_string(), serde_json::json!(rendered));
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::prelude::*;

    use super::*;
    use crate::config::Config;
    use crate::model::StoredEntry;

    fn config_for(dir: &tempfile::TempDir) -> Config {
        Config::new(dir.path().to_str().unwrap())
    }

    #[test]
    fn should_capture_event_with_routing_fields() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open(config_for(&dir)).unwrap());
        let subscriber =
            tracing_subscriber::registry().with(LogStoreLayer::new(Arc::clone(&store)));

        // when
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!(
                target: "edge_gateway",
                org = 7,
                src = "device:42",
                free_bytes = 0,
                "disk full"
            );
        });
        store.wait();
        drop(store);

        // then
        let store = LogStore::open(config_for(&dir)).unwrap();
        let page = store.get_list(7, "device:42", None, 0, 0, 10).unwrap();
        assert_eq!(page.entries.len(), 1);
        let entry = StoredEntry::from_bytes(&page.entries[0].content).unwrap();
        assert_eq!(entry.level, Level::Error);
        assert_eq!(entry.message, "disk full");
        assert_eq!(entry.fields["free_bytes"], serde_json::json!(0));
        assert!(!entry.fields.contains_key("org"));
        assert!(!entry.fields.contains_key("src"));
    }

    #[test]
    fn should_route_events_without_routing_fields_to_defaults() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open(config_for(&dir)).unwrap());
        let subscriber =
            tracing_subscriber::registry().with(LogStoreLayer::new(Arc::clone(&store)));

        // when
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "edge_gateway", "hello");
        });
        store.wait();
        drop(store);

        // then
        let store = LogStore::open(config_for(&dir)).unwrap();
        let page = store.get_list(0, "system", None, 0, 0, 10).unwrap();
        assert_eq!(page.entries.len(), 1);
    }

    #[test]
    fn should_map_tracing_levels() {
        assert_eq!(Level::from_tracing(&tracing::Level::TRACE), Level::Trace);
        assert_eq!(Level::from_tracing(&tracing::Level::DEBUG), Level::Debug);
        assert_eq!(Level::from_tracing(&tracing::Level::INFO), Level::Info);
        assert_eq!(Level::from_tracing(&tracing::Level::WARN), Level::Warn);
        assert_eq!(Level::from_tracing(&tracing::Level::ERROR), Level::Error);
    }

    #[test]
    fn should_ignore_events_from_this_crate() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open(config_for(&dir)).unwrap());
        let subscriber =
            tracing_subscriber::registry().with(LogStoreLayer::new(Arc::clone(&store)));

        // when
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "fleetlog::writer", "internal diagnostics");
        });
        store.wait();
        drop(store);

        // then
        let store = LogStore::open(config_for(&dir)).unwrap();
        let page = store.get_list(0, "system", None, 0, 0, 10).unwrap();
        assert!(page.entries.is_empty());
    }
}
