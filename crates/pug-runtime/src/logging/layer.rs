//! Tracing layer feeding the log table.

use super::record::RawRecord;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Targets whose events are never captured: the log pipeline itself
/// and the broker it publishes through.
const SKIPPED_TARGETS: &[&str] = &["pug_runtime::logging", "pug_event"];

/// Receiving end of an [`EntityLayer`], consumed by a
/// [`LogWriter`](super::LogWriter).
#[derive(Debug)]
pub struct LogSource {
    rx: mpsc::UnboundedReceiver<RawRecord>,
}

impl LogSource {
    pub(crate) async fn recv(&mut self) -> Option<RawRecord> {
        self.rx.recv().await
    }
}

/// A [`Layer`] that captures every event as a [`RawRecord`].
///
/// Capture never blocks the logging thread; records are enriched and
/// stored later by the [`LogWriter`](super::LogWriter).
///
/// ```no_run
/// use pug_runtime::logging::EntityLayer;
/// use tracing_subscriber::layer::SubscriberExt;
/// use tracing_subscriber::util::SubscriberInitExt;
///
/// let (layer, source) = EntityLayer::new();
/// tracing_subscriber::registry().with(layer).init();
/// # drop(source);
/// ```
#[derive(Debug, Clone)]
pub struct EntityLayer {
    tx: mpsc::UnboundedSender<RawRecord>,
}

impl EntityLayer {
    #[must_use]
    pub fn new() -> (Self, LogSource) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, LogSource { rx })
    }
}

impl<S: Subscriber> Layer<S> for EntityLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let target = meta.target();
        if SKIPPED_TARGETS.iter().any(|t| target.starts_with(t)) {
            return;
        }
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        // A closed source means the writer has stopped.
        let _ = self.tx.send(RawRecord {
            time: Utc::now(),
            level: *meta.level(),
            target: target.to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl FieldVisitor {
    fn record(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.push((field.name().to_string(), value));
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record(field, value.to_string());
    }
}
