//! Enriches captured records and stores them.

use super::layer::LogSource;
use super::record::{Attr, AttrValue, LogRecord, RawRecord};
use super::updater::ArgUpdater;
use crate::store::Table;
use pug_types::{Id, Kind, SerialGenerator};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default number of records kept in memory.
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

/// Drains a [`LogSource`], runs the updaters over each record and adds
/// it to the log table, evicting the oldest beyond `max_records`.
pub struct LogWriter {
    records: Arc<Table<LogRecord>>,
    updaters: Vec<Arc<dyn ArgUpdater>>,
    serials: SerialGenerator,
    max_records: usize,
}

impl LogWriter {
    #[must_use]
    pub fn new(records: Arc<Table<LogRecord>>, max_records: usize) -> Self {
        Self {
            records,
            updaters: Vec::new(),
            serials: SerialGenerator::new(),
            max_records: max_records.max(1),
        }
    }

    /// Adds an updater; updaters run in the order added.
    #[must_use]
    pub fn updater(mut self, updater: Arc<dyn ArgUpdater>) -> Self {
        self.updaters.push(updater);
        self
    }

    /// Enriches and stores one record.
    pub(crate) async fn write(&self, raw: RawRecord, kept: &mut VecDeque<Id>) -> LogRecord {
        let mut attrs: Vec<Attr> = raw
            .fields
            .into_iter()
            .map(|(key, value)| Attr {
                key,
                value: AttrValue::Text(value),
            })
            .collect();
        for updater in &self.updaters {
            updater.update(&mut attrs);
        }

        let record = self
            .records
            .add(LogRecord {
                id: Id::new(Kind::Log),
                serial: self.serials.next(),
                time: raw.time,
                level: raw.level,
                target: raw.target,
                message: raw.message,
                attrs,
            })
            .await;

        kept.push_back(record.id);
        while kept.len() > self.max_records {
            if let Some(old) = kept.pop_front() {
                // Evicted rows may already be gone after a reset.
                if let Err(e) = self.records.delete(old).await {
                    tracing::debug!(record = %old, error = %e, "log record eviction skipped");
                }
            }
        }
        record
    }

    /// Spawns the writer loop. It stops when `token` is cancelled or
    /// every [`EntityLayer`](super::EntityLayer) has been dropped.
    pub fn spawn(self, mut source: LogSource, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut kept = VecDeque::new();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    raw = source.recv() => match raw {
                        Some(raw) => {
                            self.write(raw, &mut kept).await;
                        }
                        None => break,
                    },
                }
            }
        })
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("updaters", &self.updaters.len())
            .field("max_records", &self.max_records)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{ProvidesEntityIds, ReferenceUpdater};
    use crate::module::Module;
    use chrono::Utc;

    fn raw(message: &str, fields: &[(&str, String)]) -> RawRecord {
        RawRecord {
            time: Utc::now(),
            level: tracing::Level::INFO,
            target: "test".into(),
            message: message.into(),
            fields: fields.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect(),
        }
    }

    #[tokio::test]
    async fn enriches_and_evicts() {
        let modules = Arc::new(Table::new(8));
        let module = modules.add(Module::new("vpc")).await;
        let records = Arc::new(Table::new(8));
        let writer = LogWriter::new(Arc::clone(&records), 2)
            .updater(Arc::new(ReferenceUpdater::new().with(Kind::Module, modules)));

        let mut kept = VecDeque::new();
        let first = writer
            .write(raw("one", &[("module", module.id.to_string())]), &mut kept)
            .await;
        assert_eq!(first.attr("module").unwrap().value.to_string(), "vpc");
        assert_eq!(first.entity_ids(), [module.id]);

        writer.write(raw("two", &[]), &mut kept).await;
        let third = writer.write(raw("three", &[]), &mut kept).await;

        assert_eq!(records.len(), 2);
        assert!(records.find(first.id).is_none());
        assert_eq!(third.serial.get(), 3);
    }

    #[tokio::test]
    async fn eviction_skips_records_already_gone() {
        let records = Arc::new(Table::new(8));
        let writer = LogWriter::new(Arc::clone(&records), 1);

        let mut kept = VecDeque::new();
        let first = writer.write(raw("one", &[]), &mut kept).await;
        records.delete(first.id).await.unwrap();
        let second = writer.write(raw("two", &[]), &mut kept).await;

        assert_eq!(records.len(), 1);
        assert_eq!(kept, [second.id]);
        assert!(records.find(second.id).is_some());
    }

    #[tokio::test]
    async fn spawned_writer_stores_layer_events() {
        use crate::logging::EntityLayer;
        use tracing_subscriber::layer::SubscriberExt;

        let (layer, source) = EntityLayer::new();
        let records = Arc::new(Table::new(8));
        let token = CancellationToken::new();
        let handle = LogWriter::new(Arc::clone(&records), 100).spawn(source, token.clone());

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "pug_runtime::task", task = "x", "something happened");
        });

        for _ in 0..100 {
            if !records.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let stored = records.list();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].message, "something happened");
        assert_eq!(stored[0].level, tracing::Level::WARN);

        token.cancel();
        handle.await.unwrap();
    }
}
