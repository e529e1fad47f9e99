//! Structured log capture with entity references.
//!
//! ```text
//! tracing::info!(task = %id, ...)
//!        │
//!        ▼
//!   EntityLayer ──► LogSource ──► LogWriter ──► Table<LogRecord>
//!                                    │
//!                          ArgUpdater pipeline
//!                      (ReferenceUpdater: id → entity)
//! ```
//!
//! The layer only copies fields as text. The writer runs the updaters,
//! which turn ids into the entities they name and append the entities
//! those refer to, then stores the record so it can be listed and
//! subscribed to like any other entity.

mod layer;
mod record;
mod updater;
mod writer;

pub use layer::{EntityLayer, LogSource};
pub use record::{Attr, AttrValue, LogRecord, RawRecord};
pub use updater::{ArgUpdater, EntityResolver, ProvidesEntityIds, ReferenceUpdater, Resolved};
pub use writer::{LogWriter, DEFAULT_MAX_RECORDS};
