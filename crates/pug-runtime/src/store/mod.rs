//! In-memory entity store.
//!
//! Each entity type lives in its own [`Table`]. Every write publishes
//! exactly one [`Event`](pug_event::Event) carrying the row after the
//! change, so subscribers never read back from the table to learn what
//! happened.
//!
//! ```text
//!   writer ──► Table<T>::update(id, f)
//!                 │   write lock held
//!                 ├── apply f to a copy of the row
//!                 ├── store the copy
//!                 └── Broker<T>::publish(Updated, copy)
//!                 ▼   write lock released
//!   readers ◄── Table<T>::get / list   (never wait on writers' publish)
//! ```

mod table;

pub use table::Table;

use pug_types::Id;

/// A row that can be stored in a [`Table`].
pub trait Entity: Clone + Send + Sync + 'static {
    /// Returns the row's identifier.
    fn id(&self) -> Id;

    /// Returns a short human-readable label used by log enrichment.
    fn label(&self) -> String {
        self.id().short()
    }
}
