//! Keyed entity table with event fan-out.

use super::Entity;
use crate::error::PugError;
use pug_event::{Broker, EventKind, Subscription};
use pug_types::Id;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// A mapping from [`Id`] to `T` that publishes every change.
///
/// # Locking
///
/// Writers are serialized by an async write lock that is held across
/// both the change and its publish, so events for one entity reach
/// subscribers in the order the changes were made. Rows themselves sit
/// behind a short-lived [`RwLock`]; readers never wait for a publish
/// to finish.
///
/// A mutator passed to [`Table::update`] runs under the write lock. It
/// must not write to the same table.
///
/// # Example
///
/// ```
/// use pug_runtime::store::{Entity, Table};
/// use pug_types::{Id, Kind};
///
/// #[derive(Clone)]
/// struct Row { id: Id, n: u32 }
///
/// impl Entity for Row {
///     fn id(&self) -> Id { self.id }
/// }
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let table = Table::new(8);
/// let id = Id::new(Kind::Task);
/// table.add(Row { id, n: 1 }).await;
/// table.update(id, |r| r.n += 1).await.unwrap();
/// assert_eq!(table.get(id).unwrap().n, 2);
/// # });
/// ```
pub struct Table<T> {
    rows: RwLock<HashMap<Id, T>>,
    write: Mutex<()>,
    broker: Arc<Broker<T>>,
}

impl<T: Entity> Table<T> {
    /// Creates an empty table whose subscribers buffer `buffer` events.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            write: Mutex::new(()),
            broker: Arc::new(Broker::new(buffer)),
        }
    }

    /// Inserts a row.
    ///
    /// Publishes `Created`, or `Updated` when a row with the same id is
    /// overwritten.
    pub async fn add(&self, row: T) -> T {
        let _guard = self.write.lock().await;
        let previous = self.rows.write().insert(row.id(), row.clone());
        let kind = if previous.is_some() {
            EventKind::Updated
        } else {
            EventKind::Created
        };
        self.broker.publish(kind, row.clone()).await;
        row
    }

    /// Inserts `row` unless a row matching `conflict` already exists.
    ///
    /// The check and the insert happen under the write lock, so two
    /// callers racing to add the same row cannot both succeed. Returns
    /// `None` when a conflicting row was found; nothing is published.
    pub async fn add_unless(&self, row: T, conflict: impl Fn(&T) -> bool) -> Option<T> {
        let _guard = self.write.lock().await;
        if self.rows.read().values().any(conflict) {
            return None;
        }
        self.rows.write().insert(row.id(), row.clone());
        self.broker.publish(EventKind::Created, row.clone()).await;
        Some(row)
    }

    /// Applies `mutate` to the row and publishes `Updated`.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if no row has `id`.
    pub async fn update<F>(&self, id: Id, mutate: F) -> Result<T, PugError>
    where
        F: FnOnce(&mut T),
    {
        self.try_update(id, |row| {
            mutate(row);
            Ok(())
        })
        .await
    }

    /// Applies a fallible `mutate` to the row.
    ///
    /// The row is only replaced, and `Updated` only published, when
    /// `mutate` succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if no row has `id`, or the error
    /// returned by `mutate`.
    pub async fn try_update<F>(&self, id: Id, mutate: F) -> Result<T, PugError>
    where
        F: FnOnce(&mut T) -> Result<(), PugError>,
    {
        let _guard = self.write.lock().await;
        let mut row = self.get(id)?;
        mutate(&mut row)?;
        self.rows.write().insert(id, row.clone());
        self.broker.publish(EventKind::Updated, row.clone()).await;
        Ok(row)
    }

    /// Removes a row and publishes `Deleted` with its last value.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if no row has `id`.
    pub async fn delete(&self, id: Id) -> Result<T, PugError> {
        let _guard = self.write.lock().await;
        let row = self
            .rows
            .write()
            .remove(&id)
            .ok_or_else(|| PugError::not_found(id))?;
        self.broker.publish(EventKind::Deleted, row.clone()).await;
        Ok(row)
    }

    /// Returns a copy of the row.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if no row has `id`.
    pub fn get(&self, id: Id) -> Result<T, PugError> {
        self.rows
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| PugError::not_found(id))
    }

    /// Returns a copy of the row, if present.
    #[must_use]
    pub fn find(&self, id: Id) -> Option<T> {
        self.rows.read().get(&id).cloned()
    }

    /// Returns a snapshot of every row.
    #[must_use]
    pub fn list(&self) -> Vec<T> {
        self.rows.read().values().cloned().collect()
    }

    /// Returns a snapshot of the rows matching `pred`.
    pub fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows.read().values().filter(|r| pred(r)).cloned().collect()
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns `true` if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Subscribes to this table's events.
    pub async fn subscribe(&self, token: CancellationToken) -> Subscription<T> {
        self.broker.subscribe(token).await
    }

    /// Returns the broker events are published on.
    #[must_use]
    pub fn broker(&self) -> &Arc<Broker<T>> {
        &self.broker
    }
}

impl<T> std::fmt::Debug for Table<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("rows", &self.rows.read().len())
            .finish_non_exhaustive()
    }
}
