//! Entity events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The entity was added to its store.
    Created,
    /// The entity was modified (or overwritten by an add).
    Updated,
    /// The entity was removed; the payload is its last known value.
    Deleted,
}

impl EventKind {
    /// Returns the lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event carrying the post-image of an entity.
///
/// # Example
///
/// ```
/// use pug_event::{Event, EventKind};
///
/// let ev = Event::new(EventKind::Created, "row");
/// assert!(ev.is_created());
/// assert_eq!(ev.payload, "row");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event<T> {
    /// What happened.
    pub kind: EventKind,
    /// The entity after the change; for deletes, the last known value.
    pub payload: T,
}

impl<T> Event<T> {
    /// Creates an event.
    #[must_use]
    pub fn new(kind: EventKind, payload: T) -> Self {
        Self { kind, payload }
    }

    /// Returns `true` for [`EventKind::Created`].
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.kind == EventKind::Created
    }

    /// Returns `true` for [`EventKind::Updated`].
    #[must_use]
    pub fn is_updated(&self) -> bool {
        self.kind == EventKind::Updated
    }

    /// Returns `true` for [`EventKind::Deleted`].
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.kind == EventKind::Deleted
    }

    /// Maps the payload, keeping the kind.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Event<U> {
        Event {
            kind: self.kind,
            payload: f(self.payload),
        }
    }
}
