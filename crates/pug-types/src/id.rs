//! Identifier types for pug.
//!
//! Every entity held by the runtime is addressed by an [`Id`]: a random
//! UUID tagged with the [`Kind`] of entity it names. Ids are `Copy`
//! value types; cross-entity references are always made by id, never
//! by pointer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// The kind of entity an [`Id`] refers to.
///
/// The kind is part of the id's textual form (`mod-…`, `task-…`), which
/// lets log enrichment recognise an id inside an arbitrary string field
/// and route it to the right store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// A root module directory.
    Module,
    /// A named state namespace within a module.
    Workspace,
    /// A single child-process invocation.
    Task,
    /// A plan and its artefact directory.
    Plan,
    /// A resource within a state snapshot.
    StateResource,
    /// A captured log record.
    Log,
}

impl Kind {
    /// All kinds, in display order.
    pub const ALL: [Kind; 6] = [
        Kind::Module,
        Kind::Workspace,
        Kind::Task,
        Kind::Plan,
        Kind::StateResource,
        Kind::Log,
    ];

    /// Returns the short prefix used in the textual form of ids.
    #[must_use]
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Module => "mod",
            Self::Workspace => "ws",
            Self::Task => "task",
            Self::Plan => "plan",
            Self::StateResource => "res",
            Self::Log => "log",
        }
    }

    /// Returns the lowercase name used as a log attribute key.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::Workspace => "workspace",
            Self::Task => "task",
            Self::Plan => "plan",
            Self::StateResource => "resource",
            Self::Log => "log",
        }
    }

    /// Looks up a kind by its id prefix.
    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.prefix() == prefix)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identifier of an entity.
///
/// # Example
///
/// ```
/// use pug_types::{Id, Kind};
///
/// let a = Id::new(Kind::Task);
/// let b = Id::new(Kind::Task);
/// assert_ne!(a, b);
/// assert_eq!(a.kind(), Kind::Task);
///
/// // Round-trips through its textual form.
/// let parsed: Id = a.to_string().parse().unwrap();
/// assert_eq!(parsed, a);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id {
    kind: Kind,
    uuid: Uuid,
}

impl Id {
    /// Creates a new id of the given kind with a random UUID v4.
    #[must_use]
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            uuid: Uuid::new_v4(),
        }
    }

    /// Returns the entity kind.
    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns `true` if the id names an entity of `kind`.
    #[must_use]
    pub fn is(&self, kind: Kind) -> bool {
        self.kind == kind
    }

    /// Abbreviated form for display in tables: prefix plus the first
    /// eight hex digits.
    #[must_use]
    pub fn short(&self) -> String {
        let simple = self.uuid.simple().to_string();
        format!("{}-{}", self.kind.prefix(), &simple[..8])
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind.prefix(), self.uuid)
    }
}

/// Failure to parse the textual form of an [`Id`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid id: {0}")]
pub struct ParseIdError(String);

impl FromStr for Id {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, rest) = s.split_once('-').ok_or_else(|| ParseIdError(s.into()))?;
        let kind = Kind::from_prefix(prefix).ok_or_else(|| ParseIdError(s.into()))?;
        let uuid = Uuid::parse_str(rest).map_err(|_| ParseIdError(s.into()))?;
        Ok(Self { kind, uuid })
    }
}
