//! Log records and their attributes.

use super::ProvidesEntityIds;
use crate::store::Entity;
use chrono::{DateTime, Utc};
use pug_types::{Id, Serial};
use std::fmt;
use tracing::Level;

/// The value of one log attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Text(String),
    Id(Id),
    /// An id resolved to the entity it names.
    Entity { id: Id, label: String },
}

impl AttrValue {
    /// Returns the id this value refers to, if any.
    #[must_use]
    pub fn id(&self) -> Option<Id> {
        match self {
            Self::Text(_) => None,
            Self::Id(id) | Self::Entity { id, .. } => Some(*id),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Id(id) => write!(f, "{id}"),
            Self::Entity { label, .. } => f.write_str(label),
        }
    }
}

/// A `key=value` pair on a log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub key: String,
    pub value: AttrValue,
}

impl Attr {
    pub fn text(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: AttrValue::Text(value.into()),
        }
    }

    pub fn id(key: impl Into<String>, id: Id) -> Self {
        Self {
            key: key.into(),
            value: AttrValue::Id(id),
        }
    }
}

/// A log event captured as it was emitted, before enrichment.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub time: DateTime<Utc>,
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

/// A stored, enriched log record.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub id: Id,
    pub serial: Serial,
    pub time: DateTime<Utc>,
    pub level: Level,
    pub target: String,
    pub message: String,
    pub attrs: Vec<Attr>,
}

impl LogRecord {
    /// Returns the attribute named `key`.
    #[must_use]
    pub fn attr(&self, key: &str) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.key == key)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:>5} {}", self.time.format("%H:%M:%S"), self.level, self.message)?;
        for attr in &self.attrs {
            write!(f, " {}={}", attr.key, attr.value)?;
        }
        Ok(())
    }
}

impl Entity for LogRecord {
    fn id(&self) -> Id {
        self.id
    }

    fn label(&self) -> String {
        format!("log#{}", self.serial)
    }
}

impl ProvidesEntityIds for LogRecord {
    fn entity_ids(&self) -> Vec<Id> {
        self.attrs.iter().filter_map(|a| a.value.id()).collect()
    }
}
