//! Root modules.
//!
//! A module is a directory under the working directory that terraform
//! can run in. Modules are discovered from disk on reload; Terragrunt
//! modules additionally carry the modules they depend on.

mod discovery;
mod graph;
mod service;

pub use discovery::{discover, DiscoveredModule};
pub use graph::parse_graph;
pub use service::{ModuleService, ReloadSummary};

use crate::logging::ProvidesEntityIds;
use crate::store::Entity;
use pug_types::{Id, Kind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A yes/no value that may not be known yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tri {
    #[default]
    Unknown,
    True,
    False,
}

impl From<bool> for Tri {
    fn from(b: bool) -> Self {
        if b {
            Self::True
        } else {
            Self::False
        }
    }
}

impl fmt::Display for Tri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "?",
            Self::True => "yes",
            Self::False => "no",
        })
    }
}

/// A root module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: Id,
    /// Path relative to the working directory; `.` for the root.
    pub path: String,
    pub current_workspace_id: Option<Id>,
    pub initialized: Tri,
    pub init_in_progress: bool,
    pub formatted: Tri,
    pub format_in_progress: bool,
    pub valid: Tri,
    pub validate_in_progress: bool,
    /// Modules this one depends on (Terragrunt only).
    pub dependencies: Vec<Id>,
}

impl Module {
    /// Creates a module with every status unknown.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            id: Id::new(Kind::Module),
            path: path.into(),
            current_workspace_id: None,
            initialized: Tri::Unknown,
            init_in_progress: false,
            formatted: Tri::Unknown,
            format_in_progress: false,
            valid: Tri::Unknown,
            validate_in_progress: false,
            dependencies: Vec::new(),
        }
    }
}

impl Entity for Module {
    fn id(&self) -> Id {
        self.id
    }

    fn label(&self) -> String {
        self.path.clone()
    }
}

impl ProvidesEntityIds for Module {}
