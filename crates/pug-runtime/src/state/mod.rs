//! Workspace state.
//!
//! One [`StateSnapshot`] is kept per workspace, keyed by the
//! workspace's id. Snapshots are only as detailed as listing resources
//! requires; attribute values are kept as raw JSON.

mod parse;
mod service;

pub use parse::{parse_state, ParsedResource, ParsedState};
pub use service::StateService;

use crate::logging::{EntityResolver, ProvidesEntityIds, Resolved};
use crate::store::{Entity, Table};
use pug_types::{Id, Kind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What is being done to a resource right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    #[default]
    Idle,
    Reloading,
    Tainting,
    Untainting,
    Moving,
    Removing,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Reloading => "reloading",
            Self::Tainting => "tainting",
            Self::Untainting => "untainting",
            Self::Moving => "moving",
            Self::Removing => "removing",
        })
    }
}

/// A resource instance in state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Id,
    pub address: String,
    pub attributes: Value,
    pub tainted: bool,
    pub status: ResourceStatus,
}

impl Resource {
    #[must_use]
    pub fn new(address: impl Into<String>, attributes: Value, tainted: bool) -> Self {
        Self {
            id: Id::new(Kind::StateResource),
            address: address.into(),
            attributes,
            tainted,
            status: ResourceStatus::Idle,
        }
    }
}

impl From<ParsedResource> for Resource {
    fn from(p: ParsedResource) -> Self {
        Self::new(p.address, p.attributes, p.tainted)
    }
}

/// The resources of one workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub workspace_id: Id,
    pub module_id: Id,
    /// Serial of the state file this was read from.
    pub serial: i64,
    pub resources: BTreeMap<String, Resource>,
}

impl StateSnapshot {
    /// Builds a snapshot from a parsed state file.
    #[must_use]
    pub fn from_parsed(workspace_id: Id, module_id: Id, parsed: ParsedState) -> Self {
        Self {
            workspace_id,
            module_id,
            serial: parsed.serial,
            resources: parsed
                .resources
                .into_iter()
                .map(|(addr, r)| (addr, Resource::from(r)))
                .collect(),
        }
    }
}

impl Entity for StateSnapshot {
    fn id(&self) -> Id {
        self.workspace_id
    }

    fn label(&self) -> String {
        format!("state#{} ({} resources)", self.serial, self.resources.len())
    }
}

impl ProvidesEntityIds for StateSnapshot {
    fn entity_ids(&self) -> Vec<Id> {
        vec![self.module_id, self.workspace_id]
    }
}

/// Resolves resource ids through the snapshot holding them.
///
/// Snapshots share their workspace's id, so they are found through
/// their resources instead. A resolved resource refers to the
/// snapshot's module and workspace.
pub struct ResourceResolver {
    snapshots: Arc<Table<StateSnapshot>>,
}

impl ResourceResolver {
    #[must_use]
    pub fn new(snapshots: Arc<Table<StateSnapshot>>) -> Self {
        Self { snapshots }
    }
}

impl EntityResolver for ResourceResolver {
    fn resolve(&self, id: Id) -> Option<Resolved> {
        let snapshot = self
            .snapshots
            .filter(|s| s.resources.values().any(|r| r.id == id))
            .into_iter()
            .next()?;
        let resource = snapshot.resources.values().find(|r| r.id == id)?;
        Some(Resolved {
            label: resource.address.clone(),
            refs: snapshot.entity_ids(),
        })
    }
}
