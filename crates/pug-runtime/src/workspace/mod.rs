//! Terraform workspaces.
//!
//! Workspaces are never discovered from disk: they are whatever the
//! latest `terraform workspace list` printed for their module. Whether
//! a workspace is current is not stored on the workspace itself; it is
//! derived from its module's `current_workspace_id`.

mod service;

pub use service::{parse_list, WorkspaceList, WorkspaceService};

use crate::logging::ProvidesEntityIds;
use crate::module::Module;
use crate::store::Entity;
use pug_types::{Id, Kind};
use serde::{Deserialize, Serialize};

/// A named state namespace within a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Id,
    pub name: String,
    pub module_id: Id,
    pub module_path: String,
}

impl Workspace {
    /// Creates a workspace belonging to `module`.
    pub fn new(name: impl Into<String>, module: &Module) -> Self {
        Self {
            id: Id::new(Kind::Workspace),
            name: name.into(),
            module_id: module.id,
            module_path: module.path.clone(),
        }
    }

    /// Returns `true` if `module` has this workspace selected.
    #[must_use]
    pub fn is_current(&self, module: &Module) -> bool {
        module.current_workspace_id == Some(self.id)
    }
}

impl Entity for Workspace {
    fn id(&self) -> Id {
        self.id
    }

    fn label(&self) -> String {
        format!("{}:{}", self.module_path, self.name)
    }
}

impl ProvidesEntityIds for Workspace {
    fn entity_ids(&self) -> Vec<Id> {
        vec![self.module_id]
    }
}
