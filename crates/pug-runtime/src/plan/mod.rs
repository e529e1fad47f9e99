//! Plans and applies.
//!
//! A [`Plan`] is created together with its `terraform plan` task and
//! owns an artefact directory, `<data_dir>/<serial>`, holding the saved
//! plan file. Applying the plan consumes the file and removes the
//! directory. Plans that are never applied are removed with
//! [`PlanService::discard`] or swept by [`PlanService::purge_artefacts`].

mod report;
mod service;

pub use report::{parse_apply_report, parse_json_plan_report, parse_plan_report};
pub use service::PlanService;

use crate::logging::ProvidesEntityIds;
use crate::store::Entity;
use crate::task::Report;
use pug_types::{Id, Serial};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options shared by plan and auto-apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOptions {
    pub destroy: bool,
    /// Resource addresses passed as `-target=<addr>`.
    pub targets: Vec<String>,
}

impl PlanOptions {
    #[must_use]
    pub fn destroy(mut self, yes: bool) -> Self {
        self.destroy = yes;
        self
    }

    #[must_use]
    pub fn target(mut self, addr: impl Into<String>) -> Self {
        self.targets.push(addr.into());
        self
    }
}

/// A saved plan for one workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Id,
    pub serial: Serial,
    pub module_id: Id,
    pub module_path: String,
    pub workspace_id: Id,
    pub workspace_name: String,
    pub destroy: bool,
    pub targets: Vec<String>,
    /// Directory holding the saved plan file.
    pub artefacts: PathBuf,
    pub plan_task_id: Option<Id>,
    pub apply_task_id: Option<Id>,
    pub report: Option<Report>,
    pub apply_report: Option<Report>,
    pub has_changes: bool,
}

impl Plan {
    /// Path of the saved plan file.
    #[must_use]
    pub fn plan_file(&self) -> PathBuf {
        self.artefacts.join("plan")
    }
}

impl Entity for Plan {
    fn id(&self) -> Id {
        self.id
    }

    fn label(&self) -> String {
        format!("plan#{} {}:{}", self.serial, self.module_path, self.workspace_name)
    }
}

impl ProvidesEntityIds for Plan {
    fn entity_ids(&self) -> Vec<Id> {
        vec![self.module_id, self.workspace_id]
    }
}
