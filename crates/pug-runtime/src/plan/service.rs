//! Plan and apply task orchestration.

use super::report::{parse_apply_report, parse_json_plan_report, parse_plan_report};
use super::{Plan, PlanOptions};
use crate::module::ModuleService;
use crate::state::StateService;
use crate::store::Table;
use crate::task::{Task, TaskHooks, TaskKind, TaskService, TaskSpec, TaskState, TaskSummary};
use crate::workspace::{Workspace, WorkspaceService};
use crate::PugError;
use async_trait::async_trait;
use pug_types::{Id, Kind, SerialGenerator};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds plan and apply tasks and records their reports on [`Plan`]s.
pub struct PlanService {
    plans: Arc<Table<Plan>>,
    tasks: Arc<TaskService>,
    modules: Arc<ModuleService>,
    workspaces: Arc<WorkspaceService>,
    state: Arc<StateService>,
    data_dir: PathBuf,
    json: bool,
    serials: SerialGenerator,
}

impl PlanService {
    /// Creates a service storing artefacts under `data_dir`.
    ///
    /// With `json`, plans run with `-json` and their report is read
    /// from the machine-readable summary.
    pub fn new(
        plans: Arc<Table<Plan>>,
        tasks: Arc<TaskService>,
        modules: Arc<ModuleService>,
        workspaces: Arc<WorkspaceService>,
        state: Arc<StateService>,
        data_dir: impl Into<PathBuf>,
        json: bool,
    ) -> Self {
        let data_dir = data_dir.into();
        let data_dir = std::path::absolute(&data_dir).unwrap_or(data_dir);
        Self {
            plans,
            tasks,
            modules,
            workspaces,
            state,
            data_dir,
            json,
            serials: SerialGenerator::new(),
        }
    }

    /// Returns the plan table.
    #[must_use]
    pub fn table(&self) -> &Arc<Table<Plan>> {
        &self.plans
    }

    /// Returns the directory artefacts are stored under.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Creates a plan for a workspace and submits its `terraform plan`
    /// task.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the workspace or its module is
    /// gone, or [`PugError::Io`] if the artefact directory cannot be
    /// created.
    pub async fn plan(&self, workspace_id: Id, opts: &PlanOptions) -> Result<Plan, PugError> {
        let ws = self.workspaces.get(workspace_id)?;
        let module = self.modules.get(ws.module_id)?;
        let serial = self.serials.next();
        let artefacts = self.data_dir.join(serial.to_string());

        if tokio::fs::try_exists(&artefacts).await.unwrap_or(false) {
            debug!(path = %artefacts.display(), "removing stale artefacts");
            tokio::fs::remove_dir_all(&artefacts)
                .await
                .map_err(|e| PugError::io(format!("removing {}", artefacts.display()), &e))?;
        }
        tokio::fs::create_dir_all(&artefacts)
            .await
            .map_err(|e| PugError::io(format!("creating {}", artefacts.display()), &e))?;

        let plan = Plan {
            id: Id::new(Kind::Plan),
            serial,
            module_id: module.id,
            module_path: module.path.clone(),
            workspace_id,
            workspace_name: ws.name.clone(),
            destroy: opts.destroy,
            targets: opts.targets.clone(),
            artefacts,
            plan_task_id: None,
            apply_task_id: None,
            report: None,
            apply_report: None,
            has_changes: false,
        };
        let plan = self.plans.add(plan).await;

        let mut args = vec!["plan".to_string(), "-input=false".to_string()];
        args.extend(self.common_args(&ws, opts));
        args.push("-out".to_string());
        args.push(plan.plan_file().display().to_string());
        if self.json {
            args.push("-json".to_string());
        }

        let spec = TaskSpec::new(TaskKind::Plan, module.id, args)
            .workspace(workspace_id)
            .blocking(true)
            .json(self.json)
            .description(if opts.destroy { "destroy plan" } else { "plan" })
            .hooks(Arc::new(PlanHooks {
                plans: Arc::clone(&self.plans),
                plan_id: plan.id,
                json: self.json,
            }));
        let task = self.tasks.create(spec).await?;
        info!(plan = %plan.id, task = %task.id, module = %module.path, workspace = %ws.name, "created plan");
        self.plans.get(plan.id)
    }

    /// Plans every workspace in `workspace_ids`.
    ///
    /// # Errors
    ///
    /// Stops at the first error from [`plan`](Self::plan).
    pub async fn plan_many(
        &self,
        workspace_ids: &[Id],
        opts: &PlanOptions,
    ) -> Result<Vec<Plan>, PugError> {
        let mut plans = Vec::with_capacity(workspace_ids.len());
        for &ws in workspace_ids {
            plans.push(self.plan(ws, opts).await?);
        }
        Ok(plans)
    }

    /// Applies a saved plan.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::InvalidState`] unless the plan task exited
    /// with changes and the plan has not been applied yet.
    pub async fn apply_plan(&self, plan_id: Id) -> Result<Task, PugError> {
        let spec = self.apply_plan_spec(plan_id)?;
        self.tasks.create(spec).await
    }

    /// Applies several saved plans, ordered by module dependencies in
    /// Terragrunt mode (reversed for destroy plans).
    ///
    /// # Errors
    ///
    /// Fails before creating any task if one of the plans cannot be
    /// applied; see [`apply_plan`](Self::apply_plan).
    pub async fn apply_many(&self, plan_ids: &[Id]) -> Result<Vec<Task>, PugError> {
        let specs = plan_ids
            .iter()
            .map(|&id| self.apply_plan_spec(id))
            .collect::<Result<Vec<_>, _>>()?;
        self.tasks.create_dependent(specs).await
    }

    /// Runs `terraform apply -auto-approve` without a saved plan.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the workspace or its module is
    /// gone.
    pub async fn apply(&self, workspace_id: Id, opts: &PlanOptions) -> Result<Task, PugError> {
        let ws = self.workspaces.get(workspace_id)?;
        let mut args = vec![
            "apply".to_string(),
            "-input=false".to_string(),
            "-auto-approve".to_string(),
        ];
        args.extend(self.common_args(&ws, opts));

        let kind = if opts.destroy { TaskKind::Destroy } else { TaskKind::Apply };
        let spec = TaskSpec::new(kind, ws.module_id, args)
            .workspace(workspace_id)
            .blocking(true)
            .respect_dependencies(self.modules.terragrunt(), opts.destroy)
            .description(if opts.destroy { "auto destroy" } else { "auto apply" })
            .hooks(Arc::new(ApplyHooks {
                plans: Arc::clone(&self.plans),
                state: Arc::clone(&self.state),
                plan_id: None,
                artefacts: None,
                workspace_id,
            }));
        self.tasks.create(spec).await
    }

    /// Removes a plan and its artefacts.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::InvalidState`] while its plan or apply task
    /// is still active.
    pub async fn discard(&self, plan_id: Id) -> Result<Plan, PugError> {
        let plan = self.plans.get(plan_id)?;
        for task_id in plan.plan_task_id.iter().chain(plan.apply_task_id.iter()) {
            if let Some(task) = self.tasks.table().find(*task_id) {
                if !task.is_terminal() {
                    return Err(PugError::invalid_state(format!(
                        "plan {} has an active {} task",
                        plan.id.short(),
                        task.kind
                    )));
                }
            }
        }
        remove_artefacts(&plan.artefacts).await?;
        let plan = self.plans.delete(plan_id).await?;
        info!(plan = %plan.id, "discarded plan");
        Ok(plan)
    }

    /// Deletes artefact directories that belong to no plan.
    ///
    /// Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::Io`] if the data directory cannot be read or
    /// a directory cannot be removed.
    pub async fn purge_artefacts(&self) -> Result<usize, PugError> {
        let live: HashSet<u64> = self.plans.list().iter().map(|p| p.serial.get()).collect();
        let mut entries = match tokio::fs::read_dir(&self.data_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(PugError::io(format!("reading {}", self.data_dir.display()), &e));
            }
        };

        let mut purged = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PugError::io(format!("reading {}", self.data_dir.display()), &e))?
        {
            let Ok(serial) = entry.file_name().to_string_lossy().parse::<u64>() else {
                continue;
            };
            if live.contains(&serial) || !entry.path().is_dir() {
                continue;
            }
            remove_artefacts(&entry.path()).await?;
            purged += 1;
        }
        if purged > 0 {
            info!(purged, "purged plan artefacts");
        }
        Ok(purged)
    }

    /// Returns a plan.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if it does not exist.
    pub fn get(&self, id: Id) -> Result<Plan, PugError> {
        self.plans.get(id)
    }

    /// Returns every plan, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<Plan> {
        let mut plans = self.plans.list();
        plans.sort_by_key(|p| p.serial);
        plans
    }

    fn apply_plan_spec(&self, plan_id: Id) -> Result<TaskSpec, PugError> {
        let plan = self.plans.get(plan_id)?;
        let task_id = plan
            .plan_task_id
            .ok_or_else(|| PugError::invalid_state(format!("plan {} has no task", plan.id.short())))?;
        let task = self.tasks.get(task_id)?;
        if task.state != TaskState::Exited {
            return Err(PugError::invalid_state(format!(
                "plan {} is {}, not exited",
                plan.id.short(),
                task.state
            )));
        }
        if !plan.has_changes {
            return Err(PugError::invalid_state(format!(
                "plan {} has no changes",
                plan.id.short()
            )));
        }
        if plan.apply_task_id.is_some() {
            return Err(PugError::invalid_state(format!(
                "plan {} is already applied",
                plan.id.short()
            )));
        }

        let kind = if plan.destroy { TaskKind::Destroy } else { TaskKind::Apply };
        let args = [
            "apply".to_string(),
            "-input=false".to_string(),
            plan.plan_file().display().to_string(),
        ];
        Ok(TaskSpec::new(kind, plan.module_id, args)
            .workspace(plan.workspace_id)
            .blocking(true)
            .respect_dependencies(self.modules.terragrunt(), plan.destroy)
            .description(if plan.destroy { "destroy" } else { "apply" })
            .hooks(Arc::new(ApplyHooks {
                plans: Arc::clone(&self.plans),
                state: Arc::clone(&self.state),
                plan_id: Some(plan.id),
                artefacts: Some(plan.artefacts.clone()),
                workspace_id: plan.workspace_id,
            })))
    }

    /// Targets, then the workspace's variable file, then `-destroy`.
    fn common_args(&self, ws: &Workspace, opts: &PlanOptions) -> Vec<String> {
        let mut args: Vec<String> = opts.targets.iter().map(|t| format!("-target={t}")).collect();
        let tfvars = format!("{}.tfvars", ws.name);
        if self.modules.workdir().join(&ws.module_path).join(&tfvars).is_file() {
            args.push(format!("-var-file={tfvars}"));
        }
        if opts.destroy {
            args.push("-destroy".to_string());
        }
        args
    }
}

impl std::fmt::Debug for PlanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanService")
            .field("data_dir", &self.data_dir)
            .field("json", &self.json)
            .finish_non_exhaustive()
    }
}

async fn remove_artefacts(dir: &Path) -> Result<(), PugError> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PugError::io(format!("removing {}", dir.display()), &e)),
    }
}

struct PlanHooks {
    plans: Arc<Table<Plan>>,
    plan_id: Id,
    json: bool,
}

#[async_trait]
impl TaskHooks for PlanHooks {
    async fn after_create(&self, task: &Task) {
        let task_id = task.id;
        if let Err(e) = self.plans.update(self.plan_id, |p| p.plan_task_id = Some(task_id)).await {
            warn!(plan = %self.plan_id, error = %e, "plan gone before its task was recorded");
        }
    }

    async fn before_exited(&self, task: &Task) -> Result<Option<TaskSummary>, PugError> {
        let (report, has_changes) = if self.json {
            parse_json_plan_report(&task.output().snapshot())?
        } else {
            parse_plan_report(&task.output().text())?
        };
        self.plans
            .update(self.plan_id, |p| {
                p.report = Some(report);
                p.has_changes = has_changes;
            })
            .await?;
        Ok(Some(TaskSummary::Plan {
            report,
            has_changes,
        }))
    }
}

struct ApplyHooks {
    plans: Arc<Table<Plan>>,
    state: Arc<StateService>,
    plan_id: Option<Id>,
    artefacts: Option<PathBuf>,
    workspace_id: Id,
}

#[async_trait]
impl TaskHooks for ApplyHooks {
    async fn after_create(&self, task: &Task) {
        let Some(plan_id) = self.plan_id else {
            return;
        };
        let task_id = task.id;
        if let Err(e) = self.plans.update(plan_id, |p| p.apply_task_id = Some(task_id)).await {
            warn!(plan = %plan_id, error = %e, "plan gone before its apply was recorded");
        }
    }

    async fn before_exited(&self, task: &Task) -> Result<Option<TaskSummary>, PugError> {
        if let Some(dir) = &self.artefacts {
            remove_artefacts(dir).await?;
        }
        let report = parse_apply_report(&task.output().text())?;
        if let Some(plan_id) = self.plan_id {
            self.plans
                .update(plan_id, |p| p.apply_report = Some(report))
                .await?;
        }
        Ok(Some(TaskSummary::Apply { report }))
    }

    async fn after_exited(&self, task: &Task) {
        if let Err(e) = self.state.reload(self.workspace_id).await {
            warn!(task = %task.id, workspace = %self.workspace_id, error = %e, "state reload not submitted");
        }
    }
}
