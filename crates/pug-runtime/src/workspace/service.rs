//! Workspace reload, select, create and delete.

use super::Workspace;
use crate::module::ModuleService;
use crate::store::Table;
use crate::task::{Task, TaskHooks, TaskKind, TaskService, TaskSpec, TaskState, TaskSummary};
use crate::text::strip_ansi;
use crate::PugError;
use async_trait::async_trait;
use pug_types::{Id, Kind};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Parsed `terraform workspace list` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceList {
    /// Every workspace, in output order.
    pub names: Vec<String>,
    pub current: String,
}

/// Parses `terraform workspace list` output.
///
/// ```text
///   default
/// * dev
///   prod
/// ```
///
/// The line starting with `*` names the current workspace.
///
/// # Errors
///
/// Returns [`PugError::Parse`] if no workspace is marked current.
pub fn parse_list(output: &str) -> Result<WorkspaceList, PugError> {
    let mut names = Vec::new();
    let mut current = None;
    for line in strip_ansi(output).lines() {
        let line = line.trim_end();
        if let Some(name) = line.strip_prefix("* ") {
            let name = name.trim().to_string();
            current = Some(name.clone());
            names.push(name);
        } else if line.starts_with("  ") && !line.trim().is_empty() {
            names.push(line.trim().to_string());
        }
    }
    let current = current.ok_or_else(|| PugError::parse("workspace list", "no current workspace"))?;
    Ok(WorkspaceList { names, current })
}

/// Tracks each module's workspaces by running `terraform workspace`.
pub struct WorkspaceService {
    workspaces: Arc<Table<Workspace>>,
    modules: Arc<ModuleService>,
    tasks: Arc<TaskService>,
}

impl WorkspaceService {
    #[must_use]
    pub fn new(
        workspaces: Arc<Table<Workspace>>,
        modules: Arc<ModuleService>,
        tasks: Arc<TaskService>,
    ) -> Arc<Self> {
        Arc::new(Self {
            workspaces,
            modules,
            tasks,
        })
    }

    /// Returns the workspace table.
    #[must_use]
    pub fn table(&self) -> &Arc<Table<Workspace>> {
        &self.workspaces
    }

    /// Watches for new modules and successful inits and reloads the
    /// workspaces of each.
    ///
    /// Subscriptions are taken before this returns.
    pub async fn spawn(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let mut module_events = self.modules.table().subscribe(token.child_token()).await;
        let mut task_events = self.tasks.table().subscribe(token.child_token()).await;
        let this = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let module_id = tokio::select! {
                    _ = token.cancelled() => break,
                    Some(ev) = module_events.recv() => {
                        if !ev.is_created() {
                            continue;
                        }
                        ev.payload.id
                    }
                    Some(ev) = task_events.recv() => {
                        let task = &ev.payload;
                        if task.kind != TaskKind::Init || task.state != TaskState::Exited {
                            continue;
                        }
                        task.module_id
                    }
                    else => break,
                };
                // Creating a task publishes task events; never do it
                // from inside this receive loop.
                let this = Arc::clone(&this);
                tokio::spawn(async move {
                    if let Err(e) = this.reload(module_id).await {
                        debug!(module = %module_id, error = %e, "workspace reload not submitted");
                    }
                });
            }
            debug!("workspace watcher stopped");
        })
    }

    /// Submits `terraform workspace list` for a module.
    ///
    /// On success the module's workspaces are reconciled with the
    /// output and its current workspace is updated.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the module does not exist.
    pub async fn reload(&self, module_id: Id) -> Result<Task, PugError> {
        let spec = TaskSpec::new(TaskKind::WorkspaceList, module_id, ["workspace", "list"])
            .description("reload workspaces")
            .hooks(Arc::new(ReloadHooks {
                workspaces: Arc::clone(&self.workspaces),
                modules: Arc::clone(&self.modules),
            }));
        self.tasks.create(spec).await
    }

    /// Selects a workspace.
    ///
    /// The task is immediate and this call returns once it is terminal,
    /// so the selection is visible to every task created afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the workspace does not exist.
    pub async fn select(&self, workspace_id: Id) -> Result<Task, PugError> {
        let ws = self.workspaces.get(workspace_id)?;
        let spec = TaskSpec::new(
            TaskKind::WorkspaceSelect,
            ws.module_id,
            ["workspace", "select", ws.name.as_str()],
        )
        .immediate(true)
        .wait(true)
        .description(format!("select {}", ws.name))
        .hooks(Arc::new(SelectHooks {
            modules: Arc::clone(&self.modules),
            workspace: ws,
        }));
        self.tasks.create(spec).await
    }

    /// Submits `terraform workspace new <name>`. On success the
    /// workspace is added and becomes current.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::Exists`] if the module already has a
    /// workspace named `name`, or [`PugError::NotFound`] if the module
    /// does not exist.
    pub async fn create(&self, module_id: Id, name: &str) -> Result<Task, PugError> {
        let module = self.modules.get(module_id)?;
        if self.get_by_name(module_id, name).is_ok() {
            return Err(PugError::exists(Kind::Workspace, format!("{}:{name}", module.path)));
        }
        let spec = TaskSpec::new(TaskKind::WorkspaceNew, module_id, ["workspace", "new", name])
            .blocking(true)
            .description(format!("new workspace {name}"))
            .hooks(Arc::new(CreateHooks {
                workspaces: Arc::clone(&self.workspaces),
                modules: Arc::clone(&self.modules),
                workspace: Workspace::new(name, &module),
            }));
        self.tasks.create(spec).await
    }

    /// Submits `terraform workspace delete <name>`. On success the
    /// workspace is removed.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the workspace does not exist.
    pub async fn delete(&self, workspace_id: Id) -> Result<Task, PugError> {
        let ws = self.workspaces.get(workspace_id)?;
        let spec = TaskSpec::new(
            TaskKind::WorkspaceDelete,
            ws.module_id,
            ["workspace", "delete", ws.name.as_str()],
        )
        .blocking(true)
        .description(format!("delete workspace {}", ws.name))
        .hooks(Arc::new(DeleteHooks {
            workspaces: Arc::clone(&self.workspaces),
            workspace_id,
        }));
        self.tasks.create(spec).await
    }

    /// Returns a workspace.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if it does not exist.
    pub fn get(&self, id: Id) -> Result<Workspace, PugError> {
        self.workspaces.get(id)
    }

    /// Looks a workspace up by module and name.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if there is no such workspace.
    pub fn get_by_name(&self, module_id: Id, name: &str) -> Result<Workspace, PugError> {
        self.workspaces
            .filter(|w| w.module_id == module_id && w.name == name)
            .into_iter()
            .next()
            .ok_or_else(|| PugError::not_found_named(Kind::Workspace, name))
    }

    /// Returns a module's workspaces sorted by name.
    #[must_use]
    pub fn list(&self, module_id: Id) -> Vec<Workspace> {
        let mut list = self.workspaces.filter(|w| w.module_id == module_id);
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Returns the module's current workspace, if known.
    #[must_use]
    pub fn current(&self, module_id: Id) -> Option<Workspace> {
        let module = self.modules.get(module_id).ok()?;
        module
            .current_workspace_id
            .and_then(|id| self.workspaces.find(id))
    }

    /// Returns `true` if the workspace is its module's current one.
    #[must_use]
    pub fn is_current(&self, workspace_id: Id) -> bool {
        self.workspaces
            .find(workspace_id)
            .and_then(|ws| self.modules.get(ws.module_id).ok().map(|m| ws.is_current(&m)))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for WorkspaceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceService")
            .field("workspaces", &self.workspaces.len())
            .finish_non_exhaustive()
    }
}

/// Makes the module's workspaces match `list` and sets its current one.
async fn reconcile(
    workspaces: &Table<Workspace>,
    modules: &ModuleService,
    module_id: Id,
    list: &WorkspaceList,
) -> Result<Id, PugError> {
    let module = modules.get(module_id)?;
    let existing = workspaces.filter(|w| w.module_id == module_id);

    // Another reload of the same module may run concurrently, so the
    // name check is repeated under the table's write lock.
    let mut added = 0;
    for name in &list.names {
        if existing.iter().any(|w| &w.name == name) {
            continue;
        }
        let ws = Workspace::new(name.clone(), &module);
        if workspaces
            .add_unless(ws, |w| w.module_id == module_id && &w.name == name)
            .await
            .is_some()
        {
            added += 1;
        }
    }
    let mut removed = 0;
    for ws in &existing {
        if list.names.contains(&ws.name) {
            continue;
        }
        match workspaces.delete(ws.id).await {
            Ok(_) => removed += 1,
            Err(PugError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
    }

    let current = workspaces
        .filter(|w| w.module_id == module_id && w.name == list.current)
        .into_iter()
        .next()
        .ok_or_else(|| PugError::not_found_named(Kind::Workspace, &list.current))?;
    modules.set_current(module_id, current.id).await?;

    info!(module = %module.path, added, removed, current = %current.name, "reloaded workspaces");
    Ok(current.id)
}

struct ReloadHooks {
    workspaces: Arc<Table<Workspace>>,
    modules: Arc<ModuleService>,
}

#[async_trait]
impl TaskHooks for ReloadHooks {
    async fn before_exited(&self, task: &Task) -> Result<Option<TaskSummary>, PugError> {
        let list = parse_list(&task.output().text())?;
        reconcile(&self.workspaces, &self.modules, task.module_id, &list).await?;
        Ok(Some(TaskSummary::Workspaces {
            current: Some(list.current),
            count: list.names.len(),
        }))
    }
}

struct SelectHooks {
    modules: Arc<ModuleService>,
    workspace: Workspace,
}

#[async_trait]
impl TaskHooks for SelectHooks {
    async fn before_exited(&self, _task: &Task) -> Result<Option<TaskSummary>, PugError> {
        self.modules
            .set_current(self.workspace.module_id, self.workspace.id)
            .await?;
        Ok(None)
    }
}

struct CreateHooks {
    workspaces: Arc<Table<Workspace>>,
    modules: Arc<ModuleService>,
    workspace: Workspace,
}

#[async_trait]
impl TaskHooks for CreateHooks {
    async fn before_exited(&self, _task: &Task) -> Result<Option<TaskSummary>, PugError> {
        let module_id = self.workspace.module_id;
        let name = &self.workspace.name;
        let ws = match self
            .workspaces
            .add_unless(self.workspace.clone(), |w| w.module_id == module_id && &w.name == name)
            .await
        {
            Some(ws) => ws,
            // A reload got there first.
            None => self
                .workspaces
                .filter(|w| w.module_id == module_id && &w.name == name)
                .into_iter()
                .next()
                .ok_or_else(|| PugError::not_found_named(Kind::Workspace, name))?,
        };
        self.modules.set_current(ws.module_id, ws.id).await?;
        Ok(None)
    }
}

struct DeleteHooks {
    workspaces: Arc<Table<Workspace>>,
    workspace_id: Id,
}

#[async_trait]
impl TaskHooks for DeleteHooks {
    async fn before_exited(&self, _task: &Task) -> Result<Option<TaskSummary>, PugError> {
        if let Err(e) = self.workspaces.delete(self.workspace_id).await {
            warn!(workspace = %self.workspace_id, error = %e, "deleted workspace already gone");
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;
    use tokio::sync::Notify;

    #[test]
    fn parses_list_with_current_marker() {
        let list = parse_list("  default\n* dev\n  prod\n\n").unwrap();
        assert_eq!(list.names, ["default", "dev", "prod"]);
        assert_eq!(list.current, "dev");
    }

    #[test]
    fn parses_list_with_colour_codes() {
        let list = parse_list("\x1b[0m* default\x1b[0m\n").unwrap();
        assert_eq!(list.current, "default");
        assert_eq!(list.names, ["default"]);
    }

    #[test]
    fn list_without_current_is_parse_error() {
        let err = parse_list("  default\n  dev\n").unwrap_err();
        assert!(matches!(err, PugError::Parse { .. }));
    }

    struct Fixture {
        modules: Arc<ModuleService>,
        service: Arc<WorkspaceService>,
        module: Module,
    }

    async fn fixture() -> Fixture {
        let modules = Arc::new(Table::new(64));
        let workspaces = Arc::new(Table::new(64));
        let tasks = Arc::new(TaskService::new(
            Arc::new(Table::new(64)),
            Arc::clone(&modules),
            Arc::clone(&workspaces),
            "terraform",
            Arc::new(Notify::new()),
        ));
        let module = modules.add(Module::new("a")).await;
        let module_service = Arc::new(ModuleService::new(
            modules,
            Arc::clone(&tasks),
            "/nonexistent",
            false,
            false,
        ));
        let service = WorkspaceService::new(workspaces, Arc::clone(&module_service), tasks);
        Fixture {
            modules: module_service,
            service,
            module,
        }
    }

    #[tokio::test]
    async fn reconcile_adds_removes_and_sets_current() {
        let f = fixture().await;
        let stale = f
            .service
            .table()
            .add(Workspace::new("old", &f.module))
            .await;

        let list = parse_list("  default\n* dev\n").unwrap();
        let current = reconcile(f.service.table(), &f.modules, f.module.id, &list)
            .await
            .unwrap();

        let names: Vec<_> = f.service.list(f.module.id).into_iter().map(|w| w.name).collect();
        assert_eq!(names, ["default", "dev"]);
        assert!(f.service.get(stale.id).is_err());
        assert_eq!(f.modules.get(f.module.id).unwrap().current_workspace_id, Some(current));
        assert_eq!(f.service.current(f.module.id).unwrap().name, "dev");
        assert!(f.service.is_current(current));
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let f = fixture().await;
        let list = parse_list("* default\n  dev\n").unwrap();
        let first = reconcile(f.service.table(), &f.modules, f.module.id, &list).await.unwrap();
        let second = reconcile(f.service.table(), &f.modules, f.module.id, &list).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.service.list(f.module.id).len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reconciles_keep_names_unique() {
        let f = fixture().await;
        let stale = f.service.table().add(Workspace::new("old", &f.module)).await;
        let list = Arc::new(parse_list("  default\n* dev\n  prod\n").unwrap());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let table = Arc::clone(f.service.table());
            let modules = Arc::clone(&f.modules);
            let list = Arc::clone(&list);
            let module_id = f.module.id;
            handles.push(tokio::spawn(async move {
                reconcile(&table, &modules, module_id, &list).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let names: Vec<_> = f.service.list(f.module.id).into_iter().map(|w| w.name).collect();
        assert_eq!(names, ["default", "dev", "prod"]);
        assert!(f.service.get(stale.id).is_err());
        assert_eq!(f.service.current(f.module.id).unwrap().name, "dev");
    }

    #[tokio::test]
    async fn create_rejects_existing_name() {
        let f = fixture().await;
        f.service.table().add(Workspace::new("dev", &f.module)).await;
        let err = f.service.create(f.module.id, "dev").await.unwrap_err();
        assert!(matches!(err, PugError::Exists { .. }));
    }

    #[tokio::test]
    async fn create_and_delete_are_blocking_module_tasks() {
        let f = fixture().await;
        let task = f.service.create(f.module.id, "dev").await.unwrap();
        assert_eq!(task.kind, TaskKind::WorkspaceNew);
        assert!(task.blocking);
        assert_eq!(task.workspace_id, None);
        assert_eq!(task.args, ["workspace", "new", "dev"]);

        let ws = f.service.table().add(Workspace::new("old", &f.module)).await;
        let task = f.service.delete(ws.id).await.unwrap();
        assert_eq!(task.args, ["workspace", "delete", "old"]);
        assert!(task.blocking);
    }
}
