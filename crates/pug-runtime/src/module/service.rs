//! Module reload and module-level tasks.

use super::discovery::discover;
use super::graph::parse_graph;
use super::{Module, Tri};
use crate::store::Table;
use crate::task::{self, Task, TaskHooks, TaskKind, TaskService, TaskSpec};
use crate::PugError;
use async_trait::async_trait;
use pug_types::{Id, Kind};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of [`ModuleService::reload`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Discovers modules and runs init, fmt and validate on them.
pub struct ModuleService {
    modules: Arc<Table<Module>>,
    tasks: Arc<TaskService>,
    workdir: PathBuf,
    terragrunt: bool,
    plugin_cache: bool,
}

impl ModuleService {
    pub fn new(
        modules: Arc<Table<Module>>,
        tasks: Arc<TaskService>,
        workdir: impl Into<PathBuf>,
        terragrunt: bool,
        plugin_cache: bool,
    ) -> Self {
        Self {
            modules,
            tasks,
            workdir: workdir.into(),
            terragrunt,
            plugin_cache,
        }
    }

    /// Returns the module table.
    #[must_use]
    pub fn table(&self) -> &Arc<Table<Module>> {
        &self.modules
    }

    /// Returns the working directory.
    #[must_use]
    pub fn workdir(&self) -> &PathBuf {
        &self.workdir
    }

    /// Returns `true` when modules are Terragrunt modules.
    #[must_use]
    pub fn terragrunt(&self) -> bool {
        self.terragrunt
    }

    /// Reconciles the module table with the working directory.
    ///
    /// New directories are added, vanished ones deleted. In Terragrunt
    /// mode the dependency graph is reloaded afterwards; a graph failure
    /// is logged, not returned, so discovery still takes effect.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::Io`] if the working directory cannot be read.
    pub async fn reload(&self) -> Result<ReloadSummary, PugError> {
        let found = discover(&self.workdir, self.terragrunt)?;
        let existing: HashMap<String, Module> = self
            .modules
            .list()
            .into_iter()
            .map(|m| (m.path.clone(), m))
            .collect();

        let mut summary = ReloadSummary::default();
        for d in &found {
            if existing.contains_key(&d.path) {
                continue;
            }
            let mut module = Module::new(d.path.clone());
            if d.initialized {
                module.initialized = Tri::True;
            }
            self.modules.add(module).await;
            summary.added.push(d.path.clone());
        }
        for (path, module) in &existing {
            if found.iter().any(|d| &d.path == path) {
                continue;
            }
            self.modules.delete(module.id).await?;
            summary.removed.push(path.clone());
        }
        summary.removed.sort();

        info!(
            added = summary.added.len(),
            removed = summary.removed.len(),
            total = found.len(),
            "reloaded modules"
        );

        if self.terragrunt {
            if let Err(e) = self.reload_dependencies().await {
                warn!(error = %e, "failed to load terragrunt dependencies");
            }
        }
        Ok(summary)
    }

    /// Runs `terragrunt graph-dependencies` and records each module's
    /// dependencies.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or its output cannot be
    /// parsed.
    pub async fn reload_dependencies(&self) -> Result<(), PugError> {
        let output = task::capture(
            self.tasks.program(),
            &["graph-dependencies"],
            &self.workdir,
            &[],
        )
        .await?;
        let text = String::from_utf8_lossy(&output.stdout);
        let graph = parse_graph(&text, &self.workdir)?;
        self.set_dependencies(&graph).await
    }

    /// Records dependencies from a parsed graph. Modules the graph does
    /// not mention end up with none.
    async fn set_dependencies(&self, graph: &BTreeMap<String, Vec<String>>) -> Result<(), PugError> {
        let by_path: HashMap<String, Id> = self
            .modules
            .list()
            .into_iter()
            .map(|m| (m.path, m.id))
            .collect();

        for path in graph.keys().filter(|p| !by_path.contains_key(*p)) {
            debug!(module = %path, "graph node is not a known module");
        }
        for (path, &id) in &by_path {
            let dependencies: Vec<Id> = graph
                .get(path)
                .map(|deps| deps.iter().filter_map(|d| by_path.get(d).copied()).collect())
                .unwrap_or_default();
            self.modules
                .update(id, |m| m.dependencies = dependencies)
                .await?;
        }
        Ok(())
    }

    /// Returns a module.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if it does not exist.
    pub fn get(&self, id: Id) -> Result<Module, PugError> {
        self.modules.get(id)
    }

    /// Looks a module up by path.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if no module has `path`.
    pub fn get_by_path(&self, path: &str) -> Result<Module, PugError> {
        self.modules
            .filter(|m| m.path == path)
            .into_iter()
            .next()
            .ok_or_else(|| PugError::not_found_named(Kind::Module, path))
    }

    /// Returns every module sorted by path.
    #[must_use]
    pub fn list(&self) -> Vec<Module> {
        let mut modules = self.modules.list();
        modules.sort_by(|a, b| a.path.cmp(&b.path));
        modules
    }

    /// Records the module's current workspace.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the module does not exist.
    pub async fn set_current(&self, module_id: Id, workspace_id: Id) -> Result<Module, PugError> {
        let module = self
            .modules
            .update(module_id, |m| m.current_workspace_id = Some(workspace_id))
            .await?;
        debug!(module = %module.path, workspace = %workspace_id, "set current workspace");
        Ok(module)
    }

    /// Submits `terraform init`.
    ///
    /// Init is blocking; with a plugin cache it is also exclusive,
    /// since the cache cannot be shared by concurrent inits.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the module does not exist.
    pub async fn init(&self, module_id: Id, upgrade: bool) -> Result<Task, PugError> {
        let mut args = vec!["init", "-input=false"];
        if upgrade {
            args.push("-upgrade");
        }
        let spec = TaskSpec::new(TaskKind::Init, module_id, args)
            .blocking(true)
            .exclusive(self.plugin_cache)
            .description("init")
            .hooks(self.check_hooks(Check::Init));
        self.tasks.create(spec).await
    }

    /// Submits `terraform fmt`.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the module does not exist.
    pub async fn format(&self, module_id: Id) -> Result<Task, PugError> {
        let spec = TaskSpec::new(TaskKind::Format, module_id, ["fmt"])
            .description("format")
            .hooks(self.check_hooks(Check::Format));
        self.tasks.create(spec).await
    }

    /// Submits `terraform validate`.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the module does not exist.
    pub async fn validate(&self, module_id: Id) -> Result<Task, PugError> {
        let spec = TaskSpec::new(TaskKind::Validate, module_id, ["validate", "-no-color"])
            .description("validate")
            .hooks(self.check_hooks(Check::Validate));
        self.tasks.create(spec).await
    }

    fn check_hooks(&self, check: Check) -> Arc<dyn TaskHooks> {
        Arc::new(CheckHooks {
            modules: Arc::clone(&self.modules),
            check,
        })
    }
}

impl std::fmt::Debug for ModuleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleService")
            .field("workdir", &self.workdir)
            .field("terragrunt", &self.terragrunt)
            .field("plugin_cache", &self.plugin_cache)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
enum Check {
    Init,
    Format,
    Validate,
}

/// Tracks an init, fmt or validate run on its module's status flags.
struct CheckHooks {
    modules: Arc<Table<Module>>,
    check: Check,
}

impl CheckHooks {
    async fn set(&self, task: &Task, in_progress: bool, result: Option<Tri>) {
        let check = self.check;
        let res = self
            .modules
            .update(task.module_id, |m| {
                let (flag, value) = match check {
                    Check::Init => (&mut m.init_in_progress, &mut m.initialized),
                    Check::Format => (&mut m.format_in_progress, &mut m.formatted),
                    Check::Validate => (&mut m.validate_in_progress, &mut m.valid),
                };
                *flag = in_progress;
                if let Some(r) = result {
                    *value = r;
                }
            })
            .await;
        if let Err(e) = res {
            debug!(task = %task.id, error = %e, "module gone before status update");
        }
    }
}

#[async_trait]
impl TaskHooks for CheckHooks {
    async fn after_create(&self, task: &Task) {
        self.set(task, true, None).await;
    }

    async fn after_exited(&self, task: &Task) {
        self.set(task, false, Some(Tri::True)).await;
    }

    async fn after_errored(&self, task: &Task) {
        self.set(task, false, Some(Tri::False)).await;
    }

    async fn after_canceled(&self, task: &Task) {
        self.set(task, false, None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;
    use crate::workspace::Workspace;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    fn service(workdir: &std::path::Path, plugin_cache: bool) -> ModuleService {
        let modules = Arc::new(Table::new(64));
        let tasks = Arc::new(TaskService::new(
            Arc::new(Table::new(64)),
            Arc::clone(&modules),
            Arc::new(Table::<Workspace>::new(64)),
            "terraform",
            Arc::new(Notify::new()),
        ));
        ModuleService::new(modules, tasks, workdir, false, plugin_cache)
    }

    fn touch(root: &std::path::Path, rel: &str) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, "").unwrap();
    }

    #[tokio::test]
    async fn reload_adds_and_removes() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a/main.tf");
        touch(dir.path(), "b/main.tf");
        touch(dir.path(), "b/.terraform/x");
        let svc = service(dir.path(), false);

        let first = svc.reload().await.unwrap();
        assert_eq!(first.added, ["a", "b"]);
        assert_eq!(svc.get_by_path("a").unwrap().initialized, Tri::Unknown);
        assert_eq!(svc.get_by_path("b").unwrap().initialized, Tri::True);

        let again = svc.reload().await.unwrap();
        assert_eq!(again, ReloadSummary::default());

        std::fs::remove_dir_all(dir.path().join("a")).unwrap();
        let third = svc.reload().await.unwrap();
        assert_eq!(third.removed, ["a"]);
        assert!(svc.get_by_path("a").is_err());
        assert_eq!(svc.list().len(), 1);
    }

    #[tokio::test]
    async fn dependencies_follow_latest_graph() {
        let dir = TempDir::new().unwrap();
        for m in ["app", "db", "vpc"] {
            touch(dir.path(), &format!("{m}/main.tf"));
        }
        let svc = service(dir.path(), false);
        svc.reload().await.unwrap();
        let id = |p: &str| svc.get_by_path(p).unwrap().id;

        let mut graph = BTreeMap::new();
        graph.insert("app".to_string(), vec!["vpc".to_string(), "db".to_string()]);
        graph.insert("db".to_string(), vec!["vpc".to_string()]);
        graph.insert("vpc".to_string(), vec![]);
        svc.set_dependencies(&graph).await.unwrap();
        assert_eq!(svc.get_by_path("app").unwrap().dependencies, [id("vpc"), id("db")]);
        assert_eq!(svc.get_by_path("db").unwrap().dependencies, [id("vpc")]);

        // db dropped out of the graph entirely.
        let mut graph = BTreeMap::new();
        graph.insert("app".to_string(), vec!["vpc".to_string()]);
        graph.insert("vpc".to_string(), vec![]);
        graph.insert("gone".to_string(), vec!["vpc".to_string()]);
        svc.set_dependencies(&graph).await.unwrap();
        assert_eq!(svc.get_by_path("app").unwrap().dependencies, [id("vpc")]);
        assert!(svc.get_by_path("db").unwrap().dependencies.is_empty());
    }

    #[tokio::test]
    async fn init_flags_follow_plugin_cache() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a/main.tf");

        let svc = service(dir.path(), true);
        svc.reload().await.unwrap();
        let m = svc.get_by_path("a").unwrap();

        let task = svc.init(m.id, true).await.unwrap();
        assert!(task.blocking);
        assert!(task.exclusive);
        assert_eq!(task.args, ["init", "-input=false", "-upgrade"]);
        assert!(svc.get(m.id).unwrap().init_in_progress);

        let plain = service(dir.path(), false);
        plain.reload().await.unwrap();
        let m = plain.get_by_path("a").unwrap();
        assert!(!plain.init(m.id, false).await.unwrap().exclusive);
    }

    #[tokio::test]
    async fn canceled_check_clears_in_progress_only() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a/main.tf");
        let svc = service(dir.path(), false);
        svc.reload().await.unwrap();
        let m = svc.get_by_path("a").unwrap();

        let task = svc.validate(m.id).await.unwrap();
        assert!(svc.get(m.id).unwrap().validate_in_progress);

        let canceled = svc.tasks.cancel(task.id).await.unwrap();
        assert_eq!(canceled.state, TaskState::Canceled);
        let m = svc.get(m.id).unwrap();
        assert!(!m.validate_in_progress);
        assert_eq!(m.valid, Tri::Unknown);
    }

    #[tokio::test]
    async fn set_current_records_workspace() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "main.tf");
        let svc = service(dir.path(), false);
        svc.reload().await.unwrap();
        let m = svc.get_by_path(".").unwrap();

        let ws = Id::new(Kind::Workspace);
        svc.set_current(m.id, ws).await.unwrap();
        assert_eq!(svc.get(m.id).unwrap().current_workspace_id, Some(ws));
    }
}
