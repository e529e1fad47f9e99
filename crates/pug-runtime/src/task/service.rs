//! Task creation, cancellation and completion.

use super::dependency;
use super::process;
use super::spec::TaskSpec;
use super::{Task, TaskControl, TaskState};
use crate::module::Module;
use crate::output::OutputBuffer;
use crate::store::Table;
use crate::workspace::Workspace;
use crate::PugError;
use chrono::Utc;
use pug_types::{Id, Kind, SerialGenerator};
use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Owns the task table and every task state transition.
///
/// The [`Scheduler`](super::Scheduler) and [`Runner`](super::Runner)
/// drive tasks forward through this service; other services only
/// create, cancel and wait.
pub struct TaskService {
    tasks: Arc<Table<Task>>,
    modules: Arc<Table<Module>>,
    workspaces: Arc<Table<Workspace>>,
    serials: SerialGenerator,
    program: String,
    runner_wake: Arc<Notify>,
}

impl TaskService {
    /// Creates a service that runs `program` for every task.
    ///
    /// `runner_wake` is notified whenever a task becomes queued.
    pub fn new(
        tasks: Arc<Table<Task>>,
        modules: Arc<Table<Module>>,
        workspaces: Arc<Table<Workspace>>,
        program: impl Into<String>,
        runner_wake: Arc<Notify>,
    ) -> Self {
        Self {
            tasks,
            modules,
            workspaces,
            serials: SerialGenerator::new(),
            program: program.into(),
            runner_wake,
        }
    }

    /// Returns the task table.
    #[must_use]
    pub fn table(&self) -> &Arc<Table<Task>> {
        &self.tasks
    }

    /// Returns the program tasks run.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Creates a pending task from `spec`.
    ///
    /// Immediate tasks are queued at once, bypassing the scheduler.
    /// With `wait`, returns only once the task is terminal.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the spec's module or workspace
    /// does not exist.
    pub async fn create(&self, spec: TaskSpec) -> Result<Task, PugError> {
        let module = self.modules.get(spec.module_id)?;
        let workspace_name = match spec.workspace_id {
            Some(ws) => Some(self.workspaces.get(ws)?.name),
            None => None,
        };

        let task = Task {
            id: Id::new(Kind::Task),
            serial: self.serials.next(),
            kind: spec.kind,
            module_id: module.id,
            module_path: module.path.clone(),
            workspace_id: spec.workspace_id,
            workspace_name,
            program: self.program.clone(),
            args: spec.args,
            env: spec.env,
            description: spec.description,
            blocking: spec.blocking,
            exclusive: spec.exclusive,
            immediate: spec.immediate,
            wait: spec.wait,
            json: spec.json,
            respect_dependencies: spec.respect_dependencies,
            inverse: spec.inverse,
            depends_on: spec.depends_on,
            state: TaskState::Pending,
            summary: None,
            error: None,
            exit_code: None,
            created_at: Utc::now(),
            queued_at: None,
            started_at: None,
            finished_at: None,
            output: OutputBuffer::new(),
            hooks: spec.hooks,
            control: Arc::new(TaskControl::new()),
        };

        let task = self.tasks.add(task).await;
        info!(
            task = %task.id,
            kind = %task.kind,
            module = %task.module_path,
            workspace = task.workspace_name.as_deref().unwrap_or(""),
            "created task"
        );
        task.hooks().after_create(&task).await;

        let task = if task.immediate {
            self.enqueue(task.id).await?
        } else {
            task
        };

        if task.wait {
            task.wait().await;
            return self.tasks.get(task.id);
        }
        Ok(task)
    }

    /// Creates one task per spec, ordering them by module dependencies
    /// when the specs ask for it.
    ///
    /// Each task records the ids of the batch tasks it must wait for in
    /// `depends_on`. Tasks are created, and so serialized, in
    /// dependency order.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::Parse`] if the module dependencies within the
    /// batch form a cycle, [`PugError::InvalidState`] if two specs name
    /// the same module, or any error from [`create`](Self::create).
    pub async fn create_dependent(&self, specs: Vec<TaskSpec>) -> Result<Vec<Task>, PugError> {
        if !specs.iter().any(|s| s.respect_dependencies) {
            let mut created = Vec::with_capacity(specs.len());
            for spec in specs {
                created.push(self.create(spec).await?);
            }
            return Ok(created);
        }

        let inverse = specs.iter().any(|s| s.inverse);
        let nodes: Vec<Id> = specs.iter().map(|s| s.module_id).collect();
        let mut by_module: HashMap<Id, TaskSpec> = HashMap::with_capacity(specs.len());
        for spec in specs {
            let module_id = spec.module_id;
            if by_module.insert(module_id, spec).is_some() {
                return Err(PugError::invalid_state(format!(
                    "module {} appears twice in one batch",
                    module_id.short()
                )));
            }
        }

        let deps: HashMap<Id, Vec<Id>> = nodes
            .iter()
            .filter_map(|&m| self.modules.find(m).map(|module| (m, module.dependencies)))
            .collect();
        let order = dependency::order(&nodes, &deps, inverse)?;

        let mut task_of: HashMap<Id, Id> = HashMap::with_capacity(nodes.len());
        let mut created = Vec::with_capacity(nodes.len());
        for module_id in order.order {
            let Some(mut spec) = by_module.remove(&module_id) else {
                continue;
            };
            if let Some(waits) = order.waits_on.get(&module_id) {
                spec.depends_on
                    .extend(waits.iter().filter_map(|m| task_of.get(m).copied()));
            }
            let task = self.create(spec).await?;
            task_of.insert(module_id, task.id);
            created.push(task);
        }
        Ok(created)
    }

    /// Cancels a task.
    ///
    /// A pending or queued task becomes canceled at once and never
    /// spawns. A running task receives SIGINT on the first request and
    /// SIGKILL on the next; it becomes canceled when the process exits.
    /// Canceling a terminal task does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the task does not exist.
    pub async fn cancel(&self, id: Id) -> Result<Task, PugError> {
        match self.cancel_before_start(id, None).await {
            Ok(task) => Ok(task),
            Err(PugError::InvalidState(_)) => {
                let task = self.tasks.get(id)?;
                if task.state == TaskState::Running {
                    let control = task.control();
                    let n = control.request_cancel();
                    info!(task = %id, request = n, "canceling running task");
                    process::signal(control.pid(), n);
                }
                Ok(task)
            }
            Err(e) => Err(e),
        }
    }

    /// Cancels a task that has not started, recording `reason` as its
    /// error.
    pub(crate) async fn cancel_before_start(
        &self,
        id: Id,
        reason: Option<PugError>,
    ) -> Result<Task, PugError> {
        let task = self
            .tasks
            .try_update(id, |t| {
                if !matches!(t.state, TaskState::Pending | TaskState::Queued) {
                    return Err(PugError::invalid_state(format!(
                        "task {} is {}",
                        t.id.short(),
                        t.state
                    )));
                }
                t.transition(TaskState::Canceled)?;
                t.error = reason;
                Ok(())
            })
            .await?;
        // Nothing will ever be written now.
        task.output().close();
        task.control().publish_state(TaskState::Canceled);
        info!(task = %id, "canceled task before start");
        task.hooks().after_canceled(&task).await;
        Ok(task)
    }

    /// Returns a task.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the task does not exist.
    pub fn get(&self, id: Id) -> Result<Task, PugError> {
        self.tasks.get(id)
    }

    /// Returns every task, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<Task> {
        let mut tasks = self.tasks.list();
        tasks.sort_by_key(|t| t.serial);
        tasks
    }

    /// Waits until the task is terminal and returns its final row.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the task does not exist.
    pub async fn wait(&self, id: Id) -> Result<Task, PugError> {
        let task = self.tasks.get(id)?;
        task.wait().await;
        self.tasks.get(id)
    }

    /// Moves a pending task to queued and wakes the runner.
    pub(crate) async fn enqueue(&self, id: Id) -> Result<Task, PugError> {
        let task = self.transition(id, TaskState::Queued).await?;
        debug!(task = %id, module = %task.module_path, "queued task");
        self.runner_wake.notify_one();
        Ok(task)
    }

    pub(crate) async fn transition(&self, id: Id, to: TaskState) -> Result<Task, PugError> {
        let task = self.tasks.try_update(id, |t| t.transition(to)).await?;
        task.control().publish_state(to);
        Ok(task)
    }

    /// Records the outcome of a finished process and runs the hooks.
    pub(crate) async fn complete(&self, task: Task, result: Result<ExitStatus, PugError>) {
        let canceled = task.control().cancel_requested();
        let (to, summary, error, code) = match result {
            Err(e) if canceled => {
                debug!(task = %task.id, error = %e, "canceled task failed to run");
                (TaskState::Canceled, None, None, None)
            }
            Err(e) => (TaskState::Errored, None, Some(e), None),
            Ok(status) if canceled => (TaskState::Canceled, None, None, status.code()),
            Ok(status) if status.success() => match task.hooks().before_exited(&task).await {
                Ok(summary) => (TaskState::Exited, summary, None, status.code()),
                Err(e) => (TaskState::Errored, None, Some(e), status.code()),
            },
            Ok(status) => {
                let output = task.output().text();
                let last = output
                    .lines()
                    .rev()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .map(|l| format!(": {}", crate::text::strip_ansi(l)))
                    .unwrap_or_default();
                (
                    TaskState::Errored,
                    None,
                    Some(PugError::task(format!("{status}{last}"))),
                    status.code(),
                )
            }
        };

        let updated = self
            .tasks
            .try_update(task.id, |t| {
                t.transition(to)?;
                t.summary = summary;
                t.error = error;
                t.exit_code = code;
                Ok(())
            })
            .await;

        let task = match updated {
            Ok(task) => task,
            Err(e) => {
                warn!(task = %task.id, error = %e, "failed to record task completion");
                return;
            }
        };
        task.control().publish_state(to);

        match to {
            TaskState::Exited => {
                info!(task = %task.id, kind = %task.kind, module = %task.module_path, "task exited");
                task.hooks().after_exited(&task).await;
            }
            TaskState::Errored => {
                let reason = task.error.as_ref().map(ToString::to_string).unwrap_or_default();
                warn!(task = %task.id, kind = %task.kind, module = %task.module_path, error = %reason, "task errored");
                task.hooks().after_errored(&task).await;
            }
            _ => {
                info!(task = %task.id, kind = %task.kind, module = %task.module_path, "task canceled");
                task.hooks().after_canceled(&task).await;
            }
        }
    }
}

impl std::fmt::Debug for TaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskService")
            .field("program", &self.program)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}
