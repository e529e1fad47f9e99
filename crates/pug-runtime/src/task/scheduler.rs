//! Per-module enqueue decisions.
//!
//! The scheduler moves pending tasks to queued. It is split in two
//! loops so that it never publishes from inside a subscriber:
//!
//! ```text
//!   task / module events ──► receiver ──► dirty modules ──► notify
//!                                                             │
//!   TaskService::enqueue ◄── schedule(module) ◄── scheduling loop
//! ```
//!
//! # Rules, per module
//!
//! 1. A module that is not initialized only accepts its init task.
//! 2. An active init task runs alone; a pending init waits for every
//!    active task on the module to finish.
//! 3. Pending tasks are considered oldest first, up to the first init.
//! 4. A workspace is blocked while it has an active blocking task or an
//!    active apply, destroy or refresh. A module-scoped blocking task
//!    blocks the whole module.
//! 5. A blocking candidate needs its scope (workspace, or the module
//!    for module-scoped tasks) to be idle. A candidate that must wait
//!    blocks later candidates in the same scope, preserving order.
//! 6. A candidate whose dependencies have not all exited waits; if one
//!    failed or was canceled, the candidate is canceled.

use super::service::TaskService;
use super::{Task, TaskKind, TaskState};
use crate::module::{Module, Tri};
use crate::store::Table;
use crate::PugError;
use parking_lot::Mutex;
use pug_event::Event;
use pug_types::Id;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Decides which pending tasks become queued.
pub struct Scheduler {
    service: Arc<TaskService>,
    modules: Arc<Table<Module>>,
    dirty: Mutex<HashSet<Id>>,
    notify: Notify,
}

enum Dependencies {
    Met,
    Waiting,
    Failed,
}

impl Scheduler {
    #[must_use]
    pub fn new(service: Arc<TaskService>, modules: Arc<Table<Module>>) -> Arc<Self> {
        Arc::new(Self {
            service,
            modules,
            dirty: Mutex::new(HashSet::new()),
            notify: Notify::new(),
        })
    }

    /// Subscribes to task and module events, then spawns the receiver
    /// and scheduling loops. Events published after this returns are
    /// guaranteed to be observed.
    pub async fn spawn(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let mut task_events = self.service.table().subscribe(token.child_token()).await;
        let mut module_events = self.modules.subscribe(token.child_token()).await;

        for module in self.modules.list() {
            self.mark(module.id);
        }

        let receiver = {
            let this = Arc::clone(self);
            let token = token.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        Some(ev) = task_events.recv() => this.observe_task(&ev),
                        Some(ev) = module_events.recv() => this.mark(ev.payload.id),
                        else => break,
                    }
                }
            }
        };

        let scheduling = {
            let this = Arc::clone(self);
            async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = this.notify.notified() => this.schedule_dirty().await,
                    }
                }
            }
        };

        tokio::spawn(async move {
            tokio::join!(receiver, scheduling);
            debug!("scheduler stopped");
        })
    }

    fn mark(&self, module_id: Id) {
        self.dirty.lock().insert(module_id);
        self.notify.notify_one();
    }

    fn observe_task(&self, ev: &Event<Task>) {
        let task = &ev.payload;
        let mut dirty = self.dirty.lock();
        dirty.insert(task.module_id);
        if task.is_terminal() {
            let dependents = self.service.table().filter(|t| {
                t.state == TaskState::Pending && t.depends_on.contains(&task.id)
            });
            dirty.extend(dependents.iter().map(|t| t.module_id));
        }
        drop(dirty);
        self.notify.notify_one();
    }

    async fn schedule_dirty(&self) {
        let dirty: Vec<Id> = self.dirty.lock().drain().collect();
        for module_id in dirty {
            if let Err(e) = self.schedule(module_id).await {
                warn!(module = %module_id, error = %e, "scheduling failed");
            }
        }
    }

    /// Queues whichever pending tasks of a module may run now and
    /// returns their ids.
    ///
    /// # Errors
    ///
    /// Returns an error if a task transition fails.
    pub async fn schedule(&self, module_id: Id) -> Result<Vec<Id>, PugError> {
        let Some(module) = self.modules.find(module_id) else {
            return Ok(Vec::new());
        };

        let mut tasks = self.service.table().filter(|t| t.module_id == module_id);
        tasks.sort_by_key(|t| t.serial);
        let active: Vec<&Task> = tasks.iter().filter(|t| t.state.is_active()).collect();
        let pending: Vec<&Task> = tasks.iter().filter(|t| t.state == TaskState::Pending).collect();

        if pending.is_empty() || active.iter().any(|t| t.kind == TaskKind::Init) {
            return Ok(Vec::new());
        }

        let candidates: Vec<&Task> = if module.initialized != Tri::True {
            match pending.iter().find(|t| t.kind == TaskKind::Init) {
                Some(init) if active.is_empty() => vec![*init],
                _ => Vec::new(),
            }
        } else if pending[0].kind == TaskKind::Init {
            if active.is_empty() {
                vec![pending[0]]
            } else {
                Vec::new()
            }
        } else {
            pending
                .iter()
                .copied()
                .take_while(|t| t.kind != TaskKind::Init)
                .collect()
        };

        let mut module_blocked = active
            .iter()
            .any(|t| t.blocking && t.workspace_id.is_none());
        let mut blocked: HashSet<Id> = active
            .iter()
            .filter(|t| t.blocking || t.kind.mutates_state())
            .filter_map(|t| t.workspace_id)
            .collect();
        let mut busy: HashSet<Id> = active.iter().filter_map(|t| t.workspace_id).collect();
        let mut module_busy = !active.is_empty();

        let mut queued = Vec::new();
        for task in candidates {
            if module_blocked {
                break;
            }
            match self.dependencies(task) {
                Dependencies::Met => {}
                Dependencies::Waiting => {
                    if let Some(ws) = task.workspace_id {
                        blocked.insert(ws);
                    }
                    continue;
                }
                Dependencies::Failed => {
                    self.service
                        .cancel_before_start(task.id, Some(PugError::task("dependency failed")))
                        .await?;
                    continue;
                }
            }

            match task.workspace_id {
                Some(ws) => {
                    if blocked.contains(&ws) || (task.blocking && busy.contains(&ws)) {
                        blocked.insert(ws);
                        continue;
                    }
                    if task.blocking || task.kind.mutates_state() {
                        blocked.insert(ws);
                    }
                    busy.insert(ws);
                }
                None => {
                    if task.blocking {
                        module_blocked = true;
                        if module_busy {
                            break;
                        }
                    }
                }
            }

            self.service.enqueue(task.id).await?;
            module_busy = true;
            queued.push(task.id);
        }

        if !queued.is_empty() {
            debug!(module = %module.path, queued = queued.len(), "scheduled tasks");
        }
        Ok(queued)
    }

    fn dependencies(&self, task: &Task) -> Dependencies {
        let mut waiting = false;
        for dep in &task.depends_on {
            match self.service.table().find(*dep).map(|t| t.state) {
                Some(TaskState::Exited) => {}
                Some(TaskState::Errored | TaskState::Canceled) | None => {
                    return Dependencies::Failed
                }
                Some(_) => waiting = true,
            }
        }
        if waiting {
            Dependencies::Waiting
        } else {
            Dependencies::Met
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("dirty", &self.dirty.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskSpec;
    use crate::workspace::Workspace;

    struct Fixture {
        scheduler: Arc<Scheduler>,
        service: Arc<TaskService>,
        modules: Arc<Table<Module>>,
        workspaces: Arc<Table<Workspace>>,
    }

    fn fixture() -> Fixture {
        let modules = Arc::new(Table::new(64));
        let workspaces = Arc::new(Table::new(64));
        let service = Arc::new(TaskService::new(
            Arc::new(Table::new(64)),
            Arc::clone(&modules),
            Arc::clone(&workspaces),
            "terraform",
            Arc::new(Notify::new()),
        ));
        let scheduler = Scheduler::new(Arc::clone(&service), Arc::clone(&modules));
        Fixture {
            scheduler,
            service,
            modules,
            workspaces,
        }
    }

    async fn module(f: &Fixture, initialized: Tri) -> Module {
        let mut m = Module::new("m");
        m.initialized = initialized;
        f.modules.add(m).await
    }

    async fn workspace(f: &Fixture, m: &Module, name: &str) -> Workspace {
        f.workspaces.add(Workspace::new(name, m)).await
    }

    async fn submit(f: &Fixture, spec: TaskSpec) -> Task {
        f.service.create(spec).await.unwrap()
    }

    fn state(f: &Fixture, t: &Task) -> TaskState {
        f.service.get(t.id).unwrap().state
    }

    #[tokio::test]
    async fn uninitialized_module_queues_only_init() {
        let f = fixture();
        let m = module(&f, Tri::Unknown).await;
        let plan = submit(&f, TaskSpec::new(TaskKind::Plan, m.id, ["plan"])).await;
        let init = submit(&f, TaskSpec::new(TaskKind::Init, m.id, ["init"]).blocking(true)).await;

        let queued = f.scheduler.schedule(m.id).await.unwrap();

        assert_eq!(queued, vec![init.id]);
        assert_eq!(state(&f, &plan), TaskState::Pending);
    }

    #[tokio::test]
    async fn active_init_runs_alone() {
        let f = fixture();
        let m = module(&f, Tri::True).await;
        let init = submit(&f, TaskSpec::new(TaskKind::Init, m.id, ["init"])).await;
        assert_eq!(f.scheduler.schedule(m.id).await.unwrap(), vec![init.id]);

        let validate = submit(&f, TaskSpec::new(TaskKind::Validate, m.id, ["validate"])).await;
        assert!(f.scheduler.schedule(m.id).await.unwrap().is_empty());
        assert_eq!(state(&f, &validate), TaskState::Pending);
    }

    #[tokio::test]
    async fn pending_init_waits_for_active_tasks() {
        let f = fixture();
        let m = module(&f, Tri::True).await;
        let validate = submit(&f, TaskSpec::new(TaskKind::Validate, m.id, ["validate"])).await;
        f.scheduler.schedule(m.id).await.unwrap();
        assert_eq!(state(&f, &validate), TaskState::Queued);

        let init = submit(&f, TaskSpec::new(TaskKind::Init, m.id, ["init"])).await;
        assert!(f.scheduler.schedule(m.id).await.unwrap().is_empty());

        f.service.cancel(validate.id).await.unwrap();
        assert_eq!(f.scheduler.schedule(m.id).await.unwrap(), vec![init.id]);
    }

    #[tokio::test]
    async fn candidates_stop_at_init() {
        let f = fixture();
        let m = module(&f, Tri::True).await;
        let a = submit(&f, TaskSpec::new(TaskKind::Validate, m.id, ["validate"])).await;
        let init = submit(&f, TaskSpec::new(TaskKind::Init, m.id, ["init"])).await;
        let b = submit(&f, TaskSpec::new(TaskKind::Format, m.id, ["fmt"])).await;

        assert_eq!(f.scheduler.schedule(m.id).await.unwrap(), vec![a.id]);
        assert_eq!(state(&f, &init), TaskState::Pending);
        assert_eq!(state(&f, &b), TaskState::Pending);
    }

    #[tokio::test]
    async fn two_applies_on_one_workspace_are_never_both_queued() {
        let f = fixture();
        let m = module(&f, Tri::True).await;
        let ws = workspace(&f, &m, "default").await;
        let other = workspace(&f, &m, "dev").await;

        let a1 = submit(&f, TaskSpec::new(TaskKind::Apply, m.id, ["apply"]).workspace(ws.id)).await;
        let a2 = submit(&f, TaskSpec::new(TaskKind::Apply, m.id, ["apply"]).workspace(ws.id)).await;
        let a3 = submit(&f, TaskSpec::new(TaskKind::Apply, m.id, ["apply"]).workspace(other.id)).await;

        let queued = f.scheduler.schedule(m.id).await.unwrap();
        assert_eq!(queued, vec![a1.id, a3.id]);
        assert_eq!(state(&f, &a2), TaskState::Pending);
    }

    #[tokio::test]
    async fn active_apply_blocks_plan_on_same_workspace() {
        let f = fixture();
        let m = module(&f, Tri::True).await;
        let ws = workspace(&f, &m, "default").await;

        let apply = submit(&f, TaskSpec::new(TaskKind::Apply, m.id, ["apply"]).workspace(ws.id).blocking(true)).await;
        f.scheduler.schedule(m.id).await.unwrap();
        assert_eq!(state(&f, &apply), TaskState::Queued);

        let plan = submit(&f, TaskSpec::new(TaskKind::Plan, m.id, ["plan"]).workspace(ws.id).blocking(true)).await;
        assert!(f.scheduler.schedule(m.id).await.unwrap().is_empty());

        f.service.cancel(apply.id).await.unwrap();
        assert_eq!(f.scheduler.schedule(m.id).await.unwrap(), vec![plan.id]);
    }

    #[tokio::test]
    async fn module_scoped_blocking_task_blocks_module() {
        let f = fixture();
        let m = module(&f, Tri::True).await;
        let ws = workspace(&f, &m, "default").await;

        let new = submit(&f, TaskSpec::new(TaskKind::WorkspaceNew, m.id, ["workspace", "new", "x"]).blocking(true)).await;
        let plan = submit(&f, TaskSpec::new(TaskKind::Plan, m.id, ["plan"]).workspace(ws.id)).await;

        assert_eq!(f.scheduler.schedule(m.id).await.unwrap(), vec![new.id]);
        assert!(f.scheduler.schedule(m.id).await.unwrap().is_empty());
        assert_eq!(state(&f, &plan), TaskState::Pending);
    }

    #[tokio::test]
    async fn failed_dependency_cancels_dependent() {
        let f = fixture();
        let m1 = module(&f, Tri::True).await;
        let m2 = f.modules.add({
            let mut m = Module::new("m2");
            m.initialized = Tri::True;
            m
        })
        .await;

        let first = submit(&f, TaskSpec::new(TaskKind::Plan, m1.id, ["plan"])).await;
        let second = submit(&f, TaskSpec::new(TaskKind::Plan, m2.id, ["plan"]).depends_on([first.id])).await;

        assert!(f.scheduler.schedule(m2.id).await.unwrap().is_empty());
        assert_eq!(state(&f, &second), TaskState::Pending);

        f.service.cancel(first.id).await.unwrap();
        f.scheduler.schedule(m2.id).await.unwrap();

        let second = f.service.get(second.id).unwrap();
        assert_eq!(second.state, TaskState::Canceled);
        assert_eq!(second.error, Some(PugError::task("dependency failed")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn background_loop_reacts_to_module_initialization() {
        let f = fixture();
        let m = module(&f, Tri::Unknown).await;
        let token = CancellationToken::new();
        let handle = f.scheduler.spawn(token.clone()).await;

        let plan = submit(&f, TaskSpec::new(TaskKind::Plan, m.id, ["plan"])).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(state(&f, &plan), TaskState::Pending);

        f.modules.update(m.id, |m| m.initialized = Tri::True).await.unwrap();
        let mut queued = false;
        for _ in 0..100 {
            if state(&f, &plan) == TaskState::Queued {
                queued = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(queued);

        token.cancel();
        handle.await.unwrap();
    }
}
