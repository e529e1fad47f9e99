//! Dequeue loop for queued tasks.
//!
//! # Admission Rules
//!
//! | Task | Starts when |
//! |------|-------------|
//! | normal | `running < max_tasks` and no exclusive task running |
//! | exclusive | nothing at all is running |
//! | immediate | no exclusive task running (ignores `max_tasks`) |
//!
//! Normal tasks start strictly in queue order: if the oldest queued
//! task cannot start, nothing behind it does. Immediate tasks are
//! considered first and count toward the running total.

use super::process::{self, Invocation};
use super::service::TaskService;
use super::{Task, TaskState};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Runner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Maximum number of normal tasks running at once.
    pub max_tasks: usize,
    /// Root that module paths are relative to.
    pub workdir: PathBuf,
    /// Environment added to every task, after `TF_IN_AUTOMATION`.
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct Counts {
    total: usize,
    exclusive: usize,
}

/// Starts queued tasks as concurrency allows.
pub struct Runner {
    service: Arc<TaskService>,
    config: RunnerConfig,
    counts: Mutex<Counts>,
    wake: Arc<Notify>,
}

impl Runner {
    /// Creates a runner. `wake` must be the notifier the task service
    /// signals on enqueue.
    #[must_use]
    pub fn new(service: Arc<TaskService>, config: RunnerConfig, wake: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            service,
            config,
            counts: Mutex::new(Counts::default()),
            wake,
        })
    }

    /// Returns the number of tasks currently started by this runner.
    #[must_use]
    pub fn running(&self) -> usize {
        self.counts.lock().total
    }

    /// Spawns the dequeue loop. It stops when `token` is cancelled;
    /// tasks already running are left to finish.
    pub fn spawn(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            debug!(max_tasks = runner.config.max_tasks, "runner started");
            loop {
                runner.dispatch().await;
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = runner.wake.notified() => {}
                }
            }
            debug!("runner stopped");
        })
    }

    /// Starts every queued task that may start now.
    async fn dispatch(self: &Arc<Self>) {
        let mut queued = self.service.table().filter(|t| t.state == TaskState::Queued);
        queued.sort_by_key(|t| (t.queued_at, t.serial));

        for task in queued.iter().filter(|t| t.immediate) {
            if self.admit(task) {
                self.start(task).await;
            }
        }
        for task in queued.iter().filter(|t| !t.immediate) {
            if !self.admit(task) {
                break;
            }
            self.start(task).await;
        }
    }

    fn admit(&self, task: &Task) -> bool {
        let mut counts = self.counts.lock();
        if counts.exclusive > 0 {
            return false;
        }
        if task.exclusive && counts.total > 0 {
            return false;
        }
        if !task.immediate && counts.total >= self.config.max_tasks {
            return false;
        }
        counts.total += 1;
        if task.exclusive {
            counts.exclusive += 1;
        }
        true
    }

    fn release(&self, task: &Task) {
        let mut counts = self.counts.lock();
        counts.total = counts.total.saturating_sub(1);
        if task.exclusive {
            counts.exclusive = counts.exclusive.saturating_sub(1);
        }
    }

    async fn start(self: &Arc<Self>, task: &Task) {
        let task = match self.service.transition(task.id, TaskState::Running).await {
            Ok(task) => task,
            Err(e) => {
                // Canceled between listing and starting.
                debug!(task = %task.id, error = %e, "task not started");
                self.release(task);
                return;
            }
        };
        info!(
            task = %task.id,
            kind = %task.kind,
            module = %task.module_path,
            exclusive = task.exclusive,
            "starting task"
        );

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            let result = process::run(runner.invocation(&task), task.output(), task.control()).await;
            runner.service.complete(task.clone(), result).await;
            runner.release(&task);
            runner.wake.notify_one();
        });
    }

    fn invocation<'a>(&self, task: &'a Task) -> Invocation<'a> {
        let mut env = Vec::with_capacity(self.config.env.len() + task.env.len() + 2);
        env.push(("TF_IN_AUTOMATION".to_string(), "1".to_string()));
        env.extend(self.config.env.iter().cloned());
        env.extend(task.env.iter().cloned());
        if let Some(name) = &task.workspace_name {
            env.push(("TF_WORKSPACE".to_string(), name.clone()));
        }
        Invocation {
            program: &task.program,
            args: &task.args,
            cwd: self.config.workdir.join(&task.module_path),
            env,
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .field("counts", &*self.counts.lock())
            .finish_non_exhaustive()
    }
}
