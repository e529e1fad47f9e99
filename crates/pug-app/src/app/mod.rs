//! The running application.
//!
//! [`PugApp`] owns every service along with the background loops that
//! drive them. Frontends submit work through the services and wait on
//! the returned tasks.
//!
//! ```text
//! PugApp
//!   ├── TaskService ◄── Scheduler, Runner
//!   ├── ModuleService
//!   ├── WorkspaceService ◄── watcher (optional)
//!   ├── StateService
//!   ├── PlanService
//!   └── Table<LogRecord> ◄── LogWriter (optional)
//! ```

mod builder;

pub use builder::PugAppBuilder;

use crate::AppError;
use pug_runtime::logging::LogRecord;
use pug_runtime::module::{ModuleService, ReloadSummary, Tri};
use pug_runtime::plan::PlanService;
use pug_runtime::state::StateService;
use pug_runtime::task::{Task, TaskService};
use pug_runtime::workspace::{Workspace, WorkspaceService};
use pug_runtime::{PugConfig, Table};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Services plus the loops running them.
pub struct PugApp {
    config: PugConfig,
    tasks: Arc<TaskService>,
    modules: Arc<ModuleService>,
    workspaces: Arc<WorkspaceService>,
    state: Arc<StateService>,
    plans: Arc<PlanService>,
    logs: Arc<Table<LogRecord>>,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl PugApp {
    /// Returns a builder for the given configuration.
    #[must_use]
    pub fn builder(config: PugConfig) -> PugAppBuilder {
        PugAppBuilder::new(config)
    }

    /// The resolved configuration, with an absolute `workdir`.
    #[must_use]
    pub fn config(&self) -> &PugConfig {
        &self.config
    }

    #[must_use]
    pub fn tasks(&self) -> &Arc<TaskService> {
        &self.tasks
    }

    #[must_use]
    pub fn modules(&self) -> &Arc<ModuleService> {
        &self.modules
    }

    #[must_use]
    pub fn workspaces(&self) -> &Arc<WorkspaceService> {
        &self.workspaces
    }

    #[must_use]
    pub fn state(&self) -> &Arc<StateService> {
        &self.state
    }

    #[must_use]
    pub fn plans(&self) -> &Arc<PlanService> {
        &self.plans
    }

    /// Captured log records; empty unless built with a log source.
    #[must_use]
    pub fn logs(&self) -> &Arc<Table<LogRecord>> {
        &self.logs
    }

    /// Discovers modules under the working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the working directory cannot be walked.
    pub async fn reload_modules(&self) -> Result<ReloadSummary, AppError> {
        Ok(self.modules.reload().await?)
    }

    /// Lists workspaces of every initialized module and waits for the
    /// reload tasks to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if a reload task cannot be created.
    pub async fn reload_workspaces(&self) -> Result<Vec<Task>, AppError> {
        let mut created = Vec::new();
        for module in self.modules.list() {
            if module.initialized != Tri::True {
                debug!(module = %module.path, "skipping workspace reload of uninitialized module");
                continue;
            }
            created.push(self.workspaces.reload(module.id).await?);
        }
        self.wait_all(&created).await
    }

    /// Returns the current workspace of every module that has one,
    /// in module path order.
    #[must_use]
    pub fn current_workspaces(&self) -> Vec<Workspace> {
        self.modules
            .list()
            .into_iter()
            .filter_map(|m| self.workspaces.current(m.id))
            .collect()
    }

    /// Waits for every task and returns their terminal rows.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`](pug_runtime::PugError::NotFound)
    /// if a task row has gone.
    pub async fn wait_all(&self, tasks: &[Task]) -> Result<Vec<Task>, AppError> {
        let mut done = Vec::with_capacity(tasks.len());
        for task in tasks {
            done.push(self.tasks.wait(task.id).await?);
        }
        Ok(done)
    }

    /// Cancels every task that has not finished yet. Returns how many
    /// were canceled or asked to stop.
    pub async fn cancel_active(&self) -> usize {
        let mut n = 0;
        for task in self.tasks.list() {
            if task.is_terminal() {
                continue;
            }
            match self.tasks.cancel(task.id).await {
                Ok(_) => n += 1,
                // It may have finished in the meantime.
                Err(e) => debug!(task = %task.id, error = %e, "not canceled"),
            }
        }
        if n > 0 {
            info!(count = n, "canceled active tasks");
        }
        n
    }

    /// Stops the background loops and waits for them to exit.
    ///
    /// Tasks still running are left to finish on their own.
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                debug!(error = %e, "background loop ended abnormally");
            }
        }
        debug!("application shut down");
    }
}

impl std::fmt::Debug for PugApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PugApp")
            .field("workdir", &self.config.workdir)
            .field("program", &self.config.program)
            .field("loops", &self.handles.len())
            .finish_non_exhaustive()
    }
}
