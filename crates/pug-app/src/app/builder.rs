//! Builder for [`PugApp`].

use super::PugApp;
use crate::AppError;
use pug_runtime::logging::{EntityResolver, LogRecord, LogSource, LogWriter, ReferenceUpdater};
use pug_runtime::module::{Module, ModuleService};
use pug_runtime::plan::{Plan, PlanService};
use pug_runtime::state::{ResourceResolver, StateService};
use pug_runtime::task::{Runner, RunnerConfig, Scheduler, Task, TaskService};
use pug_runtime::workspace::{Workspace, WorkspaceService};
use pug_runtime::{PugConfig, Table};
use pug_types::Kind;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Builder for [`PugApp`].
///
/// Takes a fully resolved [`PugConfig`]; file, environment and CLI
/// layers are merged before the builder sees it. The builder only
/// handles launch parameters.
///
/// # Example
///
/// ```no_run
/// use pug_app::{PugApp, PugConfig};
///
/// # async fn run() -> Result<(), pug_app::AppError> {
/// let app = PugApp::builder(PugConfig::default())
///     .watch_workspaces(false)
///     .build()
///     .await?;
/// app.reload_modules().await?;
/// app.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct PugAppBuilder {
    config: PugConfig,
    /// Receiving end of the entity log layer, if one is installed.
    log_source: Option<LogSource>,
    /// Reload workspaces of new modules and after each init.
    watch_workspaces: bool,
}

impl PugAppBuilder {
    /// Creates a new builder for the given configuration.
    #[must_use]
    pub fn new(config: PugConfig) -> Self {
        Self {
            config,
            log_source: None,
            watch_workspaces: true,
        }
    }

    /// Stores records captured by an
    /// [`EntityLayer`](pug_runtime::logging::EntityLayer) in the app's
    /// log table.
    #[must_use]
    pub fn log_source(mut self, source: LogSource) -> Self {
        self.log_source = Some(source);
        self
    }

    /// Enables or disables the workspace watcher (default: enabled).
    #[must_use]
    pub fn watch_workspaces(mut self, yes: bool) -> Self {
        self.watch_workspaces = yes;
        self
    }

    /// Builds the services and starts the scheduler, the runner, the
    /// workspace watcher and the log writer.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the working directory does not
    /// exist and [`AppError::Config`] for malformed `envs` entries.
    pub async fn build(self) -> Result<PugApp, AppError> {
        let mut config = self.config;
        config.workdir = config.workdir.canonicalize()?;
        let env = config.task_env()?;
        let buffer = config.broker.buffer;
        let terragrunt = config.is_terragrunt();
        let plugin_cache = config.uses_plugin_cache();

        let task_table = Arc::new(Table::<Task>::new(buffer));
        let module_table = Arc::new(Table::<Module>::new(buffer));
        let ws_table = Arc::new(Table::<Workspace>::new(buffer));
        let plan_table = Arc::new(Table::<Plan>::new(buffer));
        let logs = Arc::new(Table::<LogRecord>::new(buffer));
        let wake = Arc::new(Notify::new());

        let tasks = Arc::new(TaskService::new(
            Arc::clone(&task_table),
            Arc::clone(&module_table),
            Arc::clone(&ws_table),
            config.program.clone(),
            Arc::clone(&wake),
        ));
        let modules = Arc::new(ModuleService::new(
            Arc::clone(&module_table),
            Arc::clone(&tasks),
            config.workdir.clone(),
            terragrunt,
            plugin_cache,
        ));
        let workspaces = WorkspaceService::new(
            Arc::clone(&ws_table),
            Arc::clone(&modules),
            Arc::clone(&tasks),
        );
        let state = Arc::new(StateService::new(
            Arc::new(Table::new(buffer)),
            Arc::clone(&tasks),
            Arc::clone(&workspaces),
        ));
        let plans = Arc::new(PlanService::new(
            Arc::clone(&plan_table),
            Arc::clone(&tasks),
            Arc::clone(&modules),
            Arc::clone(&workspaces),
            Arc::clone(&state),
            config.data_dir_or_default(),
            config.json_plans,
        ));

        let token = CancellationToken::new();
        let mut handles = Vec::new();

        if let Some(source) = self.log_source {
            let updater = ReferenceUpdater::new()
                .with(Kind::Module, module_table.clone() as Arc<dyn EntityResolver>)
                .with(Kind::Workspace, ws_table.clone() as Arc<dyn EntityResolver>)
                .with(Kind::Task, task_table.clone() as Arc<dyn EntityResolver>)
                .with(Kind::Plan, plan_table as Arc<dyn EntityResolver>)
                .with(
                    Kind::StateResource,
                    Arc::new(ResourceResolver::new(Arc::clone(state.table()))) as Arc<dyn EntityResolver>,
                );
            let writer = LogWriter::new(Arc::clone(&logs), config.logging.max_records)
                .updater(Arc::new(updater));
            handles.push(writer.spawn(source, token.clone()));
        }

        handles.push(
            Scheduler::new(Arc::clone(&tasks), module_table)
                .spawn(token.clone())
                .await,
        );
        handles.push(
            Runner::new(
                Arc::clone(&tasks),
                RunnerConfig {
                    max_tasks: config.max_tasks,
                    workdir: config.workdir.clone(),
                    env,
                },
                wake,
            )
            .spawn(token.clone()),
        );
        if self.watch_workspaces {
            handles.push(workspaces.spawn(token.clone()).await);
        }

        info!(
            workdir = %config.workdir.display(),
            program = %config.program,
            terragrunt,
            plugin_cache,
            max_tasks = config.max_tasks,
            "application initialized"
        );

        Ok(PugApp {
            config,
            tasks,
            modules,
            workspaces,
            state,
            plans,
            logs,
            token,
            handles,
        })
    }
}
