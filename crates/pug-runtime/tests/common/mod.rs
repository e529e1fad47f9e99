//! Shared fixture: a scratch working tree, a fake `terraform` and a
//! running scheduler and runner.

#![allow(dead_code)]

use pug_runtime::module::{Module, ModuleService};
use pug_runtime::plan::PlanService;
use pug_runtime::state::StateService;
use pug_runtime::store::Table;
use pug_runtime::task::{Runner, RunnerConfig, Scheduler, Task, TaskService, TaskState};
use pug_runtime::workspace::{Workspace, WorkspaceService};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Records `start <module> <command>` and `end <module> <command>` in
/// `$FAKE_LOG` around canned output for each sub-command.
const FAKE_TERRAFORM: &str = r#"#!/bin/sh
log=${FAKE_LOG:-/dev/null}
module=$(basename "$(pwd -P)")
echo "start $module $1" >> "$log"
case "$1" in
  init)
    sleep 0.5
    echo "Terraform has been successfully initialized!"
    ;;
  workspace)
    case "$2" in
      list)
        if [ -f workspaces.txt ]; then cat workspaces.txt; else printf '* default\n'; fi
        ;;
      *)
        echo "workspace $2 $3"
        ;;
    esac
    ;;
  plan)
    sleep 0.1
    echo "Plan: 1 to add, 0 to change, 0 to destroy."
    ;;
  apply)
    sleep 0.3
    echo "Apply complete! Resources: 1 added, 0 changed, 0 destroyed."
    ;;
  validate)
    sleep 0.2
    echo "Success! The configuration is valid."
    ;;
  state)
    printf '{"version":4,"serial":3,"resources":[{"mode":"managed","type":"null_resource","name":"a","instances":[{"attributes":{"id":"1"}}]}]}\n'
    ;;
  graph-dependencies)
    printf 'digraph {\n  "app" ;\n  "vpc" ;\n  "app" -> "vpc";\n}\n'
    ;;
  hang)
    sleep 30
    ;;
  fail)
    echo "Error: boom" >&2
    exit 1
    ;;
esac
echo "end $module $1" >> "$log"
"#;

#[derive(Debug, Clone)]
pub struct Options {
    pub max_tasks: usize,
    pub terragrunt: bool,
    pub plugin_cache: bool,
    /// Run the workspace watcher.
    pub watch: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_tasks: 4,
            terragrunt: false,
            plugin_cache: false,
            watch: false,
        }
    }
}

pub struct Harness {
    _dir: TempDir,
    pub workdir: PathBuf,
    pub data_dir: PathBuf,
    pub log: PathBuf,
    pub tasks: Arc<TaskService>,
    pub modules: Arc<ModuleService>,
    pub workspaces: Arc<WorkspaceService>,
    pub state: Arc<StateService>,
    pub plans: Arc<PlanService>,
    pub runner: Arc<Runner>,
    token: CancellationToken,
}

/// Creates a module directory. Initialized modules get a `.terraform`
/// (or `.terragrunt-cache`) directory.
pub fn module_dir(workdir: &Path, path: &str, initialized: bool) {
    let dir = workdir.join(path);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("main.tf"), "").unwrap();
    std::fs::write(dir.join("terragrunt.hcl"), "").unwrap();
    if initialized {
        std::fs::create_dir_all(dir.join(".terraform")).unwrap();
        std::fs::create_dir_all(dir.join(".terragrunt-cache")).unwrap();
    }
}

impl Harness {
    /// Builds the services over a fresh working tree prepared by
    /// `setup`, starts the engine and reloads modules.
    pub async fn start(opts: Options, setup: impl FnOnce(&Path)) -> Self {
        let dir = TempDir::new().unwrap();
        let workdir = dir.path().join("work");
        let data_dir = dir.path().join("data");
        let log = dir.path().join("calls.log");
        std::fs::create_dir_all(&workdir).unwrap();
        setup(&workdir);

        let program = dir.path().join("bin").join(if opts.terragrunt {
            "terragrunt"
        } else {
            "terraform"
        });
        std::fs::create_dir_all(program.parent().unwrap()).unwrap();
        std::fs::write(&program, FAKE_TERRAFORM).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        let module_table = Arc::new(Table::<Module>::new(256));
        let ws_table = Arc::new(Table::<Workspace>::new(256));
        let wake = Arc::new(Notify::new());
        let tasks = Arc::new(TaskService::new(
            Arc::new(Table::<Task>::new(256)),
            Arc::clone(&module_table),
            Arc::clone(&ws_table),
            program.display().to_string(),
            Arc::clone(&wake),
        ));
        let modules = Arc::new(ModuleService::new(
            Arc::clone(&module_table),
            Arc::clone(&tasks),
            &workdir,
            opts.terragrunt,
            opts.plugin_cache,
        ));
        let workspaces = WorkspaceService::new(ws_table, Arc::clone(&modules), Arc::clone(&tasks));
        let state = Arc::new(StateService::new(
            Arc::new(Table::new(256)),
            Arc::clone(&tasks),
            Arc::clone(&workspaces),
        ));
        let plans = Arc::new(PlanService::new(
            Arc::new(Table::new(256)),
            Arc::clone(&tasks),
            Arc::clone(&modules),
            Arc::clone(&workspaces),
            Arc::clone(&state),
            &data_dir,
            false,
        ));

        let token = CancellationToken::new();
        Scheduler::new(Arc::clone(&tasks), module_table)
            .spawn(token.clone())
            .await;
        let runner = Runner::new(
            Arc::clone(&tasks),
            RunnerConfig {
                max_tasks: opts.max_tasks,
                workdir: workdir.clone(),
                env: vec![("FAKE_LOG".into(), log.display().to_string())],
            },
            wake,
        );
        runner.spawn(token.clone());
        if opts.watch {
            workspaces.spawn(token.clone()).await;
        }

        modules.reload().await.unwrap();

        Self {
            _dir: dir,
            workdir,
            data_dir,
            log,
            tasks,
            modules,
            workspaces,
            state,
            plans,
            runner,
            token,
        }
    }

    pub fn module(&self, path: &str) -> Module {
        self.modules.get_by_path(path).unwrap()
    }

    /// Adds a workspace row directly and makes it current.
    pub async fn workspace(&self, module: &Module, name: &str) -> Workspace {
        let ws = self
            .workspaces
            .table()
            .add(Workspace::new(name, module))
            .await;
        self.modules.set_current(module.id, ws.id).await.unwrap();
        ws
    }

    /// Lines written by the fake program so far.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Waits for a task to finish, failing the test after 20s.
    pub async fn finish(&self, task: &Task) -> Task {
        tokio::time::timeout(Duration::from_secs(20), self.tasks.wait(task.id))
            .await
            .expect("task did not finish in time")
            .unwrap()
    }

    /// Polls until `pred` holds, failing the test after 20s.
    pub async fn until(&self, what: &str, mut pred: impl FnMut() -> bool) {
        for _ in 0..2000 {
            if pred() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    pub fn state_of(&self, task: &Task) -> TaskState {
        self.tasks.get(task.id).unwrap().state
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Index of the first call equal to `line`.
pub fn position(calls: &[String], line: &str) -> usize {
    calls
        .iter()
        .position(|c| c == line)
        .unwrap_or_else(|| panic!("no call '{line}' in {calls:#?}"))
}
