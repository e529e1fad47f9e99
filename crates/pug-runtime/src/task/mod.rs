//! Task engine.
//!
//! A [`Task`] is one invocation of the configured terraform binary
//! against a module, optionally scoped to a workspace.
//!
//! # Lifecycle
//!
//! ```text
//! pending ──► queued ──► running ──► exited
//!    │           │          ├──────► errored   nonzero exit, spawn or hook failure
//!    │           │          └──────► canceled  signal while running
//!    └───────────┴─────────────────► canceled  before start
//! ```
//!
//! `exited`, `errored` and `canceled` are terminal; a terminal task is
//! never modified again.
//!
//! # Components
//!
//! | Type | Role |
//! |------|------|
//! | [`TaskSpec`] | Immutable description submitted by a service |
//! | [`TaskService`] | Creates, cancels and waits on tasks |
//! | [`Scheduler`] | Moves pending tasks to queued per module rules |
//! | [`Runner`] | Starts queued tasks within concurrency limits |
//! | [`TaskHooks`] | Callbacks at creation and completion |

mod dependency;
mod hooks;
mod process;
mod runner;
mod scheduler;
mod service;
mod spec;

pub use hooks::{NoHooks, TaskHooks};
pub use runner::{Runner, RunnerConfig};
pub use scheduler::Scheduler;
pub use service::TaskService;
pub use spec::TaskSpec;

pub(crate) use process::capture;

use crate::logging::ProvidesEntityIds;
use crate::output::OutputBuffer;
use crate::store::Entity;
use crate::PugError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pug_types::{Id, Serial};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// What a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Init,
    Plan,
    Apply,
    Destroy,
    Refresh,
    Validate,
    Format,
    WorkspaceList,
    WorkspaceNew,
    WorkspaceSelect,
    WorkspaceDelete,
    StatePull,
    StateRm,
    StateMv,
    Taint,
    Untaint,
}

impl TaskKind {
    /// Returns the kebab-case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Refresh => "refresh",
            Self::Validate => "validate",
            Self::Format => "format",
            Self::WorkspaceList => "workspace-list",
            Self::WorkspaceNew => "workspace-new",
            Self::WorkspaceSelect => "workspace-select",
            Self::WorkspaceDelete => "workspace-delete",
            Self::StatePull => "state-pull",
            Self::StateRm => "state-rm",
            Self::StateMv => "state-mv",
            Self::Taint => "taint",
            Self::Untaint => "untaint",
        }
    }

    /// Returns `true` for kinds that write state: apply, destroy and
    /// refresh. At most one of these runs per workspace.
    #[must_use]
    pub fn mutates_state(&self) -> bool {
        matches!(self, Self::Apply | Self::Destroy | Self::Refresh)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Queued,
    Running,
    Exited,
    Errored,
    Canceled,
}

impl TaskState {
    /// Returns `true` for exited, errored and canceled.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited | Self::Errored | Self::Canceled)
    }

    /// Returns `true` for queued and running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    /// Returns `true` if `self → to` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, to: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, to),
            (Pending, Queued)
                | (Pending, Canceled)
                | (Queued, Running)
                | (Queued, Canceled)
                | (Running, Exited)
                | (Running, Errored)
                | (Running, Canceled)
        )
    }

    /// Returns the lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Errored => "errored",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource counts reported by plan and apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Report {
    pub additions: u32,
    pub changes: u32,
    pub destructions: u32,
}

impl Report {
    /// Creates a report.
    #[must_use]
    pub fn new(additions: u32, changes: u32, destructions: u32) -> Self {
        Self {
            additions,
            changes,
            destructions,
        }
    }

    /// Returns `true` if every count is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "+{}~{}-{}",
            self.additions, self.changes, self.destructions
        )
    }
}

/// Kind-specific result stored on an exited task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskSummary {
    Plan { report: Report, has_changes: bool },
    Apply { report: Report },
    State { serial: i64, changed: bool },
    Workspaces { current: Option<String>, count: usize },
}

/// Runtime control shared by every copy of a task row.
#[derive(Debug)]
pub(crate) struct TaskControl {
    state: watch::Sender<TaskState>,
    cancels: AtomicU32,
    pid: Mutex<Option<u32>>,
}

impl TaskControl {
    fn new() -> Self {
        let (state, _) = watch::channel(TaskState::Pending);
        Self {
            state,
            cancels: AtomicU32::new(0),
            pid: Mutex::new(None),
        }
    }

    pub(crate) fn publish_state(&self, state: TaskState) {
        self.state.send_replace(state);
    }

    /// Records a cancel request and returns how many have been made.
    pub(crate) fn request_cancel(&self) -> u32 {
        self.cancels.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancels.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn cancel_count(&self) -> u32 {
        self.cancels.load(Ordering::SeqCst)
    }

    pub(crate) fn set_pid(&self, pid: Option<u32>) {
        *self.pid.lock() = pid;
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        *self.pid.lock()
    }
}

/// A single child-process invocation.
///
/// Rows are copies; the output buffer, hooks and cancel state are
/// shared between every copy of the same task.
#[derive(Clone)]
pub struct Task {
    pub id: Id,
    pub serial: Serial,
    pub kind: TaskKind,
    pub module_id: Id,
    /// Module path relative to the working directory.
    pub module_path: String,
    pub workspace_id: Option<Id>,
    /// Exported as `TF_WORKSPACE` when set.
    pub workspace_name: Option<String>,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub description: Option<String>,

    pub blocking: bool,
    pub exclusive: bool,
    pub immediate: bool,
    pub wait: bool,
    pub json: bool,
    pub respect_dependencies: bool,
    pub inverse: bool,
    /// Tasks that must exit successfully before this one is queued.
    pub depends_on: Vec<Id>,

    pub state: TaskState,
    pub summary: Option<TaskSummary>,
    pub error: Option<PugError>,
    pub exit_code: Option<i32>,

    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    output: OutputBuffer,
    hooks: Arc<dyn TaskHooks>,
    control: Arc<TaskControl>,
}

impl Task {
    /// Returns the task's output buffer.
    #[must_use]
    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    /// Returns `true` once the task has reached a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns the full command line, for display.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Waits until the task reaches a terminal state and returns it.
    ///
    /// Must not be called from one of the task's own hooks.
    pub async fn wait(&self) -> TaskState {
        let mut rx = self.control.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_terminal() {
                return state;
            }
            if rx.changed().await.is_err() {
                return state;
            }
        }
    }

    pub(crate) fn hooks(&self) -> &Arc<dyn TaskHooks> {
        &self.hooks
    }

    pub(crate) fn control(&self) -> &Arc<TaskControl> {
        &self.control
    }

    /// Applies a state transition and its timestamp to this row.
    pub(crate) fn transition(&mut self, to: TaskState) -> Result<(), PugError> {
        if !self.state.can_transition_to(to) {
            return Err(PugError::invalid_state(format!(
                "task {} cannot go from {} to {}",
                self.id.short(),
                self.state,
                to
            )));
        }
        let now = Utc::now();
        match to {
            TaskState::Queued => self.queued_at = Some(now),
            TaskState::Running => self.started_at = Some(now),
            s if s.is_terminal() => self.finished_at = Some(now),
            _ => {}
        }
        self.state = to;
        Ok(())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("serial", &self.serial)
            .field("kind", &self.kind)
            .field("module_path", &self.module_path)
            .field("workspace_name", &self.workspace_name)
            .field("state", &self.state)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl Entity for Task {
    fn id(&self) -> Id {
        self.id
    }

    fn label(&self) -> String {
        format!("{}#{} {}", self.kind, self.serial, self.module_path)
    }
}

impl ProvidesEntityIds for Task {
    fn entity_ids(&self) -> Vec<Id> {
        std::iter::once(self.module_id)
            .chain(self.workspace_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        use TaskState::*;
        assert!(Pending.can_transition_to(Queued));
        assert!(Pending.can_transition_to(Canceled));
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(Exited));
        assert!(Running.can_transition_to(Canceled));

        assert!(!Pending.can_transition_to(Running));
        assert!(!Exited.can_transition_to(Errored));
        assert!(!Canceled.can_transition_to(Queued));
        assert!(!Errored.can_transition_to(Errored));
    }

    #[test]
    fn terminal_and_active() {
        assert!(TaskState::Exited.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Queued.is_active());
        assert!(!TaskState::Pending.is_active());
    }

    #[test]
    fn state_mutating_kinds() {
        assert!(TaskKind::Apply.mutates_state());
        assert!(TaskKind::Destroy.mutates_state());
        assert!(TaskKind::Refresh.mutates_state());
        assert!(!TaskKind::Plan.mutates_state());
        assert_eq!(TaskKind::WorkspaceSelect.to_string(), "workspace-select");
    }

    #[test]
    fn report_display_and_empty() {
        assert!(Report::default().is_empty());
        assert_eq!(Report::new(1, 2, 3).to_string(), "+1~2-3");
    }
}
