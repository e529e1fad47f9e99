//! Task lifecycle callbacks.

use super::{Task, TaskSummary};
use crate::PugError;
use async_trait::async_trait;

/// Callbacks a service attaches to the tasks it creates.
///
/// # Invocation Order
///
/// ```text
/// create ─► publish created ─► after_create
///
/// process exits 0 ─► before_exited ─┬─ Ok  ─► publish exited  ─► after_exited
///                                   └─ Err ─► publish errored ─► after_errored
/// process exits ≠0 ─────────────────────────► publish errored ─► after_errored
/// cancel ───────────────────────────────────► publish canceled ─► after_canceled
/// ```
///
/// `before_exited` reads the task's output (see
/// [`Task::output`](super::Task::output)) and returns the summary to
/// store; its error fails the task even though the process succeeded.
///
/// Hooks run on the task's completion task. They may create other tasks
/// and update other entities, but must not wait on their own task.
#[async_trait]
pub trait TaskHooks: Send + Sync {
    async fn after_create(&self, _task: &Task) {}

    async fn before_exited(&self, _task: &Task) -> Result<Option<TaskSummary>, PugError> {
        Ok(None)
    }

    async fn after_exited(&self, _task: &Task) {}

    async fn after_errored(&self, _task: &Task) {}

    async fn after_canceled(&self, _task: &Task) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl TaskHooks for NoHooks {}
