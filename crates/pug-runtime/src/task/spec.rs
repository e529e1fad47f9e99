//! Task specifications.

use super::hooks::{NoHooks, TaskHooks};
use super::TaskKind;
use pug_types::Id;
use std::sync::Arc;

/// Immutable description of a task to create.
///
/// Services build a spec, attach hooks and hand it to
/// [`TaskService::create`](super::TaskService::create).
///
/// # Example
///
/// ```
/// use pug_runtime::task::{TaskKind, TaskSpec};
/// use pug_types::{Id, Kind};
///
/// let module = Id::new(Kind::Module);
/// let spec = TaskSpec::new(TaskKind::Init, module, ["init", "-input=false"])
///     .blocking(true)
///     .exclusive(true);
///
/// assert!(spec.blocking && spec.exclusive);
/// assert_eq!(spec.args, ["init", "-input=false"]);
/// ```
#[derive(Clone)]
pub struct TaskSpec {
    pub kind: TaskKind,
    pub module_id: Id,
    pub workspace_id: Option<Id>,
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
    pub depends_on: Vec<Id>,
    pub hooks: Arc<dyn TaskHooks>,
}

impl TaskSpec {
    /// Creates a module-scoped spec with no flags set.
    pub fn new<I, S>(kind: TaskKind, module_id: Id, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            kind,
            module_id,
            workspace_id: None,
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            description: None,
            blocking: false,
            exclusive: false,
            immediate: false,
            wait: false,
            json: false,
            respect_dependencies: false,
            inverse: false,
            depends_on: Vec::new(),
            hooks: Arc::new(NoHooks),
        }
    }

    /// Scopes the task to a workspace.
    #[must_use]
    pub fn workspace(mut self, id: Id) -> Self {
        self.workspace_id = Some(id);
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    #[must_use]
    pub fn blocking(mut self, yes: bool) -> Self {
        self.blocking = yes;
        self
    }

    #[must_use]
    pub fn exclusive(mut self, yes: bool) -> Self {
        self.exclusive = yes;
        self
    }

    #[must_use]
    pub fn immediate(mut self, yes: bool) -> Self {
        self.immediate = yes;
        self
    }

    #[must_use]
    pub fn wait(mut self, yes: bool) -> Self {
        self.wait = yes;
        self
    }

    #[must_use]
    pub fn json(mut self, yes: bool) -> Self {
        self.json = yes;
        self
    }

    /// Orders a batch by module dependencies; `inverse` reverses it.
    #[must_use]
    pub fn respect_dependencies(mut self, yes: bool, inverse: bool) -> Self {
        self.respect_dependencies = yes;
        self.inverse = inverse;
        self
    }

    #[must_use]
    pub fn depends_on(mut self, ids: impl IntoIterator<Item = Id>) -> Self {
        self.depends_on.extend(ids);
        self
    }

    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn TaskHooks>) -> Self {
        self.hooks = hooks;
        self
    }
}

impl std::fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSpec")
            .field("kind", &self.kind)
            .field("module_id", &self.module_id)
            .field("workspace_id", &self.workspace_id)
            .field("args", &self.args)
            .field("blocking", &self.blocking)
            .field("exclusive", &self.exclusive)
            .field("immediate", &self.immediate)
            .finish_non_exhaustive()
    }
}
