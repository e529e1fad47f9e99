//! State reload and resource operations.

use super::parse::parse_state;
use super::{Resource, ResourceStatus, StateSnapshot};
use crate::store::Table;
use crate::task::{Task, TaskHooks, TaskKind, TaskService, TaskSpec, TaskSummary};
use crate::workspace::WorkspaceService;
use crate::PugError;
use async_trait::async_trait;
use pug_types::{Id, Kind};
use std::sync::Arc;
use tracing::{debug, info};

/// Pulls workspace state and runs taint, untaint, mv and rm.
pub struct StateService {
    states: Arc<Table<StateSnapshot>>,
    tasks: Arc<TaskService>,
    workspaces: Arc<WorkspaceService>,
}

#[derive(Debug, Clone)]
enum Op {
    Reload,
    Taint(String),
    Untaint(String),
    Move { src: String, dest: String },
    Remove(Vec<String>),
}

impl Op {
    fn status(&self) -> ResourceStatus {
        match self {
            Self::Reload => ResourceStatus::Reloading,
            Self::Taint(_) => ResourceStatus::Tainting,
            Self::Untaint(_) => ResourceStatus::Untainting,
            Self::Move { .. } => ResourceStatus::Moving,
            Self::Remove(_) => ResourceStatus::Removing,
        }
    }

    /// Addresses the op works on; `None` means every resource.
    fn addresses(&self) -> Option<Vec<String>> {
        match self {
            Self::Reload => None,
            Self::Taint(a) | Self::Untaint(a) => Some(vec![a.clone()]),
            Self::Move { src, .. } => Some(vec![src.clone()]),
            Self::Remove(addrs) => Some(addrs.clone()),
        }
    }
}

impl StateService {
    pub fn new(
        states: Arc<Table<StateSnapshot>>,
        tasks: Arc<TaskService>,
        workspaces: Arc<WorkspaceService>,
    ) -> Self {
        Self {
            states,
            tasks,
            workspaces,
        }
    }

    /// Returns the snapshot table.
    #[must_use]
    pub fn table(&self) -> &Arc<Table<StateSnapshot>> {
        &self.states
    }

    /// Returns a workspace's snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if its state has not been loaded.
    pub fn get(&self, workspace_id: Id) -> Result<StateSnapshot, PugError> {
        self.states.get(workspace_id)
    }

    /// Returns a workspace's resources sorted by address; empty if its
    /// state has not been loaded.
    #[must_use]
    pub fn resources(&self, workspace_id: Id) -> Vec<Resource> {
        self.states
            .find(workspace_id)
            .map(|s| s.resources.into_values().collect())
            .unwrap_or_default()
    }

    /// Submits `terraform state pull` for a workspace.
    ///
    /// If the pulled serial matches the cached snapshot, the snapshot is
    /// left as it is and the summary reports no change.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the workspace does not exist.
    pub async fn reload(&self, workspace_id: Id) -> Result<Task, PugError> {
        let args = vec!["state".to_string(), "pull".to_string()];
        self.submit(workspace_id, TaskKind::StatePull, args, Op::Reload, false)
            .await
    }

    /// Submits `terraform taint <address>`.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the resource is not in the
    /// cached state.
    pub async fn taint(&self, workspace_id: Id, address: &str) -> Result<Task, PugError> {
        self.require(workspace_id, &[address])?;
        let args = vec!["taint".to_string(), address.to_string()];
        self.submit(workspace_id, TaskKind::Taint, args, Op::Taint(address.into()), true)
            .await
    }

    /// Submits `terraform untaint <address>`.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if the resource is not in the
    /// cached state.
    pub async fn untaint(&self, workspace_id: Id, address: &str) -> Result<Task, PugError> {
        self.require(workspace_id, &[address])?;
        let args = vec!["untaint".to_string(), address.to_string()];
        self.submit(workspace_id, TaskKind::Untaint, args, Op::Untaint(address.into()), true)
            .await
    }

    /// Submits `terraform state mv <src> <dest>`.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::NotFound`] if `src` is not in the cached
    /// state.
    pub async fn mv(&self, workspace_id: Id, src: &str, dest: &str) -> Result<Task, PugError> {
        self.require(workspace_id, &[src])?;
        let args = vec![
            "state".to_string(),
            "mv".to_string(),
            src.to_string(),
            dest.to_string(),
        ];
        let op = Op::Move {
            src: src.into(),
            dest: dest.into(),
        };
        self.submit(workspace_id, TaskKind::StateMv, args, op, true).await
    }

    /// Submits `terraform state rm <address>...`.
    ///
    /// # Errors
    ///
    /// Returns [`PugError::InvalidState`] if `addresses` is empty, or
    /// [`PugError::NotFound`] if one is not in the cached state.
    pub async fn rm(&self, workspace_id: Id, addresses: &[&str]) -> Result<Task, PugError> {
        if addresses.is_empty() {
            return Err(PugError::invalid_state("state rm needs at least one address"));
        }
        self.require(workspace_id, addresses)?;
        let mut args = vec!["state".to_string(), "rm".to_string()];
        args.extend(addresses.iter().map(|a| (*a).to_string()));
        let op = Op::Remove(addresses.iter().map(|a| (*a).to_string()).collect());
        self.submit(workspace_id, TaskKind::StateRm, args, op, true).await
    }

    fn require(&self, workspace_id: Id, addresses: &[&str]) -> Result<(), PugError> {
        let snapshot = self.states.get(workspace_id)?;
        for addr in addresses {
            if !snapshot.resources.contains_key(*addr) {
                return Err(PugError::not_found_named(Kind::StateResource, *addr));
            }
        }
        Ok(())
    }

    async fn submit(
        &self,
        workspace_id: Id,
        kind: TaskKind,
        args: Vec<String>,
        op: Op,
        blocking: bool,
    ) -> Result<Task, PugError> {
        let ws = self.workspaces.get(workspace_id)?;
        let spec = TaskSpec::new(kind, ws.module_id, args)
            .workspace(workspace_id)
            .blocking(blocking)
            .json(matches!(op, Op::Reload))
            .hooks(Arc::new(StateHooks {
                states: Arc::clone(&self.states),
                workspace_id,
                module_id: ws.module_id,
                op,
            }));
        self.tasks.create(spec).await
    }
}

impl std::fmt::Debug for StateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateService")
            .field("snapshots", &self.states.len())
            .finish_non_exhaustive()
    }
}

struct StateHooks {
    states: Arc<Table<StateSnapshot>>,
    workspace_id: Id,
    module_id: Id,
    op: Op,
}

impl StateHooks {
    async fn set_status(&self, status: ResourceStatus) {
        if self.states.find(self.workspace_id).is_none() {
            return;
        }
        let addresses = self.op.addresses();
        let res = self
            .states
            .update(self.workspace_id, |s| {
                for (addr, r) in s.resources.iter_mut() {
                    if addresses.as_ref().map_or(true, |a| a.contains(addr)) {
                        r.status = status;
                    }
                }
            })
            .await;
        if let Err(e) = res {
            debug!(workspace = %self.workspace_id, error = %e, "state gone before status update");
        }
    }

    async fn reload(&self, task: &Task) -> Result<TaskSummary, PugError> {
        let parsed = parse_state(&task.output().snapshot())?;
        let serial = parsed.serial;

        if let Some(current) = self.states.find(self.workspace_id) {
            if current.serial == serial {
                self.set_status(ResourceStatus::Idle).await;
                debug!(workspace = %self.workspace_id, serial, "state unchanged");
                return Ok(TaskSummary::State {
                    serial,
                    changed: false,
                });
            }
        }

        let mut snapshot = StateSnapshot::from_parsed(self.workspace_id, self.module_id, parsed);
        if let Some(current) = self.states.find(self.workspace_id) {
            for (addr, r) in snapshot.resources.iter_mut() {
                if let Some(old) = current.resources.get(addr) {
                    r.id = old.id;
                }
            }
        }
        let count = snapshot.resources.len();
        self.states.add(snapshot).await;
        info!(workspace = %self.workspace_id, serial, resources = count, "reloaded state");
        Ok(TaskSummary::State {
            serial,
            changed: true,
        })
    }

    async fn apply(&self) -> Result<(), PugError> {
        let op = self.op.clone();
        self.states
            .update(self.workspace_id, move |s| match op {
                Op::Reload => {}
                Op::Taint(addr) => set_tainted(s, &addr, true),
                Op::Untaint(addr) => set_tainted(s, &addr, false),
                Op::Move { src, dest } => {
                    if let Some(mut r) = s.resources.remove(&src) {
                        r.address = dest.clone();
                        r.status = ResourceStatus::Idle;
                        s.resources.insert(dest, r);
                    }
                }
                Op::Remove(addrs) => {
                    for addr in addrs {
                        s.resources.remove(&addr);
                    }
                }
            })
            .await?;
        Ok(())
    }
}

fn set_tainted(s: &mut StateSnapshot, addr: &str, tainted: bool) {
    if let Some(r) = s.resources.get_mut(addr) {
        r.tainted = tainted;
        r.status = ResourceStatus::Idle;
    }
}

#[async_trait]
impl TaskHooks for StateHooks {
    async fn after_create(&self, _task: &Task) {
        self.set_status(self.op.status()).await;
    }

    async fn before_exited(&self, task: &Task) -> Result<Option<TaskSummary>, PugError> {
        match self.op {
            Op::Reload => self.reload(task).await.map(Some),
            _ => {
                self.apply().await?;
                Ok(None)
            }
        }
    }

    async fn after_errored(&self, _task: &Task) {
        self.set_status(ResourceStatus::Idle).await;
    }

    async fn after_canceled(&self, _task: &Task) {
        self.set_status(ResourceStatus::Idle).await;
    }
}
