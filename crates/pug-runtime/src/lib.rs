//! Pug runtime: the task engine and the terraform services built on it.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Foundation Layer                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  pug-types   : Id, Kind, Serial, ErrorCode                   │
//! │  pug-event   : Event, Broker, Subscription                   │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Runtime Layer (THIS CRATE)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  store/     : Table<T>, the event-publishing entity store    │
//! │  task/      : Task, TaskService, Scheduler, Runner           │
//! │  module/    : discovery, Terragrunt graph, init/fmt/validate │
//! │  workspace/ : list/select/new/delete                         │
//! │  plan/      : plan artefacts, apply, reports                 │
//! │  state/     : state snapshots and resource commands          │
//! │  logging/   : tracing layer storing enriched log records     │
//! │  config/    : PugConfig and its layered loader               │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Application / Frontend Layers                   │
//! │  (pug-app: PugApp wiring, pug-cli: `pug` binary)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # How Work Flows
//!
//! Services never run commands themselves. They submit a
//! [`TaskSpec`](task::TaskSpec) to the [`TaskService`](task::TaskService)
//! along with [`TaskHooks`](task::TaskHooks) that read the task's output
//! and update their own tables once it finishes:
//!
//! ```text
//! WorkspaceService::select ──► TaskService::create ──► pending
//!                                                         │ Scheduler
//!                                                         ▼
//!                                                      queued
//!                                                         │ Runner
//!                                                         ▼
//!                        hooks ◄── exited/errored ◄── running
//! ```
//!
//! Every table publishes its changes through a
//! [`Broker`](pug_event::Broker); the scheduler and the workspace
//! watcher react to those events.

pub mod config;
mod error;
pub mod logging;
pub mod module;
pub mod output;
pub mod plan;
pub mod state;
pub mod store;
pub mod task;
mod text;
pub mod tfjson;
pub mod workspace;

pub use config::{ConfigError, ConfigLoader, ConfigResolver, PugConfig};
pub use error::PugError;
pub use output::OutputBuffer;
pub use store::{Entity, Table};
pub use text::strip_ansi;
