//! Pug Application Layer.
//!
//! This crate provides:
//!
//! - **PugApp**: every service, the scheduler and the runner wired over
//!   one set of tables and one shutdown token
//! - **AppError**: Unified application-level error type
//! - **CliOverrides**: the highest-priority configuration layer
//! - **Re-exports**: Convenient access to the types a frontend needs
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Foundation Layer                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  pug-types, pug-event                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Runtime Layer                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  pug-runtime (task engine, services, logging, config)        │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Application Layer  ◄── HERE                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  pug-app (PugApp + AppError)                                 │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Frontend Layer                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  pug-cli (uses AppError → anyhow/eprintln)                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Error Handling Strategy
//!
//! ```text
//! Internal Errors (PugError, ConfigError, io::Error)
//!                    ↓ From impl
//!               AppError (this crate)
//!                    ↓ anyhow::Error / eprintln
//!               CLI output
//! ```

mod app;
mod cli_overrides;
mod error;

pub use app::{PugApp, PugAppBuilder};
pub use cli_overrides::CliOverrides;
pub use error::AppError;

pub use pug_runtime::logging::{Attr, AttrValue, EntityLayer, LogRecord, LogSource};
pub use pug_runtime::module::{Module, ReloadSummary, Tri};
pub use pug_runtime::plan::{Plan, PlanOptions};
pub use pug_runtime::state::{Resource, StateSnapshot};
pub use pug_runtime::task::{Report, Task, TaskKind, TaskState, TaskSummary};
pub use pug_runtime::workspace::Workspace;
pub use pug_runtime::{strip_ansi, ConfigError, ConfigLoader, ConfigResolver, PugConfig, PugError};
pub use pug_types::{ErrorCode, Id, Kind};
