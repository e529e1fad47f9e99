//! Core types for pug.
//!
//! This crate provides the identifier and error-code types every other
//! pug crate depends on.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Foundation Layer                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  pug-types   : Id, Kind, Serial, ErrorCode         ◄── HERE  │
//! │  pug-event   : Event, Broker, Subscription                   │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Runtime Layer                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  pug-runtime : store, task engine, services, config          │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Application / Frontend Layers                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  pug-app     : PugApp wiring, AppError                       │
//! │  pug-cli     : headless `pug` binary                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Identifier Design
//!
//! Two flavours of identity exist side by side:
//!
//! - [`Id`]: a kind-tagged random UUID, used for linkage between
//!   entities and in log records.
//! - [`Serial`]: a monotonic counter from a [`SerialGenerator`], used
//!   wherever a deterministic order is needed (oldest task first).
//!
//! # Example
//!
//! ```
//! use pug_types::{Id, Kind, SerialGenerator};
//!
//! let module = Id::new(Kind::Module);
//! let task = Id::new(Kind::Task);
//! assert_ne!(module.kind(), task.kind());
//!
//! let serials = SerialGenerator::new();
//! assert!(serials.next() < serials.next());
//! ```

mod error;
mod id;
mod serial;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use id::{Id, Kind, ParseIdError};
pub use serial::{Serial, SerialGenerator};
