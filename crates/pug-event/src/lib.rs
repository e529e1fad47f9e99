//! Event system for pug.
//!
//! This crate provides the entity event type and the broker that fans
//! events out from the stores to the scheduler, the log enricher and
//! any frontend.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Foundation Layer                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  pug-types   : Id, Kind, Serial, ErrorCode                   │
//! │  pug-event   : Event, Broker, Subscription         ◄── HERE  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Event Flow
//!
//! ```text
//!   Table<Task>::update ──► Broker<Task>::publish
//!                                 │
//!            ┌────────────────────┼───────────────────┐
//!            ▼                    ▼                   ▼
//!       Scheduler            Log enricher         Frontend
//!   (pending → queued)    (resolve references)   (render rows)
//! ```
//!
//! # Delivery Guarantees
//!
//! | Property | Guarantee |
//! |----------|-----------|
//! | Ordering | Each subscriber sees events in publish order |
//! | Loss | Never: a full queue blocks the publisher |
//! | Visibility | Only events published after `subscribe` returns |
//! | Shutdown | Waits for in-flight deliveries, then closes channels |
//!
//! Events carry the post-image of the entity, so a subscriber never has
//! to read back from the store to learn what changed.

mod broker;
mod event;

pub use broker::{Broker, Subscription, DEFAULT_BUFFER};
pub use event::{Event, EventKind};
