//! Session establishment and account resolution for Gatehouse.
//!
//! This crate is the authority core. It decides, per connection, how the
//! holder proves identity, resolves that identity to an account (creating
//! one on first login), and manages which avatar the connection may
//! activate. Everything revolves around three rules:
//!
//! 1. **One operation per subject.** A connection or an account has at
//!    most one in-flight operation at any instant. Duplicates are
//!    ejected at admission, never queued.
//! 2. **One thread of control.** The [`Coordinator`] is a single Tokio
//!    task; every external event (client message, provider callback,
//!    store reply, timer) re-enters through its command channel.
//! 3. **Failure is a transition.** Operations never surface errors to
//!    callers — every failure path ends in an eject directive with a
//!    human-readable reason.
//!
//! # How it fits in the stack
//!
//! ```text
//! Transport layer (external)  ← executes directives, delivers messages
//!     ↕
//! Session layer (this crate)  ← operations, exclusivity, kill semantics
//!     ↕
//! Directory + identity layers ← token resolution, records, OAuth exchange
//! ```

mod avatar;
mod command;
mod config;
mod coordinator;
mod error;
mod operation;
mod session;

pub use command::{GatewaySender, Outbound};
pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, CoordinatorHandle};
pub use error::SessionError;
