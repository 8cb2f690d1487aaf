//! # Gatehouse
//!
//! Session-establishment and account-resolution authority for multiplayer
//! game backends.
//!
//! Gatehouse decides, per incoming connection, how the holder proves
//! identity (direct play token or external OAuth2), resolves that
//! identity to a persistent account (creating one on first login), and
//! manages which avatar the connection may activate — while guaranteeing
//! at most one in-flight operation per connection and per account.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use gatehouse::GatehouseBuilder;
//!
//! # async fn run() -> Result<(), gatehouse::GatehouseError> {
//! let (authority, mut outbound) = GatehouseBuilder::from_env().build().await?;
//!
//! // Wire `authority` (the handle) into your transport layer:
//! //   - forward decoded client messages via `authority.deliver(...)`
//! //   - forward provider redirects via `authority.authorization_granted(...)`
//! //   - forward disconnects via `authority.connection_lost(...)`
//! // and execute everything arriving on `outbound`.
//! # let _ = outbound.recv().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod service;
mod telemetry;

pub use error::GatehouseError;
pub use service::{GatehouseBuilder, StoreBackend};
pub use telemetry::init_tracing;

pub use gatehouse_protocol as protocol;
pub use gatehouse_session::{CoordinatorHandle, Outbound};
