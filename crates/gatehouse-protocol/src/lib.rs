//! Protocol layer for Gatehouse.
//!
//! This crate defines the "language" spoken at the two boundaries of the
//! session core:
//!
//! - **Types** ([`ConnectionId`], [`AccountId`], [`AvatarId`], [`Channel`],
//!   [`CompositeId`]) — the identities that every other layer keys on.
//! - **Messages** ([`ClientMessage`], [`ServerMessage`]) — what connections
//!   send to the authority service and what it replies.
//! - **Directives** ([`Directive`]) — the connection-control orders the
//!   service issues to the transport/message-bus layer (eject, bind,
//!   elevate, grant ownership, ...).
//!
//! # Architecture
//!
//! The protocol layer knows nothing about accounts, operations, or HTTP —
//! it only defines shapes. The session layer consumes and produces these;
//! the transport layer (external to this workspace) carries them.
//!
//! ```text
//! Transport (bytes) → Protocol (messages/directives) → Session (operations)
//! ```

mod directive;
mod messages;
mod types;

pub use directive::{Clearance, Directive, eject_code};
pub use messages::{
    AuthScheme, AvatarEntry, ClientMessage, NameReview, ServerMessage,
};
pub use types::{
    AVATAR_SLOTS, AccountId, AvatarId, Channel, CompositeId, ConnectionId,
};
