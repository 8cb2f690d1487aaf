//! Commands into and output out of the coordinator actor.
//!
//! Everything that happens to the session core — a client request, the
//! provider's redirect completion, a store reply, a timer firing, a
//! dropped connection — arrives as a [`Command`] on one channel. That
//! single channel is what makes the coordinator a single logical thread:
//! no two state transitions ever interleave.
//!
//! Async results carry the [`OpId`] of the operation that issued them.
//! Handlers verify the id (and the expected state) before acting, which
//! is the whole stale-callback defense: a reply that arrives after its
//! operation died simply fails the check and is dropped.

use tokio::sync::mpsc;

use gatehouse_directory::{DirectoryError, Lookup, Record};
use gatehouse_identity::{ExternalIdentity, IdentityError};
use gatehouse_protocol::{
    AccountId, AvatarId, ClientMessage, ConnectionId, Directive, ServerMessage,
};

use crate::operation::OpId;

// ---------------------------------------------------------------------------
// Inbound commands
// ---------------------------------------------------------------------------

/// One event delivered to the coordinator actor.
#[derive(Debug)]
pub(crate) enum Command {
    /// A protocol message from a connection.
    Client {
        connection_id: ConnectionId,
        message: ClientMessage,
    },

    /// The transport lost a connection (clean close, drop, or the
    /// aftermath of an eject we issued).
    ConnectionLost { connection_id: ConnectionId },

    /// The external provider completed an authorization. `session_token`
    /// is the `state` parameter we embedded in the authorization URL.
    AuthorizationGranted {
        session_token: String,
        code: String,
    },

    /// The authorization window for an authenticate operation elapsed.
    AuthExpired {
        connection_id: ConnectionId,
        op: OpId,
    },

    /// Result of the provider code exchange.
    CodeExchanged {
        connection_id: ConnectionId,
        op: OpId,
        result: Result<String, IdentityError>,
    },

    /// Result of the provider identity fetch.
    IdentityFetched {
        connection_id: ConnectionId,
        op: OpId,
        result: Result<ExternalIdentity, IdentityError>,
    },

    /// Result of the account-store token lookup.
    TokenResolved {
        connection_id: ConnectionId,
        op: OpId,
        result: Result<Lookup, DirectoryError>,
    },

    /// Result of persisting a fresh account record.
    AccountCreated {
        connection_id: ConnectionId,
        op: OpId,
        result: Result<AccountId, DirectoryError>,
    },

    /// Result of durably mapping external identity → account id.
    MappingStored {
        connection_id: ConnectionId,
        op: OpId,
        result: Result<(), DirectoryError>,
    },

    /// Result of fetching an existing account during login.
    LoginAccountFetched {
        connection_id: ConnectionId,
        op: OpId,
        result: Result<Record, DirectoryError>,
    },

    /// Result of fetching the account record for an avatar operation.
    AccountFetched {
        account_id: AccountId,
        op: OpId,
        result: Result<Record, DirectoryError>,
    },

    /// Result of fetching one avatar record (list fan-in or activation
    /// target).
    AvatarFetched {
        account_id: AccountId,
        op: OpId,
        avatar_id: AvatarId,
        result: Result<Record, DirectoryError>,
    },

    /// Result of the optimistic slot-list update during avatar removal.
    AvatarsPersisted {
        account_id: AccountId,
        op: OpId,
        result: Result<(), DirectoryError>,
    },
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// What the coordinator emits toward the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A protocol reply for one connection.
    Message {
        connection_id: ConnectionId,
        message: ServerMessage,
    },

    /// A connection-control directive for the transport to execute.
    Control(Directive),
}

/// Channel sender carrying [`Outbound`] traffic to the transport layer.
pub type GatewaySender = mpsc::UnboundedSender<Outbound>;
