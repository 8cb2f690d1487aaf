//! Connection-control directives issued to the transport boundary.
//!
//! The session core never touches sockets or bus channels directly. It
//! expresses every effect on a connection's lifecycle as a [`Directive`]
//! and hands it to the transport layer to execute. This keeps the core
//! testable: a test sinks directives into a channel and asserts on them.

use serde::{Deserialize, Serialize};

use crate::{AvatarId, Channel, CompositeId, ConnectionId};

// ---------------------------------------------------------------------------
// Clearance levels
// ---------------------------------------------------------------------------

/// How much of the protocol a connection is allowed to speak.
///
/// Fresh connections are sandboxed to the pre-login subset; a successful
/// login lifts the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Clearance {
    /// Pre-login sandbox: only auth-scheme and login requests.
    Anonymous,
    /// Fully established: account and avatar operations permitted.
    Established,
}

// ---------------------------------------------------------------------------
// Directives
// ---------------------------------------------------------------------------

/// One order to the transport/message-bus layer.
///
/// Directives are fire-and-forget from the core's perspective; the
/// transport executes them in the order received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Directive {
    /// Disconnect a connection with a reason code and human-readable text.
    Eject {
        connection_id: ConnectionId,
        code: u16,
        reason: String,
    },

    /// Subscribe a connection to a bus channel.
    BindChannel {
        connection_id: ConnectionId,
        channel: Channel,
    },

    /// Unsubscribe a connection from a bus channel.
    UnbindChannel {
        connection_id: ConnectionId,
        channel: Channel,
    },

    /// Install a connection's composite sender identity.
    SetIdentity {
        connection_id: ConnectionId,
        identity: CompositeId,
    },

    /// Raise (or reset) a connection's protocol clearance.
    ElevateState {
        connection_id: ConnectionId,
        clearance: Clearance,
    },

    /// Generate an avatar object server-side with the given access level.
    ActivateObject {
        avatar_id: AvatarId,
        access_level: u16,
    },

    /// Unload an avatar object server-side.
    UnloadObject { avatar_id: AvatarId },

    /// Give a connection ownership of an avatar object.
    GrantOwnership {
        avatar_id: AvatarId,
        connection_id: ConnectionId,
    },

    /// Mark an avatar as a connection's primary session subject, so the
    /// transport tears it down if the connection is lost.
    AddSessionObject {
        connection_id: ConnectionId,
        avatar_id: AvatarId,
    },

    /// Remove a session-subject marking.
    RemoveSessionObject {
        connection_id: ConnectionId,
        avatar_id: AvatarId,
    },

    /// Tell presence tracking an avatar came online.
    AnnounceOnline { avatar_id: AvatarId },

    /// Tell presence tracking an avatar went offline.
    AnnounceOffline { avatar_id: AvatarId },

    /// Best-effort notice to presence/estate subsystems that an avatar
    /// was removed from its account.
    AnnounceRemoved { avatar_id: AvatarId },
}

// ---------------------------------------------------------------------------
// Eject reason codes
// ---------------------------------------------------------------------------

/// Reason codes carried by [`Directive::Eject`].
///
/// HTTP-style conventions: 4xx for things the client did wrong, 5xx for
/// failures on our side.
pub mod eject_code {
    /// Protocol violation: malformed or out-of-order request.
    pub const VIOLATION: u16 = 400;
    /// Login attempted under the wrong authentication scheme.
    pub const WRONG_SCHEME: u16 = 401;
    /// The authorization window expired.
    pub const TIMED_OUT: u16 = 408;
    /// Duplicate operation for a subject that already has one in flight.
    pub const DUPLICATE_OPERATION: u16 = 409;
    /// The account logged in from another connection.
    pub const LOGGED_IN_ELSEWHERE: u16 = 440;
    /// An external dependency (provider, database) failed; try again later.
    pub const DEPENDENCY_FAILURE: u16 = 500;
    /// Data-integrity failure requiring manual repair.
    pub const DATA_INTEGRITY: u16 = 507;
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccountId;

    #[test]
    fn test_directive_eject_json_format() {
        let d = Directive::Eject {
            connection_id: ConnectionId(9),
            code: eject_code::DUPLICATE_OPERATION,
            reason: "operation already underway".into(),
        };
        let json: serde_json::Value = serde_json::to_value(&d).unwrap();

        assert_eq!(json["Eject"]["connection_id"], 9);
        assert_eq!(json["Eject"]["code"], 409);
        assert_eq!(json["Eject"]["reason"], "operation already underway");
    }

    #[test]
    fn test_directive_bind_channel_round_trip() {
        let d = Directive::BindChannel {
            connection_id: ConnectionId(1),
            channel: Channel::for_account(AccountId(42)),
        };
        let bytes = serde_json::to_vec(&d).unwrap();
        let decoded: Directive = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(d, decoded);
    }

    #[test]
    fn test_directive_set_identity_round_trip() {
        let d = Directive::SetIdentity {
            connection_id: ConnectionId(1),
            identity: CompositeId::with_avatar(AccountId(4), AvatarId(8)),
        };
        let bytes = serde_json::to_vec(&d).unwrap();
        let decoded: Directive = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(d, decoded);
    }

    #[test]
    fn test_clearance_serializes_by_name() {
        let json = serde_json::to_string(&Clearance::Established).unwrap();
        assert_eq!(json, "\"Established\"");
    }
}
