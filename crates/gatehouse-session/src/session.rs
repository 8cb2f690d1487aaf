//! Per-connection session records.
//!
//! The coordinator keeps one of these per live connection: what the
//! connection has proven so far (the identity ladder), and which
//! compensation directives must fire if the connection is lost.

use gatehouse_protocol::{AccountId, AvatarId, Directive};

// ---------------------------------------------------------------------------
// Identity ladder
// ---------------------------------------------------------------------------

/// What a connection has proven so far.
///
/// ```text
///   Anonymous ──(login)──→ Account ──(activate)──→ Avatar
///                             ↑                       │
///                             └─────(deactivate)──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Identity {
    /// Nothing proven; sandboxed to pre-login requests.
    Anonymous,
    /// Logged in, no avatar active.
    Account(AccountId),
    /// Logged in with an active avatar.
    Avatar {
        account_id: AccountId,
        avatar_id: AvatarId,
    },
}

impl Identity {
    /// The bound account, if past anonymous.
    pub(crate) fn account_id(&self) -> Option<AccountId> {
        match self {
            Identity::Anonymous => None,
            Identity::Account(id) => Some(*id),
            Identity::Avatar { account_id, .. } => Some(*account_id),
        }
    }

    pub(crate) fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }
}

// ---------------------------------------------------------------------------
// ConnectionSession
// ---------------------------------------------------------------------------

/// The coordinator's record of one live connection.
#[derive(Debug)]
pub(crate) struct ConnectionSession {
    /// Current rung on the identity ladder.
    pub(crate) identity: Identity,

    /// Compensation directives armed for connection loss (avatar
    /// force-unload, presence offline). Flushed in arming order by the
    /// disconnect handler; cleared piecewise by an orderly deactivation.
    pub(crate) on_disconnect: Vec<Directive>,
}

impl ConnectionSession {
    pub(crate) fn new() -> ConnectionSession {
        ConnectionSession {
            identity: Identity::Anonymous,
            on_disconnect: Vec::new(),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_account_id_per_rung() {
        assert_eq!(Identity::Anonymous.account_id(), None);
        assert_eq!(
            Identity::Account(AccountId(4)).account_id(),
            Some(AccountId(4))
        );
        assert_eq!(
            Identity::Avatar { account_id: AccountId(4), avatar_id: AvatarId(9) }
                .account_id(),
            Some(AccountId(4))
        );
    }

    #[test]
    fn test_new_session_is_anonymous_with_no_compensation() {
        let session = ConnectionSession::new();
        assert!(session.identity.is_anonymous());
        assert!(session.on_disconnect.is_empty());
    }
}
