//! Operation state machines.
//!
//! An operation is one in-flight multi-step task bound to exactly one
//! connection (authenticate, login) or one account (avatar operations).
//! Each subtype carries a closed state enum; transitions are explicit
//! `match` arms in the coordinator, so an illegal transition is simply
//! unwritable.
//!
//! Operations are ephemeral: created at admission, dropped at retirement.
//! There is no terminal state value — "terminal" is the removal of the
//! map entry, which the coordinator performs in the same logical step as
//! the final transition.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::fmt;

use gatehouse_directory::{AccessLevel, Account};
use gatehouse_identity::ExternalIdentity;
use gatehouse_protocol::{AccountId, AvatarId, ConnectionId};

/// Counter for generating unique operation ids.
static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one operation instance.
///
/// Every async result carries the id of the operation that issued it;
/// a mismatch on delivery marks the result stale. Ids are never reused,
/// so a connection id being recycled can't resurrect a dead operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OpId(u64);

impl OpId {
    /// Allocates the next operation id.
    pub(crate) fn next() -> OpId {
        OpId(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Operation envelope
// ---------------------------------------------------------------------------

/// One registered operation: its identity plus subtype payload.
#[derive(Debug)]
pub(crate) struct Operation {
    pub(crate) id: OpId,
    pub(crate) kind: OperationKind,
}

impl Operation {
    pub(crate) fn new(kind: OperationKind) -> Operation {
        Operation { id: OpId::next(), kind }
    }

    /// Short label for logging.
    pub(crate) fn label(&self) -> &'static str {
        match &self.kind {
            OperationKind::Authenticate(_) => "authenticate",
            OperationKind::Login(_) => "login",
            OperationKind::Avatar(op) => op.intent.label(),
        }
    }
}

/// The subtype payloads.
#[derive(Debug)]
pub(crate) enum OperationKind {
    /// OAuth2 exchange against the external provider.
    Authenticate(AuthenticateOp),
    /// Play-token → account resolution/creation.
    Login(LoginOp),
    /// Account-targeted avatar operation.
    Avatar(AvatarOp),
}

// ---------------------------------------------------------------------------
// Authenticate
// ---------------------------------------------------------------------------

/// States of the OAuth2 exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthenticateState {
    /// Waiting for the out-of-band authorization to complete.
    Start,
    /// Code exchange in flight at the provider.
    RetrieveToken,
    /// Identity fetch in flight at the provider.
    RetrieveInformation,
    /// Identity recorded; parked until login consumes it.
    GotInformation,
}

/// The authenticate operation.
#[derive(Debug)]
pub(crate) struct AuthenticateOp {
    /// Single-use correlation token; rides as the provider's `state`
    /// parameter and keys the coordinator's waiter map.
    pub(crate) session_token: String,
    pub(crate) state: AuthenticateState,
    /// Set once the provider confirms who the holder is.
    pub(crate) identity: Option<ExternalIdentity>,
}

impl AuthenticateOp {
    pub(crate) fn new(session_token: String) -> AuthenticateOp {
        AuthenticateOp {
            session_token,
            state: AuthenticateState::Start,
            identity: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

/// States of account resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoginState {
    /// Token lookup in flight at the account store.
    QueryAccountDb,
    /// Fresh account record being persisted.
    CreateAccount,
    /// External-identity → account-id mapping being persisted.
    StoreAccountId,
    /// Existing account record being fetched.
    RetrieveAccount,
}

/// The login operation.
#[derive(Debug)]
pub(crate) struct LoginOp {
    pub(crate) state: LoginState,
    /// Canonical external identity, filled in by the lookup.
    pub(crate) external_id: String,
    /// Access tier granted by the lookup.
    pub(crate) access_level: AccessLevel,
    /// The resolved or newly created account.
    pub(crate) account_id: Option<AccountId>,
}

impl LoginOp {
    pub(crate) fn new() -> LoginOp {
        LoginOp {
            state: LoginState::QueryAccountDb,
            external_id: String::new(),
            access_level: AccessLevel::User,
            account_id: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Avatar operations
// ---------------------------------------------------------------------------

/// What an account-targeted operation is trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AvatarIntent {
    /// Compile and send the avatar list.
    List,
    /// Remove an avatar, then refresh the list.
    Remove { avatar_id: AvatarId },
    /// Activate an avatar for play.
    Activate { avatar_id: AvatarId },
}

impl AvatarIntent {
    fn label(&self) -> &'static str {
        match self {
            AvatarIntent::List => "list-avatars",
            AvatarIntent::Remove { .. } => "remove-avatar",
            AvatarIntent::Activate { .. } => "activate-avatar",
        }
    }
}

/// States shared by the avatar operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AvatarState {
    /// Account record fetch in flight.
    RetrieveAccount,
    /// Per-slot avatar fetches in flight (list fan-in).
    QueryAvatars,
    /// Optimistic slot-list update in flight (removal).
    ProcessRemove,
    /// Activation-target avatar fetch in flight.
    GetTargetAvatar,
}

/// An account-targeted avatar operation.
///
/// All three intents start in `RetrieveAccount`; the fetched account is
/// kept on the operation because later steps need its creation time,
/// access level, and removal history.
#[derive(Debug)]
pub(crate) struct AvatarOp {
    /// The connection driving this operation.
    pub(crate) connection_id: ConnectionId,
    pub(crate) intent: AvatarIntent,
    pub(crate) state: AvatarState,
    /// Sanitized slot list (exactly `AVATAR_SLOTS` entries) once the
    /// account is loaded.
    pub(crate) slots: Vec<AvatarId>,
    /// The loaded account record.
    pub(crate) account: Option<Account>,
    /// Outstanding fetches during the list fan-in.
    pub(crate) pending: HashSet<AvatarId>,
    /// Avatars collected so far during the list fan-in.
    pub(crate) fetched: Vec<gatehouse_directory::Avatar>,
}

impl AvatarOp {
    pub(crate) fn new(connection_id: ConnectionId, intent: AvatarIntent) -> AvatarOp {
        AvatarOp {
            connection_id,
            intent,
            state: AvatarState::RetrieveAccount,
            slots: Vec::new(),
            account: None,
            pending: HashSet::new(),
            fetched: Vec::new(),
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
    fn test_op_ids_are_unique() {
        let a = OpId::next();
        let b = OpId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_new_operation_starts_in_initial_state() {
        let auth = AuthenticateOp::new("tok".into());
        assert_eq!(auth.state, AuthenticateState::Start);
        assert!(auth.identity.is_none());

        let login = LoginOp::new();
        assert_eq!(login.state, LoginState::QueryAccountDb);
        assert!(login.account_id.is_none());

        let avatar = AvatarOp::new(ConnectionId(1), AvatarIntent::List);
        assert_eq!(avatar.state, AvatarState::RetrieveAccount);
        assert!(avatar.pending.is_empty());
    }

    #[test]
    fn test_operation_labels() {
        assert_eq!(
            Operation::new(OperationKind::Login(LoginOp::new())).label(),
            "login"
        );
        assert_eq!(
            Operation::new(OperationKind::Avatar(AvatarOp::new(
                ConnectionId(1),
                AvatarIntent::Remove { avatar_id: AvatarId(2) },
            )))
            .label(),
            "remove-avatar"
        );
    }
}
