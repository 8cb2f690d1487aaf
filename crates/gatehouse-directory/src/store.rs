//! Store contracts and directory errors.
//!
//! Two seams, two traits:
//!
//! - [`AccountStore`] answers "who does this play token belong to?" and
//!   durably records the external-identity → account-id mapping. This is
//!   the piece deployments swap (memory, file, document store).
//! - [`RecordStore`] is the object-database boundary: account and avatar
//!   records live there, fetched and updated by id.
//!
//! Both are `#[async_trait]` so backends are runtime-selectable behind
//! `Arc<dyn ...>`, and both may be remote with arbitrary latency — the
//! session core never blocks on them, it suspends an operation and
//! resumes on the reply.

use async_trait::async_trait;

use gatehouse_protocol::{AccountId, AvatarId};

use crate::account::{AccessLevel, Account, Record};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by directory backends.
///
/// The reason strings are user-facing — operations forward them verbatim
/// in eject directives.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The backend rejected the token (banned, malformed, unknown realm).
    #[error("token rejected: {0}")]
    TokenRejected(String),

    /// No record exists for the requested id.
    #[error("record {0} not found")]
    NotFound(u64),

    /// An optimistic-precondition update found the record changed
    /// underneath it.
    #[error("record {0} was modified concurrently")]
    PreconditionFailed(u64),

    /// The backend itself failed (I/O, network, storage engine).
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// AccountStore
// ---------------------------------------------------------------------------

/// A successful token resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// The existing account, or `None` when no account has been created
    /// for this identity yet (the caller creates one).
    pub account_id: Option<AccountId>,
    /// The canonical external identity for the token.
    pub external_id: String,
    /// Authorization tier the backend grants this identity.
    pub access_level: AccessLevel,
}

/// Resolves play tokens to account identity and persists the mapping.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Resolves a play token.
    ///
    /// # Errors
    /// [`DirectoryError::TokenRejected`] when the token is invalid;
    /// [`DirectoryError::Unavailable`] when the backend cannot answer.
    async fn lookup(&self, play_token: &str) -> Result<Lookup, DirectoryError>;

    /// Durably associates an external identity with a newly created
    /// account id. Subsequent lookups for the identity must return it.
    async fn store_mapping(
        &self,
        external_id: &str,
        account_id: AccountId,
    ) -> Result<(), DirectoryError>;
}

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// The object-database boundary holding account and avatar records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persists a new account record and assigns its id.
    async fn create_account(
        &self,
        account: Account,
    ) -> Result<AccountId, DirectoryError>;

    /// Fetches the record stored under an account id. Callers must
    /// validate the [`Record`] variant.
    async fn fetch_account(
        &self,
        account_id: AccountId,
    ) -> Result<Record, DirectoryError>;

    /// Fetches the record stored under an avatar id. Callers must
    /// validate the [`Record`] variant.
    async fn fetch_avatar(
        &self,
        avatar_id: AvatarId,
    ) -> Result<Record, DirectoryError>;

    /// Replaces an account's slot list and removed-avatar history, but
    /// only if the stored slot list still equals `expected_slots`.
    ///
    /// # Errors
    /// [`DirectoryError::PreconditionFailed`] on a mismatch — the caller
    /// treats this as a data fault, not a retry.
    async fn update_avatars(
        &self,
        account_id: AccountId,
        expected_slots: &[AvatarId],
        new_slots: &[AvatarId],
        removed: &[crate::RemovedAvatar],
    ) -> Result<(), DirectoryError>;

    /// Stamps the account's last-login time. Fire-and-forget from the
    /// caller's perspective; failures are logged, not fatal.
    async fn stamp_last_login(
        &self,
        account_id: AccountId,
        at: u64,
    ) -> Result<(), DirectoryError>;
}
