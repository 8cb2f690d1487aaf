//! In-memory reference backends.
//!
//! `MemoryAccountStore` and `MemoryRecordStore` keep everything in maps
//! behind a `Mutex`. They are the development backend and the test
//! double: tests seed them directly, including deliberately wrong-kind
//! records to exercise the type-validation paths.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use gatehouse_protocol::{AccountId, AvatarId};

use crate::account::{AccessLevel, Account, Avatar, Record};
use crate::store::{AccountStore, DirectoryError, Lookup, RecordStore};

// ---------------------------------------------------------------------------
// MemoryAccountStore
// ---------------------------------------------------------------------------

/// Access grants recorded per external identity.
#[derive(Debug, Clone)]
struct Grant {
    account_id: Option<AccountId>,
    access_level: AccessLevel,
}

/// Token → identity resolution backed by a plain map.
///
/// Under the direct-token scheme the play token IS the external identity,
/// so `lookup` answers for any token: unknown tokens resolve to "no
/// account yet" with the default access level, which is exactly the
/// first-login path.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    grants: Mutex<HashMap<String, Grant>>,
}

impl MemoryAccountStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-grants an access level to an identity (e.g. staff accounts in
    /// a dev deployment).
    pub fn grant_access(&self, external_id: &str, access_level: AccessLevel) {
        let mut grants = self.grants.lock().expect("grants lock poisoned");
        grants
            .entry(external_id.to_string())
            .or_insert(Grant { account_id: None, access_level: AccessLevel::User })
            .access_level = access_level;
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn lookup(&self, play_token: &str) -> Result<Lookup, DirectoryError> {
        if play_token.is_empty() {
            return Err(DirectoryError::TokenRejected("empty play token".into()));
        }
        let grants = self.grants.lock().expect("grants lock poisoned");
        let grant = grants.get(play_token);
        Ok(Lookup {
            account_id: grant.and_then(|g| g.account_id),
            external_id: play_token.to_string(),
            access_level: grant.map_or(AccessLevel::User, |g| g.access_level),
        })
    }

    async fn store_mapping(
        &self,
        external_id: &str,
        account_id: AccountId,
    ) -> Result<(), DirectoryError> {
        let mut grants = self.grants.lock().expect("grants lock poisoned");
        grants
            .entry(external_id.to_string())
            .or_insert(Grant { account_id: None, access_level: AccessLevel::User })
            .account_id = Some(account_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryRecordStore
// ---------------------------------------------------------------------------

/// Record storage backed by a plain map over a shared id space.
///
/// Ids are assigned from a monotonic counter starting above zero so the
/// empty-slot placeholder id is never handed out.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<u64, Record>>,
    next_id: AtomicU64,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1000),
        }
    }

    /// Seeds an avatar record, assigning it an id. Test/dev helper — in
    /// production avatars are created by the avatar-creation service.
    pub fn seed_avatar(&self, account_id: AccountId, name: &str) -> AvatarId {
        let id = AvatarId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let avatar = Avatar {
            avatar_id: id,
            account_id,
            name: name.to_string(),
            wish_name: None,
        };
        let mut records = self.records.lock().expect("records lock poisoned");
        records.insert(id.0, Record::Avatar(avatar));
        id
    }

    /// Stores an arbitrary record under an explicit id, overwriting any
    /// existing one. Lets tests plant wrong-kind records.
    pub fn seed_record(&self, id: u64, record: Record) {
        let mut records = self.records.lock().expect("records lock poisoned");
        records.insert(id, record);
    }

    /// Direct read-back for assertions.
    pub fn snapshot_account(&self, account_id: AccountId) -> Option<Account> {
        let records = self.records.lock().expect("records lock poisoned");
        match records.get(&account_id.0) {
            Some(Record::Account(a)) => Some(a.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_account(
        &self,
        mut account: Account,
    ) -> Result<AccountId, DirectoryError> {
        let id = AccountId(self.next_id.fetch_add(1, Ordering::Relaxed));
        account.account_id = id;
        let mut records = self.records.lock().expect("records lock poisoned");
        records.insert(id.0, Record::Account(account));
        Ok(id)
    }

    async fn fetch_account(
        &self,
        account_id: AccountId,
    ) -> Result<Record, DirectoryError> {
        let records = self.records.lock().expect("records lock poisoned");
        records
            .get(&account_id.0)
            .cloned()
            .ok_or(DirectoryError::NotFound(account_id.0))
    }

    async fn fetch_avatar(
        &self,
        avatar_id: AvatarId,
    ) -> Result<Record, DirectoryError> {
        let records = self.records.lock().expect("records lock poisoned");
        records
            .get(&avatar_id.0)
            .cloned()
            .ok_or(DirectoryError::NotFound(avatar_id.0))
    }

    async fn update_avatars(
        &self,
        account_id: AccountId,
        expected_slots: &[AvatarId],
        new_slots: &[AvatarId],
        removed: &[crate::RemovedAvatar],
    ) -> Result<(), DirectoryError> {
        let mut records = self.records.lock().expect("records lock poisoned");
        let record = records
            .get_mut(&account_id.0)
            .ok_or(DirectoryError::NotFound(account_id.0))?;
        let Record::Account(account) = record else {
            return Err(DirectoryError::NotFound(account_id.0));
        };
        if account.avatar_slots != expected_slots {
            return Err(DirectoryError::PreconditionFailed(account_id.0));
        }
        account.avatar_slots = new_slots.to_vec();
        account.removed_avatars = removed.to_vec();
        Ok(())
    }

    async fn stamp_last_login(
        &self,
        account_id: AccountId,
        at: u64,
    ) -> Result<(), DirectoryError> {
        let mut records = self.records.lock().expect("records lock poisoned");
        if let Some(Record::Account(account)) = records.get_mut(&account_id.0) {
            account.last_login_at = at;
        }
        Ok(())
    }
}

// =========================================================================
// Tests
// =========================================================================
