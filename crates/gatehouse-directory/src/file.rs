//! File-backed account store.
//!
//! The single-host "developer" backend: one JSON document holding every
//! external-identity grant. The whole map is held in memory and rewritten
//! on change via a temp-file rename, so a crash mid-write never leaves a
//! torn document behind.
//!
//! Not suitable for multi-host deployments — there is no cross-process
//! locking. That is what the document-store backend is for.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use gatehouse_protocol::AccountId;

use crate::account::AccessLevel;
use crate::store::{AccountStore, DirectoryError, Lookup};

/// One persisted grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileGrant {
    /// The mapped account, if one has been created.
    account_id: Option<AccountId>,
    /// Authorization tier for the identity.
    access_level: AccessLevel,
}

/// Account store persisted as a single JSON file.
pub struct FileAccountStore {
    path: PathBuf,
    grants: Mutex<HashMap<String, FileGrant>>,
}

impl FileAccountStore {
    /// Opens the store at `path`, loading any existing document. A
    /// missing file starts empty; a malformed one is an error (refusing
    /// to silently discard account mappings).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let path = path.as_ref().to_path_buf();
        let grants = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                DirectoryError::Unavailable(format!(
                    "malformed account file {}: {e}",
                    path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(DirectoryError::Unavailable(format!(
                    "cannot read account file {}: {e}",
                    path.display()
                )));
            }
        };
        tracing::info!(
            path = %path.display(),
            identities = grants.len(),
            "file account store opened"
        );
        Ok(Self { path, grants: Mutex::new(grants) })
    }

    /// Writes the full document to a sibling temp file, then renames it
    /// over the real one. Callers must hold the grants lock.
    async fn persist(
        &self,
        grants: &HashMap<String, FileGrant>,
    ) -> Result<(), DirectoryError> {
        let bytes = serde_json::to_vec_pretty(grants)
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await.map_err(|e| {
            DirectoryError::Unavailable(format!(
                "cannot write {}: {e}",
                tmp.display()
            ))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            DirectoryError::Unavailable(format!(
                "cannot replace {}: {e}",
                self.path.display()
            ))
        })
    }
}

#[async_trait]
impl AccountStore for FileAccountStore {
    async fn lookup(&self, play_token: &str) -> Result<Lookup, DirectoryError> {
        if play_token.is_empty() {
            return Err(DirectoryError::TokenRejected("empty play token".into()));
        }
        let grants = self.grants.lock().await;
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
        let mut grants = self.grants.lock().await;
        grants
            .entry(external_id.to_string())
            .or_insert(FileGrant {
                account_id: None,
                access_level: AccessLevel::User,
            })
            .account_id = Some(account_id);
        self.persist(&grants).await
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn store_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("accounts.json")
    }

    #[tokio::test]
    async fn test_open_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileAccountStore::open(store_path(&dir)).await.unwrap();

        let lookup = store.lookup("alice").await.unwrap();
        assert_eq!(lookup.account_id, None);
    }

    #[tokio::test]
    async fn test_store_mapping_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);

        {
            let store = FileAccountStore::open(&path).await.unwrap();
            store.store_mapping("alice", AccountId(7)).await.unwrap();
        }

        let reopened = FileAccountStore::open(&path).await.unwrap();
        let lookup = reopened.lookup("alice").await.unwrap();
        assert_eq!(lookup.account_id, Some(AccountId(7)));
    }

    #[tokio::test]
    async fn test_open_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);
        tokio::fs::write(&path, b"not json").await.unwrap();

        let result = FileAccountStore::open(&path).await;

        assert!(matches!(result, Err(DirectoryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_no_tmp_file_left_behind_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(&dir);
        let store = FileAccountStore::open(&path).await.unwrap();

        store.store_mapping("alice", AccountId(1)).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }
}
