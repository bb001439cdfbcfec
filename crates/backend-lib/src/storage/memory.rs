// ============================
// crates/backend-lib/src/storage/memory.rs
// ============================
//! In-process storage backend.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keygate_common::AccountId;
use parking_lot::{Mutex, RwLock};

use super::{AccountStore, AuditLog, TokenStore, TokenTable};
use crate::error::StorageError;
use crate::models::{
    Account, CredentialRecord, LiveToken, LoginAuditEntry, NewAccount, ProfileUpdate,
};

#[derive(Default)]
struct AccountTable {
    accounts: HashMap<AccountId, Account>,
    credentials: HashMap<AccountId, CredentialRecord>,
    usernames: HashMap<String, AccountId>,
    next_id: AccountId,
}

#[derive(Default)]
struct Inner {
    accounts: RwLock<AccountTable>,
    tokens: RwLock<TokenTable>,
    audit: Mutex<Vec<LoginAuditEntry>>,
}

/// Storage kept entirely in memory. Cloning shares the same data.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the audit log in append order
    pub fn audit_entries(&self) -> Vec<LoginAuditEntry> {
        self.inner.audit.lock().clone()
    }
}

#[async_trait]
impl AccountStore for MemoryStorage {
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StorageError> {
        let table = self.inner.accounts.read();
        Ok(table
            .usernames
            .get(username)
            .and_then(|id| table.accounts.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StorageError> {
        Ok(self.inner.accounts.read().accounts.get(&id).cloned())
    }

    async fn find_credential(
        &self,
        username: &str,
    ) -> Result<Option<CredentialRecord>, StorageError> {
        let table = self.inner.accounts.read();
        Ok(table
            .usernames
            .get(username)
            .and_then(|id| table.credentials.get(id))
            .cloned())
    }

    async fn create(&self, new: NewAccount) -> Result<Account, StorageError> {
        let mut table = self.inner.accounts.write();
        if table.usernames.contains_key(&new.username) {
            return Err(StorageError::Conflict(new.username));
        }

        table.next_id += 1;
        let id = table.next_id;
        let account = Account::new(id, &new.username, Utc::now());
        let credential = CredentialRecord {
            account_id: id,
            username: new.username.clone(),
            salt: new.salt,
            password_hash: new.password_hash,
        };

        table.usernames.insert(new.username, id);
        table.accounts.insert(id, account.clone());
        table.credentials.insert(id, credential);
        Ok(account)
    }

    async fn update_profile(
        &self,
        id: AccountId,
        update: &ProfileUpdate,
    ) -> Result<Account, StorageError> {
        let mut table = self.inner.accounts.write();
        let account = table
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("account {id}")))?;
        account.apply(update, Utc::now());
        Ok(account.clone())
    }

    async fn update_credential(
        &self,
        id: AccountId,
        password_hash: &str,
    ) -> Result<(), StorageError> {
        let mut table = self.inner.accounts.write();
        let credential = table
            .credentials
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("credential {id}")))?;
        credential.password_hash = password_hash.to_string();
        Ok(())
    }
}

#[async_trait]
impl AuditLog for MemoryStorage {
    async fn append(&self, entry: &LoginAuditEntry) -> Result<(), StorageError> {
        self.inner.audit.lock().push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl TokenStore for MemoryStorage {
    async fn tokens_for(&self, account_id: AccountId) -> Result<Vec<LiveToken>, StorageError> {
        Ok(self.inner.tokens.read().tokens_for(account_id))
    }

    async fn find_token(&self, token: &str) -> Result<Option<LiveToken>, StorageError> {
        Ok(self.inner.tokens.read().find(token))
    }

    async fn swap_tokens(&self, evict: &[String], insert: LiveToken) -> Result<(), StorageError> {
        self.inner.tokens.write().swap(evict, insert);
        Ok(())
    }

    async fn remove_token(&self, token: &str) -> Result<Option<LiveToken>, StorageError> {
        Ok(self.inner.tokens.write().remove(token))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        Ok(self.inner.tokens.write().purge_expired(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_account(username: &str) -> NewAccount {
        NewAccount {
            username: username.to_string(),
            salt: "salt".to_string(),
            password_hash: "hash".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_rejects_duplicates() {
        let storage = MemoryStorage::new();

        let alice = storage.create(new_account("alice")).await.unwrap();
        let bob = storage.create(new_account("bob")).await.unwrap();
        assert_eq!(alice.id, 1);
        assert_eq!(bob.id, 2);
        assert_eq!(alice.nickname.as_deref(), Some("alice"));

        assert!(matches!(
            storage.create(new_account("alice")).await,
            Err(StorageError::Conflict(_))
        ));

        let credential = storage.find_credential("alice").await.unwrap().unwrap();
        assert_eq!(credential.account_id, alice.id);
        assert_eq!(storage.find_by_id(2).await.unwrap().unwrap().username, "bob");
    }

    #[tokio::test]
    async fn test_update_credential_keeps_salt() {
        let storage = MemoryStorage::new();
        let alice = storage.create(new_account("alice")).await.unwrap();

        storage.update_credential(alice.id, "new-hash").await.unwrap();
        let credential = storage.find_credential("alice").await.unwrap().unwrap();
        assert_eq!(credential.password_hash, "new-hash");
        assert_eq!(credential.salt, "salt");

        assert!(matches!(
            storage.update_credential(99, "x").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let storage = MemoryStorage::new();
        let clone = storage.clone();
        storage.create(new_account("alice")).await.unwrap();
        assert!(clone.find_by_username("alice").await.unwrap().is_some());
    }
}
