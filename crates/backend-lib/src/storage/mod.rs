// ============================
// crates/backend-lib/src/storage/mod.rs
// ============================
//! Persistence collaborators: accounts, login audit log and the token pool table.
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keygate_common::AccountId;

use crate::error::StorageError;
use crate::models::{Account, CredentialRecord, LiveToken, LoginAuditEntry, NewAccount, ProfileUpdate};

mod flat_file;
mod memory;

pub use flat_file::FlatFileStorage;
pub use memory::MemoryStorage;

/// Account and credential records
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>, StorageError>;

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StorageError>;

    async fn find_credential(&self, username: &str)
        -> Result<Option<CredentialRecord>, StorageError>;

    /// Create an account and its credential as one unit.
    ///
    /// Fails with [`StorageError::Conflict`] if the username is taken.
    async fn create(&self, new: NewAccount) -> Result<Account, StorageError>;

    async fn update_profile(
        &self,
        id: AccountId,
        update: &ProfileUpdate,
    ) -> Result<Account, StorageError>;

    /// Replace the stored password hash. The salt is kept.
    async fn update_credential(
        &self,
        id: AccountId,
        password_hash: &str,
    ) -> Result<(), StorageError>;
}

/// Append-only login audit log
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: &LoginAuditEntry) -> Result<(), StorageError>;
}

/// Backing table of the token pool
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Live tokens of one account in insertion order
    async fn tokens_for(&self, account_id: AccountId) -> Result<Vec<LiveToken>, StorageError>;

    async fn find_token(&self, token: &str) -> Result<Option<LiveToken>, StorageError>;

    /// Remove `evict` and insert `insert` in one step.
    async fn swap_tokens(&self, evict: &[String], insert: LiveToken) -> Result<(), StorageError>;

    async fn remove_token(&self, token: &str) -> Result<Option<LiveToken>, StorageError>;

    /// Drop records whose expiry has passed; returns how many were dropped
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError>;
}

/// Run a storage call with a deadline
pub async fn with_deadline<T, F>(timeout: Duration, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::DeadlineExceeded(timeout)),
    }
}

/// In-memory token table shared by the storage backends.
///
/// Tokens are kept per account in insertion order, with a reverse index from
/// token string to owner.
#[derive(Debug, Clone, Default)]
pub(crate) struct TokenTable {
    by_account: HashMap<AccountId, Vec<LiveToken>>,
    owners: HashMap<String, AccountId>,
}

impl TokenTable {
    pub(crate) fn from_tokens(tokens: Vec<LiveToken>) -> Self {
        let mut table = Self::default();
        for token in tokens {
            table.insert(token);
        }
        table
    }

    /// All records, grouped by account, each group in insertion order
    pub(crate) fn to_vec(&self) -> Vec<LiveToken> {
        let mut accounts: Vec<_> = self.by_account.keys().copied().collect();
        accounts.sort_unstable();
        accounts
            .into_iter()
            .flat_map(|id| self.by_account[&id].iter().cloned())
            .collect()
    }

    pub(crate) fn tokens_for(&self, account_id: AccountId) -> Vec<LiveToken> {
        self.by_account.get(&account_id).cloned().unwrap_or_default()
    }

    pub(crate) fn find(&self, token: &str) -> Option<LiveToken> {
        let owner = self.owners.get(token)?;
        self.by_account
            .get(owner)?
            .iter()
            .find(|t| t.token == token)
            .cloned()
    }

    pub(crate) fn insert(&mut self, token: LiveToken) {
        // Replace a record with the same token string
        self.remove(&token.token);
        self.owners.insert(token.token.clone(), token.account_id);
        self.by_account.entry(token.account_id).or_default().push(token);
    }

    pub(crate) fn remove(&mut self, token: &str) -> Option<LiveToken> {
        let owner = self.owners.remove(token)?;
        let tokens = self.by_account.get_mut(&owner)?;
        let position = tokens.iter().position(|t| t.token == token)?;
        let removed = tokens.remove(position);
        if tokens.is_empty() {
            self.by_account.remove(&owner);
        }
        Some(removed)
    }

    pub(crate) fn swap(&mut self, evict: &[String], insert: LiveToken) {
        for token in evict {
            self.remove(token);
        }
        self.insert(insert);
    }

    pub(crate) fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .by_account
            .values()
            .flatten()
            .filter(|t| t.is_expired(now))
            .map(|t| t.token.clone())
            .collect();
        for token in &expired {
            self.remove(token);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn token(name: &str, account_id: AccountId, issued_at: DateTime<Utc>) -> LiveToken {
        LiveToken {
            token: name.to_string(),
            account_id,
            username: format!("user{account_id}"),
            issued_at,
            expires_at: issued_at + TimeDelta::hours(1),
        }
    }

    #[test]
    fn test_table_keeps_insertion_order() {
        let now = Utc::now();
        let mut table = TokenTable::default();
        table.insert(token("b", 1, now));
        table.insert(token("a", 1, now));
        table.insert(token("x", 2, now));

        let names: Vec<_> = table.tokens_for(1).into_iter().map(|t| t.token).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(table.find("x").map(|t| t.account_id), Some(2));
    }

    #[test]
    fn test_table_swap_and_remove() {
        let now = Utc::now();
        let mut table = TokenTable::from_tokens(vec![token("a", 1, now), token("b", 1, now)]);

        table.swap(&["a".to_string()], token("c", 1, now));
        let names: Vec<_> = table.tokens_for(1).into_iter().map(|t| t.token).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert!(table.find("a").is_none());

        assert!(table.remove("b").is_some());
        assert!(table.remove("b").is_none());
        assert_eq!(table.to_vec().len(), 1);
    }

    #[test]
    fn test_table_purge() {
        let now = Utc::now();
        let mut table = TokenTable::from_tokens(vec![
            token("old", 1, now - TimeDelta::hours(2)),
            token("new", 1, now),
        ]);

        assert_eq!(table.purge_expired(now), 1);
        assert!(table.find("old").is_none());
        assert!(table.find("new").is_some());
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let result: Result<(), StorageError> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(StorageError::DeadlineExceeded(_))));
    }
}
