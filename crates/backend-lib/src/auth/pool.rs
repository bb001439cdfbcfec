// ============================
// crates/backend-lib/src/auth/pool.rs
// ============================
//! Bounded per-account pool of live tokens.
//!
//! Each account holds at most `capacity` live tokens. Admitting a token into
//! a full pool evicts the oldest one (by issue time, ties by insertion order)
//! in the same store write that inserts the new token. Admits and revocations
//! for one account are serialized through a per-account lock; lookups are not.
//!
//! An admission runs on its own task and keeps the account lock until its
//! write has landed, so a caller giving up at the deadline never lets a second
//! admission read a stale pool. A token whose caller gave up is removed again.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use keygate_common::AccountId;
use metrics::counter;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

use super::token::TokenClaims;
use crate::error::StorageError;
use crate::metrics::{TOKEN_ADMITTED, TOKEN_EVICTED, TOKEN_PURGED, TOKEN_REVOKED};
use crate::models::LiveToken;
use crate::storage::{with_deadline, TokenStore};

/// Default number of live tokens per account
pub const MAX_TOKENS_PER_USER: usize = 5;

/// Pool operation failures
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("token is not in the pool")]
    NotFound,

    #[error("claims cannot be admitted: {0}")]
    InvalidClaims(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Owner of every live token record
pub struct TokenPool {
    store: Arc<dyn TokenStore>,
    capacity: usize,
    timeout: Duration,
    locks: Arc<LockMap>,
}

type LockMap = DashMap<AccountId, Arc<Mutex<()>>>;

/// Forget an account's lock once the map holds the only reference
fn release_lock(locks: &LockMap, account_id: AccountId) {
    locks.remove_if(&account_id, |_, lock| Arc::strong_count(lock) == 1);
}

/// Evict the oldest records as needed and insert `record` in one store write.
async fn evict_and_insert(
    store: &dyn TokenStore,
    record: LiveToken,
    capacity: usize,
    timeout: Duration,
) -> Result<Vec<LiveToken>, PoolError> {
    let mut current = with_deadline(timeout, store.tokens_for(record.account_id)).await?;
    // Stable: equal issue times keep insertion order
    current.sort_by_key(|t| t.issued_at);

    let excess = (current.len() + 1).saturating_sub(capacity);
    let evicted: Vec<LiveToken> = current.into_iter().take(excess).collect();
    let evict_keys: Vec<String> = evicted.iter().map(|t| t.token.clone()).collect();

    // Not cut short: the outcome must be known before the lock is released
    store.swap_tokens(&evict_keys, record).await?;
    Ok(evicted)
}

impl TokenPool {
    pub fn new(store: Arc<dyn TokenStore>, capacity: usize, timeout: Duration) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            timeout,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn account_lock(&self, account_id: AccountId) -> Arc<Mutex<()>> {
        self.locks.entry(account_id).or_default().clone()
    }

    /// Admit a freshly signed token, evicting the oldest if the pool is full.
    ///
    /// Returns the evicted records.
    pub async fn admit(
        &self,
        account_id: AccountId,
        claims: &TokenClaims,
        token: &str,
    ) -> Result<Vec<LiveToken>, PoolError> {
        if claims.uid != account_id {
            return Err(PoolError::InvalidClaims(format!(
                "claims belong to account {}, not {account_id}",
                claims.uid
            )));
        }
        let record = LiveToken::from_claims(token, claims).ok_or_else(|| {
            PoolError::InvalidClaims("timestamps out of range".to_string())
        })?;

        let lock = self.account_lock(account_id);
        let locks = self.locks.clone();
        let store = self.store.clone();
        let (capacity, timeout) = (self.capacity, self.timeout);
        let token = token.to_string();
        let (reply, mut outcome) = oneshot::channel::<Result<Vec<LiveToken>, PoolError>>();

        tokio::spawn(async move {
            let guard = lock.lock().await;
            if !reply.is_closed() {
                let result = evict_and_insert(store.as_ref(), record, capacity, timeout).await;
                if let Err(Ok(_)) = reply.send(result) {
                    // Nobody is left to hand the token out
                    match store.remove_token(&token).await {
                        Ok(_) => tracing::warn!(account_id, "dropped token of abandoned login"),
                        Err(e) => {
                            tracing::error!(account_id, error = %e, "failed to drop abandoned token")
                        },
                    }
                }
            }
            drop(guard);
            drop(lock);
            release_lock(&locks, account_id);
        });

        let evicted = match tokio::time::timeout(self.timeout, &mut outcome).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => {
                return Err(StorageError::Unavailable("token admission task ended".to_string()).into())
            },
            Err(_) => {
                // Closing first means a result that raced the deadline is still taken
                outcome.close();
                match outcome.try_recv() {
                    Ok(result) => result?,
                    Err(_) => return Err(StorageError::DeadlineExceeded(self.timeout).into()),
                }
            },
        };

        counter!(TOKEN_ADMITTED).increment(1);
        if !evicted.is_empty() {
            counter!(TOKEN_EVICTED).increment(evicted.len() as u64);
            tracing::info!(account_id, evicted = evicted.len(), "token pool full, evicted oldest");
        }

        Ok(evicted)
    }

    /// Permanently remove a token
    pub async fn revoke(&self, token: &str) -> Result<LiveToken, PoolError> {
        let record = with_deadline(self.timeout, self.store.find_token(token))
            .await?
            .ok_or(PoolError::NotFound)?;

        let lock = self.account_lock(record.account_id);
        let guard = lock.lock().await;
        let removed = with_deadline(self.timeout, self.store.remove_token(token)).await;
        drop(guard);
        drop(lock);
        release_lock(&self.locks, record.account_id);

        let removed = removed?.ok_or(PoolError::NotFound)?;

        counter!(TOKEN_REVOKED).increment(1);
        tracing::debug!(account_id = removed.account_id, "token revoked");
        Ok(removed)
    }

    /// Pool membership only; the validity window is checked by the caller
    pub async fn is_live(&self, token: &str) -> Result<bool, PoolError> {
        let found = with_deadline(self.timeout, self.store.find_token(token)).await?;
        Ok(found.is_some())
    }

    /// Live tokens of an account, oldest first
    pub async fn list_by_account(&self, account_id: AccountId) -> Result<Vec<LiveToken>, PoolError> {
        let mut tokens = with_deadline(self.timeout, self.store.tokens_for(account_id)).await?;
        tokens.sort_by_key(|t| t.issued_at);
        Ok(tokens)
    }

    /// Drop records that are past their expiry
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, PoolError> {
        let purged = with_deadline(self.timeout, self.store.purge_expired(now)).await?;
        if purged > 0 {
            counter!(TOKEN_PURGED).increment(purged as u64);
            tracing::debug!(purged, "purged expired tokens");
        }
        Ok(purged)
    }
}
