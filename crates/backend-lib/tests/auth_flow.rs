mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keygate_backend::{
    auth::AuthService,
    error::{AuthError, IssuanceError, StorageError},
    models::{LiveToken, LoginAuditEntry, LoginOutcome},
    storage::{AuditLog, MemoryStorage, TokenStore},
};
use keygate_common::AccountId;

use common::{client, codec, memory_service, service_with};

/// Audit log whose writes always fail
struct BrokenAudit;

#[async_trait]
impl AuditLog for BrokenAudit {
    async fn append(&self, _entry: &LoginAuditEntry) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("audit disk full".to_string()))
    }
}

/// Token store that reads fine but refuses writes
struct ReadOnlyTokens(MemoryStorage);

#[async_trait]
impl TokenStore for ReadOnlyTokens {
    async fn tokens_for(&self, account_id: AccountId) -> Result<Vec<LiveToken>, StorageError> {
        self.0.tokens_for(account_id).await
    }

    async fn find_token(&self, token: &str) -> Result<Option<LiveToken>, StorageError> {
        self.0.find_token(token).await
    }

    async fn swap_tokens(&self, _evict: &[String], _insert: LiveToken) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("read-only".to_string()))
    }

    async fn remove_token(&self, token: &str) -> Result<Option<LiveToken>, StorageError> {
        self.0.remove_token(token).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        self.0.purge_expired(now).await
    }
}

#[tokio::test]
async fn test_register_duplicate_username() {
    let (auth, _, _) = memory_service(5);

    let account = auth.register("alice", "Secret123!").await.unwrap();
    assert_eq!(account.username, "alice");
    assert_eq!(account.avatar, "vanilla");
    assert_eq!(account.level, 1);

    assert!(matches!(
        auth.register("alice", "Other456!").await,
        Err(AuthError::UsernameTaken)
    ));
}

#[tokio::test]
async fn test_sixth_login_evicts_first() {
    let (auth, pool, _) = memory_service(5);
    let account = auth.register("alice", "Secret123!").await.unwrap();

    let mut tokens = Vec::new();
    for _ in 0..6 {
        tokens.push(auth.login("alice", "Secret123!", &client()).await.unwrap());
    }

    let live = pool.list_by_account(account.id).await.unwrap();
    assert_eq!(live.len(), 5);

    assert!(!pool.is_live(&tokens[0]).await.unwrap());
    for token in &tokens[1..] {
        assert!(pool.is_live(token).await.unwrap());
    }

    // Oldest first
    let listed: Vec<_> = live.into_iter().map(|t| t.token).collect();
    assert_eq!(listed, tokens[1..].to_vec());
}

#[tokio::test]
async fn test_wrong_password_is_audited() {
    let (auth, pool, storage) = memory_service(5);
    let account = auth.register("alice", "Secret123!").await.unwrap();

    assert!(matches!(
        auth.login("alice", "Wrong1234!", &client()).await,
        Err(AuthError::WrongPassword)
    ));

    assert!(pool.list_by_account(account.id).await.unwrap().is_empty());

    let entries = storage.audit_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].account_id, account.id);
    assert_eq!(entries[0].outcome, LoginOutcome::Failure);
    assert_eq!(entries[0].reason.as_deref(), Some("password error"));
    assert_eq!(entries[0].token, None);
    assert_eq!(entries[0].device, "test-device");
}

#[tokio::test]
async fn test_audit_failure_is_reported_with_primary_error() {
    let storage = MemoryStorage::new();
    let (auth, _) = service_with(
        Arc::new(storage.clone()),
        Arc::new(BrokenAudit),
        Arc::new(storage.clone()),
        5,
    );
    auth.register("alice", "Secret123!").await.unwrap();

    let err = auth
        .login("alice", "Wrong1234!", &client())
        .await
        .unwrap_err();

    match &err {
        AuthError::AuditFailed { primary, audit } => {
            assert!(matches!(primary.as_ref(), AuthError::WrongPassword));
            assert!(matches!(audit, StorageError::Unavailable(_)));
        },
        other => panic!("expected audit failure, got {other:?}"),
    }
    assert_eq!(err.reason(), "password error");
}

#[tokio::test]
async fn test_unaudited_login_leaves_no_live_token() {
    let storage = MemoryStorage::new();
    let (auth, pool) = service_with(
        Arc::new(storage.clone()),
        Arc::new(BrokenAudit),
        Arc::new(storage.clone()),
        5,
    );
    let account = auth.register("alice", "Secret123!").await.unwrap();

    assert!(matches!(
        auth.login("alice", "Secret123!", &client()).await,
        Err(AuthError::Storage(_))
    ));
    assert!(pool.list_by_account(account.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_admission_failure_is_audited() {
    let storage = MemoryStorage::new();
    let (auth, _) = service_with(
        Arc::new(storage.clone()),
        Arc::new(storage.clone()),
        Arc::new(ReadOnlyTokens(storage.clone())),
        5,
    );
    auth.register("alice", "Secret123!").await.unwrap();

    let err = auth
        .login("alice", "Secret123!", &client())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::TokenIssuance(IssuanceError::Admission(_))
    ));

    let entries = storage.audit_entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, LoginOutcome::Failure);
    assert_eq!(entries[0].reason.as_deref(), Some("token creation error"));
}

#[tokio::test]
async fn test_login_token_round_trips() {
    let (auth, _, _) = memory_service(5);
    let account = auth.register("alice", "Secret123!").await.unwrap();

    let token = auth.login("alice", "Secret123!", &client()).await.unwrap();
    let claims = codec().verify(&token).unwrap();
    assert_eq!(claims.uid, account.id);
    assert_eq!(claims.username, "alice");
    assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
}

#[tokio::test]
async fn test_unknown_and_malformed_usernames() {
    let (auth, _, storage) = memory_service(5);

    assert!(matches!(
        auth.login("nobody", "Secret123!", &client()).await,
        Err(AuthError::NoSuchAccount)
    ));
    assert!(matches!(
        auth.login("../etc/passwd", "Secret123!", &client()).await,
        Err(AuthError::NoSuchAccount)
    ));
    assert!(storage.audit_entries().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logins_respect_capacity() {
    let (auth, pool, storage) = memory_service(5);
    let account = auth.register("alice", "Secret123!").await.unwrap();
    let auth = Arc::new(auth);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let auth = auth.clone();
            tokio::spawn(async move { auth.login("alice", "Secret123!", &client()).await })
        })
        .collect();

    let mut tokens = Vec::new();
    for handle in handles {
        tokens.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(pool.list_by_account(account.id).await.unwrap().len(), 5);

    let mut live = 0;
    for token in &tokens {
        if pool.is_live(token).await.unwrap() {
            live += 1;
        }
    }
    assert_eq!(live, 5);

    // One audit entry per attempt
    assert_eq!(storage.audit_entries().len(), 20);
}
