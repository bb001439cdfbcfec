//! Shared setup for the integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use keygate_backend::{
    auth::{CredentialHasher, DefaultAuth, TokenCodec, TokenPool},
    config::Settings,
    models::ClientInfo,
    storage::{AccountStore, AuditLog, MemoryStorage, TokenStore},
};

pub const SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const ISSUER: &str = "org.kirisakiii.neko";
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Settings with a secret and cheap scrypt parameters
pub fn test_settings(data_dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.data_dir = data_dir.to_path_buf();
    settings.token.secret = SECRET.to_string();
    settings.hashing.log_n = 4;
    settings
}

pub fn codec() -> Arc<TokenCodec> {
    Arc::new(TokenCodec::new(SECRET.as_bytes(), ISSUER))
}

pub fn cheap_hasher() -> CredentialHasher {
    CredentialHasher::new(4, 8, 1).expect("valid scrypt parameters")
}

pub fn client() -> ClientInfo {
    ClientInfo {
        source_addr: "192.0.2.10".to_string(),
        device: "test-device".to_string(),
        application: "integration-tests".to_string(),
    }
}

/// Service wired from explicit collaborators
pub fn service_with(
    accounts: Arc<dyn AccountStore>,
    audit: Arc<dyn AuditLog>,
    tokens: Arc<dyn TokenStore>,
    capacity: usize,
) -> (DefaultAuth, Arc<TokenPool>) {
    let pool = Arc::new(TokenPool::new(tokens, capacity, TIMEOUT));
    let auth = DefaultAuth::new(accounts, audit, pool.clone(), codec())
        .with_hasher(cheap_hasher())
        .with_timeout(TIMEOUT);
    (auth, pool)
}

/// Service with every collaborator backed by one memory store
pub fn memory_service(capacity: usize) -> (DefaultAuth, Arc<TokenPool>, MemoryStorage) {
    let storage = MemoryStorage::new();
    let (auth, pool) = service_with(
        Arc::new(storage.clone()),
        Arc::new(storage.clone()),
        Arc::new(storage.clone()),
        capacity,
    );
    (auth, pool, storage)
}
