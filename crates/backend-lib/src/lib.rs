// ============================
// crates/backend-lib/src/lib.rs
// ============================
//! Core of the `keygate` credential and session service.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod router;
pub mod storage;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{AuthService, DefaultAuth, TokenCodec, TokenPool};
use crate::config::Settings;
use crate::middleware::AuthGate;
use crate::storage::{AccountStore, AuditLog, TokenStore};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Authentication service
    pub auth: Arc<dyn AuthService>,
    /// Bearer token guard
    pub gate: Arc<AuthGate>,
    /// Token pool, also driven by the purge task
    pub pool: Arc<TokenPool>,
    /// Settings
    pub settings: Arc<Settings>,
}

impl AppState {
    /// Wire the service graph over one storage backend
    pub fn new<S>(storage: S, settings: Settings) -> anyhow::Result<Self>
    where
        S: AccountStore + AuditLog + TokenStore + Clone + 'static,
    {
        settings.validate()?;

        let timeout = settings.storage_timeout();
        let codec = Arc::new(TokenCodec::new(
            settings.token.secret.as_bytes(),
            settings.token.issuer.clone(),
        ));
        let pool = Arc::new(TokenPool::new(
            Arc::new(storage.clone()),
            settings.token.max_per_user,
            timeout,
        ));

        let auth = DefaultAuth::new(
            Arc::new(storage.clone()),
            Arc::new(storage),
            pool.clone(),
            codec.clone(),
        )
        .with_hasher(settings.hasher()?)
        .with_policy(settings.password.clone())
        .with_salt_length(settings.hashing.salt_length)
        .with_ttl(settings.token_ttl())
        .with_timeout(timeout);

        Ok(Self {
            auth: Arc::new(auth),
            gate: Arc::new(AuthGate::new(codec, pool.clone())),
            pool,
            settings: Arc::new(settings),
        })
    }
}

/// Periodically drop expired token records until the task is aborted
pub async fn purge_expired_tokens(pool: Arc<TokenPool>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = pool.purge_expired(chrono::Utc::now()).await {
            tracing::warn!(error = %e, "expired token purge failed");
        }
    }
}
