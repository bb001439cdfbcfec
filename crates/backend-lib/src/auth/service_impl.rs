use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keygate_common::AccountId;
use metrics::counter;
use tokio::sync::OnceCell;
use zeroize::Zeroizing;

use super::password::{
    validate_password, validate_username, CredentialHasher, HashError, PasswordPolicy,
};
use super::pool::{PoolError, TokenPool};
use super::service::AuthService;
use super::token::{TokenCodec, DEFAULT_TOKEN_TTL};
use super::token_generator::{generate_salt, DEFAULT_SALT_LENGTH};
use crate::error::{AuthError, IssuanceError, StorageError};
use crate::metrics::{ACCOUNT_REGISTERED, AUDIT_WRITE_FAILED, LOGIN_FAILED, LOGIN_SUCCEEDED};
use crate::models::{Account, ClientInfo, LiveToken, LoginAuditEntry, NewAccount, ProfileUpdate};
use crate::storage::{with_deadline, AccountStore, AuditLog};

const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);
const DECOY_PASSWORD: &str = "decoy-password-never-matches";
const DECOY_SALT: &str = "decoy-salt";

pub struct DefaultAuth {
    accounts: Arc<dyn AccountStore>,
    audit: Arc<dyn AuditLog>,
    pool: Arc<TokenPool>,
    codec: Arc<TokenCodec>,
    hasher: CredentialHasher,
    policy: PasswordPolicy,
    salt_length: usize,
    ttl: Duration,
    timeout: Duration,
    /// Hash checked against for unknown usernames
    decoy: OnceCell<String>,
}

impl DefaultAuth {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        audit: Arc<dyn AuditLog>,
        pool: Arc<TokenPool>,
        codec: Arc<TokenCodec>,
    ) -> Self {
        Self {
            accounts,
            audit,
            pool,
            codec,
            hasher: CredentialHasher::default(),
            policy: PasswordPolicy::default(),
            salt_length: DEFAULT_SALT_LENGTH,
            ttl: DEFAULT_TOKEN_TTL,
            timeout: DEFAULT_STORAGE_TIMEOUT,
            decoy: OnceCell::new(),
        }
    }

    pub fn with_hasher(mut self, hasher: CredentialHasher) -> Self {
        self.hasher = hasher;
        self.decoy = OnceCell::new();
        self
    }

    pub fn with_policy(mut self, policy: PasswordPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_salt_length(mut self, salt_length: usize) -> Self {
        self.salt_length = salt_length;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Scrypt is CPU-bound, keep it off the async workers
    async fn hash(&self, password: &str, salt: &str) -> Result<String, AuthError> {
        let hasher = self.hasher;
        let password = Zeroizing::new(password.to_string());
        let salt = salt.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password, &salt))
            .await
            .map_err(|e| AuthError::Hashing(HashError::Hashing(e.to_string())))?
            .map_err(AuthError::Hashing)
    }

    async fn verify(&self, hash: &str, password: &str, salt: &str) -> Result<(), AuthError> {
        let hasher = self.hasher;
        let hash = hash.to_string();
        let password = Zeroizing::new(password.to_string());
        let salt = salt.to_string();
        let verdict = tokio::task::spawn_blocking(move || hasher.verify(&hash, &password, &salt))
            .await
            .map_err(|e| AuthError::Hashing(HashError::Hashing(e.to_string())))?;

        match verdict {
            Ok(()) => Ok(()),
            Err(HashError::Mismatch) => Err(AuthError::WrongPassword),
            Err(e) => Err(AuthError::Hashing(e)),
        }
    }

    /// Spend one verification on a fixed hash so an unknown username costs
    /// as much as a wrong password
    async fn verify_decoy(&self, password: &str) {
        let decoy = match self
            .decoy
            .get_or_try_init(|| self.hash(DECOY_PASSWORD, DECOY_SALT))
            .await
        {
            Ok(decoy) => decoy,
            Err(e) => {
                tracing::warn!(error = %e, "failed to prepare decoy hash");
                return;
            },
        };
        let _ = self.verify(decoy, password, DECOY_SALT).await;
    }

    /// Record a failed login and hand the error back.
    ///
    /// A failing audit write is attached to the error, never substituted for it.
    async fn reject(&self, account_id: AccountId, client: &ClientInfo, error: AuthError) -> AuthError {
        counter!(LOGIN_FAILED, "reason" => error.reason()).increment(1);

        let entry = LoginAuditEntry::failure(account_id, client, error.reason());
        match with_deadline(self.timeout, self.audit.append(&entry)).await {
            Ok(()) => error,
            Err(audit) => {
                counter!(AUDIT_WRITE_FAILED).increment(1);
                tracing::error!(account_id, error = %audit, "failed to record login failure");
                error.with_audit_failure(audit)
            },
        }
    }

    async fn issue_token(&self, account_id: AccountId, username: &str) -> Result<String, AuthError> {
        let issued = self
            .codec
            .issue(account_id, username, self.ttl)
            .map_err(|e| AuthError::TokenIssuance(IssuanceError::Signing(e)))?;

        self.pool
            .admit(account_id, &issued.claims, &issued.token)
            .await
            .map_err(|e| AuthError::TokenIssuance(IssuanceError::Admission(e)))?;

        Ok(issued.token)
    }
}

fn pool_failure(error: PoolError) -> AuthError {
    match error {
        PoolError::Storage(e) => AuthError::Storage(e),
        other => AuthError::Storage(StorageError::Unavailable(other.to_string())),
    }
}

#[async_trait]
impl AuthService for DefaultAuth {
    async fn register(&self, username: &str, password: &str) -> Result<Account, AuthError> {
        if !validate_username(username) {
            return Err(AuthError::InvalidUsername);
        }
        if !validate_password(password, &self.policy) {
            return Err(AuthError::InvalidPassword);
        }

        if with_deadline(self.timeout, self.accounts.find_by_username(username))
            .await?
            .is_some()
        {
            return Err(AuthError::UsernameTaken);
        }

        let salt = generate_salt(self.salt_length)?;
        let password_hash = self.hash(password, &salt).await?;

        let new = NewAccount {
            username: username.to_string(),
            salt,
            password_hash,
        };
        let account = match with_deadline(self.timeout, self.accounts.create(new)).await {
            Ok(account) => account,
            // Lost a race with a concurrent registration
            Err(StorageError::Conflict(_)) => return Err(AuthError::UsernameTaken),
            Err(e) => return Err(e.into()),
        };

        counter!(ACCOUNT_REGISTERED).increment(1);
        tracing::info!(account_id = account.id, username, "account registered");
        Ok(account)
    }

    async fn login(
        &self,
        username: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<String, AuthError> {
        if !validate_username(username) {
            return Err(AuthError::NoSuchAccount);
        }

        let Some(credential) =
            with_deadline(self.timeout, self.accounts.find_credential(username)).await?
        else {
            self.verify_decoy(password).await;
            return Err(AuthError::NoSuchAccount);
        };
        let account_id = credential.account_id;

        if let Err(e) = self
            .verify(&credential.password_hash, password, &credential.salt)
            .await
        {
            tracing::warn!(account_id, username, reason = e.reason(), "login rejected");
            return Err(self.reject(account_id, client, e).await);
        }

        let token = match self.issue_token(account_id, username).await {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(account_id, username, error = %e, "token issuance failed");
                return Err(self.reject(account_id, client, e).await);
            },
        };

        let entry = LoginAuditEntry::success(account_id, client, &token);
        if let Err(audit) = with_deadline(self.timeout, self.audit.append(&entry)).await {
            counter!(AUDIT_WRITE_FAILED).increment(1);
            tracing::error!(account_id, error = %audit, "failed to record login, revoking token");
            // An unaudited grant must not stay live
            if let Err(e) = self.pool.revoke(&token).await {
                tracing::error!(account_id, error = %e, "failed to revoke unaudited token");
            }
            return Err(AuthError::Storage(audit));
        }

        counter!(LOGIN_SUCCEEDED).increment(1);
        tracing::info!(account_id, username, source = %client.source_addr, "login succeeded");
        Ok(token)
    }

    async fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        if !validate_username(username) {
            return Err(AuthError::NoSuchAccount);
        }
        if !validate_password(new_password, &self.policy) {
            return Err(AuthError::InvalidPassword);
        }

        let credential = with_deadline(self.timeout, self.accounts.find_credential(username))
            .await?
            .ok_or(AuthError::NoSuchAccount)?;

        self.verify(&credential.password_hash, old_password, &credential.salt)
            .await?;

        // Same salt, new hash
        let password_hash = self.hash(new_password, &credential.salt).await?;
        with_deadline(
            self.timeout,
            self.accounts
                .update_credential(credential.account_id, &password_hash),
        )
        .await?;

        tracing::info!(account_id = credential.account_id, username, "password changed");
        Ok(())
    }

    async fn logout(&self, token: &str) -> Result<(), AuthError> {
        match self.pool.revoke(token).await {
            Ok(record) => {
                tracing::info!(account_id = record.account_id, "logged out");
                Ok(())
            },
            Err(PoolError::NotFound) => Ok(()),
            Err(e) => Err(pool_failure(e)),
        }
    }

    async fn profile_by_id(&self, id: AccountId) -> Result<Account, AuthError> {
        with_deadline(self.timeout, self.accounts.find_by_id(id))
            .await?
            .ok_or(AuthError::NoSuchAccount)
    }

    async fn profile_by_username(&self, username: &str) -> Result<Account, AuthError> {
        if !validate_username(username) {
            return Err(AuthError::NoSuchAccount);
        }
        with_deadline(self.timeout, self.accounts.find_by_username(username))
            .await?
            .ok_or(AuthError::NoSuchAccount)
    }

    async fn update_profile(
        &self,
        id: AccountId,
        update: ProfileUpdate,
    ) -> Result<Account, AuthError> {
        match with_deadline(self.timeout, self.accounts.update_profile(id, &update)).await {
            Ok(account) => {
                tracing::debug!(account_id = id, "profile updated");
                Ok(account)
            },
            Err(StorageError::NotFound(_)) => Err(AuthError::NoSuchAccount),
            Err(e) => Err(e.into()),
        }
    }

    async fn sessions(&self, id: AccountId) -> Result<Vec<LiveToken>, AuthError> {
        self.pool.list_by_account(id).await.map_err(pool_failure)
    }
}
