use async_trait::async_trait;
use keygate_common::AccountId;

use crate::error::AuthError;
use crate::models::{Account, ClientInfo, LiveToken, ProfileUpdate};

#[async_trait]
pub trait AuthService: Send + Sync {
    /// Create an account with a salted password hash
    async fn register(&self, username: &str, password: &str) -> Result<Account, AuthError>;

    /// Check credentials and hand out a pooled bearer token.
    /// Every attempt against an existing account is written to the audit log.
    async fn login(
        &self,
        username: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<String, AuthError>;

    async fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError>;

    /// Revoke a token; revoking an absent token is not an error
    async fn logout(&self, token: &str) -> Result<(), AuthError>;

    async fn profile_by_id(&self, id: AccountId) -> Result<Account, AuthError>;

    async fn profile_by_username(&self, username: &str) -> Result<Account, AuthError>;

    async fn update_profile(
        &self,
        id: AccountId,
        update: ProfileUpdate,
    ) -> Result<Account, AuthError>;

    /// Live tokens of an account, oldest first
    async fn sessions(&self, id: AccountId) -> Result<Vec<LiveToken>, AuthError>;
}
