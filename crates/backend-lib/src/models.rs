// ============================
// crates/backend-lib/src/models.rs
// ============================
//! Records persisted by the account, token and audit stores.
use chrono::{DateTime, Utc};
use keygate_common::{AccountId, ProfileResponse};
use serde::{Deserialize, Serialize};

use crate::auth::token::TokenClaims;

/// Avatar assigned to accounts that never uploaded one
pub const DEFAULT_AVATAR: &str = "vanilla";

/// Gender as stored on a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// Parse a client-supplied value; anything but `male`/`female` is unset.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "male" => Some(Gender::Male),
            "female" => Some(Gender::Female),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

/// Identity and display profile of a registered user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
    pub nickname: Option<String>,
    pub avatar: String,
    pub birth: Option<DateTime<Utc>>,
    pub gender: Option<Gender>,
    pub authority: u64,
    pub level: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Fresh account as created at registration
    pub fn new(id: AccountId, username: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            username: username.to_string(),
            nickname: Some(username.to_string()),
            avatar: DEFAULT_AVATAR.to_string(),
            birth: None,
            gender: None,
            authority: 0,
            level: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a validated profile change
    pub fn apply(&mut self, update: &ProfileUpdate, now: DateTime<Utc>) {
        self.nickname = update.nickname.clone();
        self.birth = update.birth;
        self.gender = update.gender;
        self.updated_at = now;
    }
}

impl From<Account> for ProfileResponse {
    fn from(account: Account) -> Self {
        Self {
            uid: account.id,
            username: account.username,
            nickname: account.nickname,
            avatar: account.avatar,
            birth: account.birth,
            gender: account.gender.map(|g| g.as_str().to_string()),
            authority: account.authority,
            level: account.level,
            created_at: account.created_at,
        }
    }
}

/// Mutable profile fields, already normalized
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub nickname: Option<String>,
    pub birth: Option<DateTime<Utc>>,
    pub gender: Option<Gender>,
}

/// Salted password hash of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub account_id: AccountId,
    pub username: String,
    pub salt: String,
    pub password_hash: String,
}

/// Input for creating an account together with its credential
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub salt: String,
    pub password_hash: String,
}

/// Token admitted to the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveToken {
    pub token: String,
    pub account_id: AccountId,
    pub username: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LiveToken {
    /// Build the pool record for a freshly signed token.
    ///
    /// Returns `None` if the claim timestamps are outside chrono's range.
    pub fn from_claims(token: &str, claims: &TokenClaims) -> Option<Self> {
        Some(Self {
            token: token.to_string(),
            account_id: claims.uid,
            username: claims.username.clone(),
            issued_at: DateTime::from_timestamp(claims.iat, 0)?,
            expires_at: DateTime::from_timestamp(claims.exp, 0)?,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Result of a login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginOutcome {
    Success,
    Failure,
}

/// Where a login attempt came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub source_addr: String,
    pub device: String,
    pub application: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            source_addr: "unknown".to_string(),
            device: "unknown".to_string(),
            application: "unknown".to_string(),
        }
    }
}

/// One line of the login audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAuditEntry {
    pub account_id: AccountId,
    pub timestamp: DateTime<Utc>,
    pub source_addr: String,
    pub device: String,
    pub application: String,
    pub outcome: LoginOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl LoginAuditEntry {
    pub fn failure(account_id: AccountId, client: &ClientInfo, reason: &str) -> Self {
        Self {
            account_id,
            timestamp: Utc::now(),
            source_addr: client.source_addr.clone(),
            device: client.device.clone(),
            application: client.application.clone(),
            outcome: LoginOutcome::Failure,
            reason: Some(reason.to_string()),
            token: None,
        }
    }

    pub fn success(account_id: AccountId, client: &ClientInfo, token: &str) -> Self {
        Self {
            account_id,
            timestamp: Utc::now(),
            source_addr: client.source_addr.clone(),
            device: client.device.clone(),
            application: client.application.clone(),
            outcome: LoginOutcome::Success,
            reason: None,
            token: Some(token.to_string()),
        }
    }
}
