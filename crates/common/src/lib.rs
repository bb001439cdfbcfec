// ================
// crates/common/src/lib.rs
// ================
//! Request and response bodies
//! exchanged between `keygate` clients and the server.
//! Field names follow the JSON the HTTP layer accepts and emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account identifier type
pub type AccountId = u64;

/// Body of `POST /api/user/register` and `POST /api/user/login`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CredentialsBody {
    /// Account name (lowercase letters, digits, underscore)
    pub username: String,
    /// Plaintext password
    pub password: String,
}

/// Body of `POST /api/user/update-psw`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChangePasswordBody {
    pub username: String,
    /// Current password
    pub password: String,
    /// Replacement password
    pub new_password: String,
}

/// Body of `POST /api/user/edit`
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProfileUpdateBody {
    /// New display name
    pub nickname: Option<String>,
    /// Birth date as unix seconds
    pub birth: Option<i64>,
    /// `male` or `female`; anything else clears the field
    pub gender: Option<String>,
}

/// Query of `GET /api/user/profile`
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProfileQuery {
    pub uid: Option<AccountId>,
    pub username: Option<String>,
}

/// Successful login
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TokenResponse {
    /// Bearer token to present as `Authorization: Bearer <token>`
    pub token: String,
}

/// Public view of an account
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ProfileResponse {
    pub uid: AccountId,
    pub username: String,
    pub nickname: Option<String>,
    pub avatar: String,
    pub birth: Option<DateTime<Utc>>,
    pub gender: Option<String>,
    pub authority: u64,
    pub level: u64,
    pub created_at: DateTime<Utc>,
}

/// One live login of the calling account
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionSummary {
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Whether this entry is the token the request was made with
    pub current: bool,
}

/// Plain acknowledgement
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error envelope returned for every failed request
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

/// Stable error code and client-facing message
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_update_fields_are_optional() {
        let body: ProfileUpdateBody = serde_json::from_str(r#"{"nickname":"neko"}"#).unwrap();
        assert_eq!(body.nickname.as_deref(), Some("neko"));
        assert!(body.birth.is_none());
        assert!(body.gender.is_none());
    }

    #[test]
    fn error_envelope_shape() {
        let json = r#"{"error":{"code":"AUTH_002","message":"password error"}}"#;
        let envelope: ErrorEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.error.code, "AUTH_002");
        assert_eq!(envelope.error.message, "password error");
    }
}
