// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Request validation for profile edits and client metadata.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use keygate_common::ProfileUpdateBody;
use regex::Regex;
use thiserror::Error;

use crate::models::{Gender, ProfileUpdate};

const MAX_NICKNAME_LENGTH: usize = 32;
const MAX_CLIENT_FIELD_LENGTH: usize = 128;

static NICKNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^<>/\\{}()\[\];]*$").unwrap());

/// Possible validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid nickname: {0}")]
    InvalidNickname(String),

    #[error("Invalid birth date: {0}")]
    InvalidBirth(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a nickname; blank clears it
pub fn validate_nickname(nickname: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(nickname) = nickname.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };

    if nickname.chars().count() > MAX_NICKNAME_LENGTH {
        return Err(ValidationError::InvalidNickname(format!(
            "must be at most {MAX_NICKNAME_LENGTH} characters"
        )));
    }
    if !NICKNAME_REGEX.is_match(nickname) {
        return Err(ValidationError::InvalidNickname(
            "contains forbidden characters".to_string(),
        ));
    }

    Ok(Some(nickname.to_string()))
}

/// Birth date as unix seconds; must not lie in the future
pub fn validate_birth(birth: Option<i64>, now: DateTime<Utc>) -> ValidationResult<Option<DateTime<Utc>>> {
    let Some(seconds) = birth else {
        return Ok(None);
    };

    let birth = DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| ValidationError::InvalidBirth(format!("{seconds} is out of range")))?;
    if birth > now {
        return Err(ValidationError::InvalidBirth("lies in the future".to_string()));
    }

    Ok(Some(birth))
}

/// Turn a client edit request into a normalized profile update
pub fn validate_profile_update(body: &ProfileUpdateBody) -> ValidationResult<ProfileUpdate> {
    Ok(ProfileUpdate {
        nickname: validate_nickname(body.nickname.as_deref())?,
        birth: validate_birth(body.birth, Utc::now())?,
        gender: body.gender.as_deref().and_then(Gender::parse),
    })
}

/// Trim and bound a client-supplied header value recorded in the audit log
pub fn sanitize_client_field(value: Option<&str>) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => value
            .chars()
            .filter(|c| !c.is_control())
            .take(MAX_CLIENT_FIELD_LENGTH)
            .collect(),
        None => "unknown".to_string(),
    }
}
