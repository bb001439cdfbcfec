// ============================
// crates/backend-lib/src/auth/password.rs
// ============================
//! Password hashing, verification and format policy.
use std::sync::LazyLock;

use rand::{rngs::OsRng, TryRngCore};
use regex::Regex;
use scrypt::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Params, Scrypt,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Minimum password length
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Maximum password length
pub const MAX_PASSWORD_LENGTH: usize = 32;

static USERNAME_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9_]+$").unwrap());
static PASSWORD_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^[a-zA-Z0-9!@#$%^&*()_+={}\[\]:;'"<>,.?/|\\~-]+$"#).unwrap()
});

/// Hashing and verification failures
#[derive(Error, Debug)]
pub enum HashError {
    #[error("hashing failed: {0}")]
    Hashing(String),

    #[error("stored hash is unreadable: {0}")]
    Corrupt(String),

    #[error("password mismatch")]
    Mismatch,
}

/// Password length requirements
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: MIN_PASSWORD_LENGTH,
            max_length: MAX_PASSWORD_LENGTH,
        }
    }
}

/// Check a username: lowercase letters, digits and underscore only
pub fn validate_username(username: &str) -> bool {
    USERNAME_REGEX.is_match(username)
}

/// Check a password against the length policy and the allowed character set
pub fn validate_password(password: &str, policy: &PasswordPolicy) -> bool {
    let len = password.chars().count();
    if len < policy.min_length || len > policy.max_length {
        return false;
    }

    PASSWORD_REGEX.is_match(password)
}

/// Scrypt over `password || salt`.
///
/// The per-account salt is mixed into the input; scrypt adds its own random
/// PHC salt on top, so hashing the same input twice gives different strings.
#[derive(Debug, Clone, Copy)]
pub struct CredentialHasher {
    params: Params,
}

impl Default for CredentialHasher {
    fn default() -> Self {
        Self {
            params: Params::recommended(),
        }
    }
}

impl CredentialHasher {
    /// Create a hasher with explicit scrypt cost parameters
    pub fn new(log_n: u8, r: u32, p: u32) -> Result<Self, HashError> {
        let params = Params::new(log_n, r, p, Params::RECOMMENDED_LEN)
            .map_err(|e| HashError::Hashing(e.to_string()))?;
        Ok(Self { params })
    }

    /// Hash a password with the account's salt
    pub fn hash(&self, password: &str, salt: &str) -> Result<String, HashError> {
        let material = salted(password, salt);
        let mut salt_bytes = [0u8; 16];
        OsRng
            .try_fill_bytes(&mut salt_bytes)
            .map_err(|e| HashError::Hashing(e.to_string()))?;
        let phc_salt =
            SaltString::encode_b64(&salt_bytes).map_err(|e| HashError::Hashing(e.to_string()))?;
        let hash = Scrypt
            .hash_password_customized(&material, None, None, self.params, &phc_salt)
            .map_err(|e| HashError::Hashing(e.to_string()))?
            .to_string();
        Ok(hash)
    }

    /// Verify a password against a stored hash.
    ///
    /// The digest comparison inside `password_hash` is constant-time.
    pub fn verify(&self, hash: &str, password: &str, salt: &str) -> Result<(), HashError> {
        let parsed = PasswordHash::new(hash).map_err(|e| HashError::Corrupt(e.to_string()))?;
        let material = salted(password, salt);
        match Scrypt.verify_password(&material, &parsed) {
            Ok(()) => Ok(()),
            Err(scrypt::password_hash::Error::Password) => Err(HashError::Mismatch),
            Err(e) => Err(HashError::Corrupt(e.to_string())),
        }
    }
}

fn salted(password: &str, salt: &str) -> Zeroizing<Vec<u8>> {
    let mut material = Zeroizing::new(Vec::with_capacity(password.len() + salt.len()));
    material.extend_from_slice(password.as_bytes());
    material.extend_from_slice(salt.as_bytes());
    material
}
