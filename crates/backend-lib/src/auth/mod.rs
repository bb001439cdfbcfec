// ============================
// crates/backend-lib/src/auth/mod.rs
// ============================
//! Authentication module.

pub mod password;
pub mod pool;
pub mod token;
pub mod token_generator;
mod service;
mod service_impl;

pub use password::{
    validate_password, validate_username, CredentialHasher, HashError, PasswordPolicy,
    MAX_PASSWORD_LENGTH, MIN_PASSWORD_LENGTH,
};
pub use pool::{PoolError, TokenPool, MAX_TOKENS_PER_USER};
pub use service::AuthService;
pub use service_impl::DefaultAuth;
pub use token::{is_within_window, IssuedToken, TokenClaims, TokenCodec, TokenError};
pub use token_generator::{generate_salt, generate_token_id, EntropyError};
