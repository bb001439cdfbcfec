// ============================
// crates/backend-lib/src/auth/token.rs
// ============================
//! Signed bearer tokens.
//!
//! Tokens are HS256 JWTs. [`TokenCodec::verify`] only proves the token was
//! signed by us and decodes its claims; the validity window and pool
//! membership are checked separately so callers can tell a forged token from
//! an expired or revoked one.
use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use keygate_common::AccountId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::token_generator::generate_token_id;

/// Issuer written into every token
pub const DEFAULT_ISSUER: &str = "org.kirisakiii.neko";

/// Subject written into every token
pub const TOKEN_SUBJECT: &str = "BearerToken";

/// Default token lifetime (7 days)
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Token encoding and decoding failures
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Payload of a bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub uid: AccountId,
    pub username: String,
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
}

/// A freshly signed token together with the claims inside it
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

/// `not_before <= now <= expires_at`
pub fn is_within_window(claims: &TokenClaims, now: DateTime<Utc>) -> bool {
    let now = now.timestamp();
    claims.nbf <= now && now <= claims.exp
}

/// Signs and verifies bearer tokens with a shared secret
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    validation: Validation,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8], issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        // Time bounds are checked by `is_within_window`
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims = ["exp", "nbf", "iss", "sub"]
            .into_iter()
            .map(String::from)
            .collect::<HashSet<_>>();
        validation.set_issuer(&[issuer.as_str()]);
        validation.sub = Some(TOKEN_SUBJECT.to_string());

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer,
            validation,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign a token valid from now for `ttl`
    pub fn issue(
        &self,
        account_id: AccountId,
        username: &str,
        ttl: Duration,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(account_id, username, ttl, Utc::now())
    }

    /// Sign a token valid from `now` for `ttl`
    pub fn issue_at(
        &self,
        account_id: AccountId,
        username: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let issued_at = now.timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| TokenError::Signing(format!("ttl of {ttl:?} is out of range")))?;
        let expires_at = issued_at
            .checked_add(ttl_secs)
            .ok_or_else(|| TokenError::Signing(format!("ttl of {ttl:?} is out of range")))?;

        let claims = TokenClaims {
            uid: account_id,
            username: username.to_string(),
            iss: self.issuer.clone(),
            sub: TOKEN_SUBJECT.to_string(),
            iat: issued_at,
            nbf: issued_at,
            exp: expires_at,
            jti: generate_token_id(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken { token, claims })
    }

    /// Check the signature and decode the claims. Does not look at time.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let data = decode::<TokenClaims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    TokenError::InvalidSignature
                },
                _ => TokenError::Malformed(e.to_string()),
            }
        })?;

        let claims = data.claims;
        if !(claims.iat <= claims.nbf && claims.nbf <= claims.exp) {
            return Err(TokenError::Malformed(
                "claims violate iat <= nbf <= exp".to_string(),
            ));
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use chrono::TimeDelta;

    const SECRET: &[u8] = b"unit-test-secret-that-is-32-bytes!!";

    fn codec() -> TokenCodec {
        TokenCodec::new(SECRET, DEFAULT_ISSUER)
    }

    #[test]
    fn test_issue_then_verify() {
        let codec = codec();
        let issued = codec.issue(42, "alice", DEFAULT_TOKEN_TTL).unwrap();

        // Three dot-separated parts
        assert_eq!(issued.token.split('.').count(), 3);

        let claims = codec.verify(&issued.token).unwrap();
        assert_eq!(claims.uid, 42);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.iss, DEFAULT_ISSUER);
        assert_eq!(claims.sub, TOKEN_SUBJECT);
        assert_eq!(claims, issued.claims);
    }

    #[test]
    fn test_claims_window_layout() {
        let now = Utc::now();
        let issued = codec()
            .issue_at(1, "alice", Duration::from_secs(3600), now)
            .unwrap();

        assert_eq!(issued.claims.iat, now.timestamp());
        assert_eq!(issued.claims.nbf, issued.claims.iat);
        assert_eq!(issued.claims.exp, issued.claims.iat + 3600);
    }

    #[test]
    fn test_token_ids_are_unique() {
        let codec = codec();
        let a = codec.issue(1, "alice", DEFAULT_TOKEN_TTL).unwrap();
        let b = codec.issue(1, "alice", DEFAULT_TOKEN_TTL).unwrap();
        assert_ne!(a.claims.jti, b.claims.jti);
        assert_ne!(a.token, b.token);
    }

    #[test]
    fn test_foreign_secret_is_invalid_signature() {
        let foreign = TokenCodec::new(b"some-other-secret-of-sufficient-len", DEFAULT_ISSUER);
        let issued = foreign.issue(1, "mallory", DEFAULT_TOKEN_TTL).unwrap();

        assert!(matches!(
            codec().verify(&issued.token),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let codec = codec();
        let issued = codec.issue(1, "alice", DEFAULT_TOKEN_TTL).unwrap();

        let mut forged_claims = issued.claims.clone();
        forged_claims.uid = 1337;
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());

        let parts: Vec<&str> = issued.token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], payload, parts[2]);

        assert!(matches!(
            codec.verify(&forged),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let codec = codec();
        assert!(matches!(codec.verify(""), Err(TokenError::Malformed(_))));
        assert!(matches!(
            codec.verify("not-a-token"),
            Err(TokenError::Malformed(_))
        ));
        assert!(matches!(
            codec.verify("a.b.c"),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_other_issuer_is_malformed() {
        let other = TokenCodec::new(SECRET, "com.example.other");
        let issued = other.issue(1, "alice", DEFAULT_TOKEN_TTL).unwrap();

        assert!(matches!(
            codec().verify(&issued.token),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_verify_ignores_expiry() {
        let codec = codec();
        let long_ago = Utc::now() - TimeDelta::days(30);
        let issued = codec
            .issue_at(7, "bob", Duration::from_secs(60), long_ago)
            .unwrap();

        let claims = codec.verify(&issued.token).unwrap();
        assert_eq!(claims.uid, 7);
        assert!(!is_within_window(&claims, Utc::now()));
    }

    #[test]
    fn test_window_bounds() {
        let now = Utc::now();
        let issued = codec()
            .issue_at(1, "alice", Duration::from_secs(100), now)
            .unwrap();
        let claims = issued.claims;

        assert!(is_within_window(&claims, now));
        assert!(is_within_window(&claims, now + TimeDelta::seconds(100)));
        assert!(!is_within_window(&claims, now + TimeDelta::seconds(101)));
        assert!(!is_within_window(&claims, now - TimeDelta::seconds(1)));
    }
}
