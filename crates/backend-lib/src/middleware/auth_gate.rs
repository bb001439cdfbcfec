// crates/backend-lib/src/middleware/auth_gate.rs

//! Per-request bearer token guard.
//!
//! Checks run cheapest first: header format, signature, validity window, and
//! only then pool membership, so forged tokens never reach the token store.
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;

use crate::auth::pool::{PoolError, TokenPool};
use crate::auth::token::{is_within_window, TokenClaims, TokenCodec, TokenError};
use crate::error::{AppError, StorageError};
use crate::metrics::GATE_REJECTED;
use crate::AppState;

/// Scheme prefix of the `Authorization` header
pub const BEARER_PREFIX: &str = "Bearer ";

/// Why a request was turned away
#[derive(Error, Debug)]
pub enum GateRejection {
    #[error("missing bearer token")]
    MissingToken,

    #[error("malformed bearer token")]
    MalformedToken,

    #[error("invalid token signature")]
    InvalidSignature,

    #[error("token expired or not yet valid")]
    Expired,

    #[error("token revoked")]
    Revoked,

    #[error("token pool unavailable: {0}")]
    Unavailable(StorageError),
}

impl GateRejection {
    pub fn code(&self) -> &'static str {
        match self {
            GateRejection::MissingToken => "TOKEN_002",
            GateRejection::MalformedToken => "TOKEN_003",
            GateRejection::InvalidSignature => "TOKEN_004",
            GateRejection::Expired => "TOKEN_005",
            GateRejection::Revoked => "TOKEN_006",
            GateRejection::Unavailable(_) => "STORE_001",
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            GateRejection::MissingToken => "bearer token is required",
            GateRejection::MalformedToken => "bearer token is invalid",
            GateRejection::InvalidSignature => "bearer token signature is invalid",
            GateRejection::Expired => "bearer token is expired",
            GateRejection::Revoked => "bearer token is not available",
            GateRejection::Unavailable(_) => "server error",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            GateRejection::MissingToken => "missing",
            GateRejection::MalformedToken => "malformed",
            GateRejection::InvalidSignature => "signature",
            GateRejection::Expired => "expired",
            GateRejection::Revoked => "revoked",
            GateRejection::Unavailable(_) => "unavailable",
        }
    }
}

/// Verified identity attached to an accepted request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: TokenClaims,
    pub token: String,
}

/// Decides whether a presented `Authorization` header is acceptable
pub struct AuthGate {
    codec: Arc<TokenCodec>,
    pool: Arc<TokenPool>,
}

impl AuthGate {
    pub fn new(codec: Arc<TokenCodec>, pool: Arc<TokenPool>) -> Self {
        Self { codec, pool }
    }

    pub async fn authorize(&self, header: Option<&str>) -> Result<AuthContext, GateRejection> {
        self.authorize_at(header, Utc::now()).await
    }

    pub async fn authorize_at(
        &self,
        header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AuthContext, GateRejection> {
        let result = self.check(header, now).await;
        if let Err(rejection) = &result {
            counter!(GATE_REJECTED, "reason" => rejection.label()).increment(1);
        }
        result
    }

    async fn check(
        &self,
        header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AuthContext, GateRejection> {
        let header = header.ok_or(GateRejection::MissingToken)?;
        let token = header
            .strip_prefix(BEARER_PREFIX)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(GateRejection::MalformedToken)?;

        let claims = self.codec.verify(token).map_err(|e| match e {
            TokenError::InvalidSignature => GateRejection::InvalidSignature,
            TokenError::Malformed(_) | TokenError::Signing(_) => GateRejection::MalformedToken,
        })?;

        if !is_within_window(&claims, now) {
            return Err(GateRejection::Expired);
        }

        match self.pool.is_live(token).await {
            Ok(true) => {},
            Ok(false) => return Err(GateRejection::Revoked),
            Err(PoolError::Storage(e)) => return Err(GateRejection::Unavailable(e)),
            Err(e) => return Err(GateRejection::Unavailable(StorageError::Unavailable(e.to_string()))),
        }

        Ok(AuthContext {
            claims,
            token: token.to_string(),
        })
    }
}

/// Axum middleware that rejects requests without a live bearer token and
/// attaches the [`AuthContext`] to accepted ones
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = match request.headers().get(AUTHORIZATION) {
        None => None,
        Some(value) => Some(value.to_str().map_err(|_| GateRejection::MalformedToken)?),
    };

    let context = state.gate.authorize(header).await?;
    tracing::debug!(
        account_id = context.claims.uid,
        username = %context.claims.username,
        "request authorized"
    );

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}
