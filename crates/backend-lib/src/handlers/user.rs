// ============================
// crates/backend-lib/src/handlers/user.rs
// ============================
//! `/api/user` endpoints.
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    Extension, Json,
};
use keygate_common::{
    ChangePasswordBody, CredentialsBody, MessageResponse, ProfileQuery, ProfileResponse,
    ProfileUpdateBody, SessionSummary, TokenResponse,
};

use crate::error::{AppError, AuthError};
use crate::middleware::AuthContext;
use crate::models::ClientInfo;
use crate::validation::{sanitize_client_field, validate_profile_update, ValidationError};
use crate::AppState;

/// Header carrying a client-chosen device name
pub const DEVICE_HEADER: &str = "x-client-device";

/// Describe the caller for the audit log
pub fn client_info(headers: &HeaderMap) -> ClientInfo {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let source = header("x-real-ip").or_else(|| {
        header("x-forwarded-for").and_then(|list| list.split(',').next())
    });

    ClientInfo {
        source_addr: sanitize_client_field(source),
        device: sanitize_client_field(header(DEVICE_HEADER)),
        application: sanitize_client_field(header(USER_AGENT.as_str())),
    }
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CredentialsBody>,
) -> Result<(StatusCode, Json<ProfileResponse>), AppError> {
    let account = state.auth.register(&body.username, &body.password).await?;
    Ok((StatusCode::CREATED, Json(account.into())))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CredentialsBody>,
) -> Result<Json<TokenResponse>, AppError> {
    let client = client_info(&headers);
    let token = state
        .auth
        .login(&body.username, &body.password, &client)
        .await?;
    Ok(Json(TokenResponse { token }))
}

pub async fn update_password(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChangePasswordBody>,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .auth
        .change_password(&body.username, &body.password, &body.new_password)
        .await?;
    Ok(Json(MessageResponse::new("password updated")))
}

pub async fn profile(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProfileQuery>,
) -> Result<Json<ProfileResponse>, AppError> {
    let found = match (query.uid, query.username.as_deref()) {
        (Some(uid), _) => state.auth.profile_by_id(uid).await,
        (None, Some(username)) => state.auth.profile_by_username(username).await,
        (None, None) => {
            return Err(ValidationError::InvalidQuery("uid or username is required".to_string()).into())
        },
    };

    match found {
        Ok(account) => Ok(Json(account.into())),
        Err(AuthError::NoSuchAccount) => Err(AppError::NotFound("account".to_string())),
        Err(e) => Err(e.into()),
    }
}

pub async fn edit_profile(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Json(body): Json<ProfileUpdateBody>,
) -> Result<Json<ProfileResponse>, AppError> {
    let update = validate_profile_update(&body)?;
    let account = state.auth.update_profile(context.claims.uid, update).await?;
    Ok(Json(account.into()))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<MessageResponse>, AppError> {
    state.auth.logout(&context.token).await?;
    Ok(Json(MessageResponse::new("logged out")))
}

pub async fn sessions(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<Vec<SessionSummary>>, AppError> {
    let tokens = state.auth.sessions(context.claims.uid).await?;
    let summaries = tokens
        .into_iter()
        .map(|t| SessionSummary {
            issued_at: t.issued_at,
            expires_at: t.expires_at,
            current: t.token == context.token,
        })
        .collect();
    Ok(Json(summaries))
}
