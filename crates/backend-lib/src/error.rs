// crates/backend-lib/src/error.rs

//! Central error types + Axum integration.
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use keygate_common::{ErrorBody, ErrorEnvelope};
use thiserror::Error;

use crate::auth::password::HashError;
use crate::auth::pool::PoolError;
use crate::auth::token::TokenError;
use crate::auth::token_generator::EntropyError;
use crate::middleware::auth_gate::GateRejection;
use crate::validation::ValidationError;

/// Failure of a persistence collaborator
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Conflicting record: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Storage deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Why a freshly authenticated login could not be turned into a live token
#[derive(Error, Debug)]
pub enum IssuanceError {
    #[error("signing failed: {0}")]
    Signing(#[from] TokenError),

    #[error("pool admission failed: {0}")]
    Admission(#[from] PoolError),
}

/// Broad class of an [`AuthError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Bad input format, user-correctable
    Validation,
    /// Wrong credentials or unknown account
    Authentication,
    /// Token signing or admission
    Token,
    /// Persistence fault
    Storage,
    /// Hashing or entropy fault
    Internal,
}

/// Errors of the authentication service
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid username")]
    InvalidUsername,

    #[error("invalid password")]
    InvalidPassword,

    #[error("username already exists")]
    UsernameTaken,

    #[error("user does not exist")]
    NoSuchAccount,

    #[error("password error")]
    WrongPassword,

    #[error("password hashing failed: {0}")]
    Hashing(HashError),

    #[error("salt generation failed: {0}")]
    Entropy(#[from] EntropyError),

    #[error("token issuance failed: {0}")]
    TokenIssuance(#[from] IssuanceError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("{primary} (audit log write also failed: {audit})")]
    AuditFailed {
        primary: Box<AuthError>,
        #[source]
        audit: StorageError,
    },
}

impl AuthError {
    /// Attach a failed audit write to the error that triggered it
    pub fn with_audit_failure(self, audit: StorageError) -> Self {
        AuthError::AuditFailed {
            primary: Box::new(self),
            audit,
        }
    }

    /// The error that caused the request to fail, ignoring audit faults
    pub fn primary(&self) -> &AuthError {
        match self {
            AuthError::AuditFailed { primary, .. } => primary.primary(),
            other => other,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self.primary() {
            AuthError::InvalidUsername | AuthError::InvalidPassword => FailureClass::Validation,
            AuthError::UsernameTaken | AuthError::NoSuchAccount | AuthError::WrongPassword => {
                FailureClass::Authentication
            },
            AuthError::TokenIssuance(_) => FailureClass::Token,
            AuthError::Storage(_) => FailureClass::Storage,
            _ => FailureClass::Internal,
        }
    }

    /// Stable reason string shown to clients and written to the audit log
    pub fn reason(&self) -> &'static str {
        match self.primary() {
            AuthError::InvalidUsername => "invalid username",
            AuthError::InvalidPassword => "invalid password",
            AuthError::UsernameTaken => "username already exists",
            AuthError::NoSuchAccount => "user does not exist",
            AuthError::WrongPassword => "password error",
            AuthError::TokenIssuance(IssuanceError::Signing(_)) => "token generation error",
            AuthError::TokenIssuance(IssuanceError::Admission(_)) => "token creation error",
            AuthError::Storage(_) => "storage error",
            _ => "server error",
        }
    }
}

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Gate(#[from] GateRejection),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(err) => match err.primary() {
                AuthError::UsernameTaken => StatusCode::CONFLICT,
                AuthError::NoSuchAccount | AuthError::WrongPassword => StatusCode::UNAUTHORIZED,
                AuthError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
                other if other.class() == FailureClass::Validation => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Gate(GateRejection::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Gate(_) => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) | AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Auth(err) => match err.primary() {
                AuthError::InvalidUsername => "VAL_001",
                AuthError::InvalidPassword => "VAL_002",
                AuthError::UsernameTaken => "ACC_001",
                AuthError::NoSuchAccount => "ACC_002",
                AuthError::WrongPassword => "AUTH_001",
                AuthError::TokenIssuance(_) => "TOKEN_001",
                AuthError::Storage(_) => "STORE_001",
                _ => "INT_001",
            },
            AppError::Gate(rejection) => rejection.code(),
            AppError::Validation(_) | AppError::InvalidInput(_) => "VAL_003",
            AppError::NotFound(_) => "NF_001",
            AppError::Internal(_) => "INT_001",
        }
    }

    /// Get a sanitized message suitable for clients
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::Auth(err) => err.reason().to_string(),
            AppError::Gate(rejection) => rejection.reason().to_string(),
            // Describes the client's own input
            AppError::Validation(err) => err.to_string(),
            AppError::InvalidInput(_) => "Invalid input provided".to_string(),
            AppError::NotFound(_) => "Resource not found".to_string(),
            AppError::Internal(_) => "An internal server error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.error_code(), "request rejected");
        }

        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.error_code().to_string(),
                message: self.sanitized_message(),
            },
        };

        let mut response = (status, axum::Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_auth_error_reasons_are_stable() {
        assert_eq!(AuthError::WrongPassword.reason(), "password error");
        assert_eq!(AuthError::UsernameTaken.reason(), "username already exists");
        assert_eq!(
            AuthError::TokenIssuance(IssuanceError::Signing(TokenError::Signing(
                "boom".to_string()
            )))
            .reason(),
            "token generation error"
        );
        assert_eq!(
            AuthError::TokenIssuance(IssuanceError::Admission(PoolError::NotFound)).reason(),
            "token creation error"
        );
    }

    #[test]
    fn test_audit_failure_keeps_primary() {
        let audit = StorageError::Io(IoError::new(ErrorKind::Other, "disk full"));
        let err = AuthError::WrongPassword.with_audit_failure(audit);

        assert!(matches!(err.primary(), AuthError::WrongPassword));
        assert_eq!(err.reason(), "password error");
        assert_eq!(err.class(), FailureClass::Authentication);

        // Both failures show up in the message
        let text = err.to_string();
        assert!(text.contains("password error"));
        assert!(text.contains("disk full"));
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            AppError::from(AuthError::InvalidUsername).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(AuthError::UsernameTaken).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(AuthError::WrongPassword).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(GateRejection::Revoked).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(AuthError::Storage(StorageError::DeadlineExceeded(
                Duration::from_millis(5)
            )))
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::NotFound("test".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_app_error_error_codes() {
        assert_eq!(AppError::from(AuthError::WrongPassword).error_code(), "AUTH_001");
        assert_eq!(AppError::from(AuthError::InvalidPassword).error_code(), "VAL_002");
        assert_eq!(AppError::from(GateRejection::Expired).error_code(), "TOKEN_005");
        assert_eq!(AppError::Internal("test".to_string()).error_code(), "INT_001");
    }

    #[test]
    fn test_sanitized_message_hides_internal_cause() {
        let err = AppError::from(AuthError::Storage(StorageError::Unavailable(
            "postgres://admin:secret@db".to_string(),
        )));
        assert_eq!(err.sanitized_message(), "storage error");

        let internal = AppError::Internal("Database connection failed with password: dbpass123".to_string());
        assert_eq!(internal.sanitized_message(), "An internal server error occurred");
    }

    #[tokio::test]
    async fn test_error_serialization() {
        let response = AppError::from(GateRejection::MissingToken).into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
        assert!(response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("application/json"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let envelope: ErrorEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope.error.code, "TOKEN_002");
        assert_eq!(envelope.error.message, "bearer token is required");
    }
}
