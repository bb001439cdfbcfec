//! HTTP handlers.

pub mod user;

use axum::Json;
use keygate_common::MessageResponse;

/// Liveness probe
pub async fn health() -> Json<MessageResponse> {
    Json(MessageResponse::new("ok"))
}
