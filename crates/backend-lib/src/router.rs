// ============================
// crates/backend-lib/src/router.rs
// ============================
//! HTTP router.
use std::sync::Arc;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{health, user};
use crate::middleware::require_token;
use crate::AppState;

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let gated = Router::new()
        .route("/edit", post(user::edit_profile))
        .route("/logout", post(user::logout))
        .route("/sessions", get(user::sessions))
        .route_layer(from_fn_with_state(state.clone(), require_token));

    let users = Router::new()
        .route("/register", post(user::register))
        .route("/login", post(user::login))
        .route("/update-psw", post(user::update_password))
        .route("/profile", get(user::profile))
        .merge(gated);

    Router::new()
        .route("/health", get(health))
        .nest("/api/user", users)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
