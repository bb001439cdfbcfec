// crates/backend-lib/src/middleware/mod.rs

//! Request middleware.

pub mod auth_gate;

pub use auth_gate::{require_token, AuthContext, AuthGate, GateRejection};
