// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for Prometheus metric keys
pub const LOGIN_SUCCEEDED: &str = "login.succeeded";
pub const LOGIN_FAILED: &str = "login.failed";
pub const ACCOUNT_REGISTERED: &str = "account.registered";
pub const TOKEN_ADMITTED: &str = "token.admitted";
pub const TOKEN_EVICTED: &str = "token.evicted";
pub const TOKEN_REVOKED: &str = "token.revoked";
pub const TOKEN_PURGED: &str = "token.purged";
pub const GATE_REJECTED: &str = "gate.rejected";
pub const AUDIT_WRITE_FAILED: &str = "audit.write_failed";
