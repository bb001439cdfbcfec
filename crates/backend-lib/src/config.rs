// ============================
// crates/backend-lib/src/config.rs
// ============================
//! Configuration management.
//!
//! Sources, later ones winning: built-in defaults, a TOML file, then
//! `KEYGATE_` environment variables (`__` separates nested keys, e.g.
//! `KEYGATE_TOKEN__SECRET`).
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::auth::password::{CredentialHasher, PasswordPolicy};
use crate::auth::pool::MAX_TOKENS_PER_USER;
use crate::auth::token::{DEFAULT_ISSUER, DEFAULT_TOKEN_TTL};
use crate::auth::token_generator::DEFAULT_SALT_LENGTH;

/// Default configuration file
pub const DEFAULT_CONFIG_FILE: &str = "keygate.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "KEYGATE_";

/// Shortest accepted signing secret, in bytes
pub const MIN_SECRET_LENGTH: usize = 32;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Data directory path
    pub data_dir: PathBuf,
    /// Log level
    pub log_level: String,
    pub log_format: LogFormat,
    pub token: TokenSettings,
    pub password: PasswordPolicy,
    pub hashing: HashingSettings,
    pub storage: StorageSettings,
}

/// Bearer token settings
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenSettings {
    /// HMAC signing secret
    pub secret: String,
    pub issuer: String,
    pub ttl_secs: u64,
    /// Live tokens allowed per account
    pub max_per_user: usize,
    /// Seconds between expired-token sweeps; 0 disables the sweep
    pub purge_interval_secs: u64,
}

// Keep the secret out of logs
impl std::fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSettings")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("ttl_secs", &self.ttl_secs)
            .field("max_per_user", &self.max_per_user)
            .field("purge_interval_secs", &self.purge_interval_secs)
            .finish()
    }
}

/// Scrypt cost parameters and salt size
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashingSettings {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
    pub salt_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Deadline for a single storage call
    pub timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            data_dir: PathBuf::from("data"),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            token: TokenSettings::default(),
            password: PasswordPolicy::default(),
            hashing: HashingSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: DEFAULT_ISSUER.to_string(),
            ttl_secs: DEFAULT_TOKEN_TTL.as_secs(),
            max_per_user: MAX_TOKENS_PER_USER,
            purge_interval_secs: 300,
        }
    }
}

impl Default for HashingSettings {
    fn default() -> Self {
        Self {
            log_n: 15,
            r: 8,
            p: 1,
            salt_length: DEFAULT_SALT_LENGTH,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

impl Settings {
    /// Provider chain rooted at `path`
    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load from [`DEFAULT_CONFIG_FILE`] and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific TOML file and the environment, then validate
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let settings: Settings = Self::figment(path)
            .extract()
            .with_context(|| format!("failed to load settings from {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            bail!("unknown log level `{}`", self.log_level);
        }
        if self.token.secret.len() < MIN_SECRET_LENGTH {
            bail!("token.secret must be at least {MIN_SECRET_LENGTH} bytes");
        }
        if self.token.issuer.is_empty() {
            bail!("token.issuer must not be empty");
        }
        if self.token.ttl_secs == 0 {
            bail!("token.ttl_secs must be positive");
        }
        if self.token.max_per_user == 0 {
            bail!("token.max_per_user must be positive");
        }
        if self.password.min_length == 0 || self.password.min_length > self.password.max_length {
            bail!(
                "password bounds {}..={} are invalid",
                self.password.min_length,
                self.password.max_length
            );
        }
        if self.hashing.salt_length == 0 {
            bail!("hashing.salt_length must be positive");
        }
        if self.storage.timeout_ms == 0 {
            bail!("storage.timeout_ms must be positive");
        }
        self.hasher()?;
        Ok(())
    }

    pub fn hasher(&self) -> Result<CredentialHasher> {
        CredentialHasher::new(self.hashing.log_n, self.hashing.r, self.hashing.p)
            .context("invalid scrypt parameters")
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token.ttl_secs)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.timeout_ms)
    }

    /// `None` when the sweep is disabled
    pub fn purge_interval(&self) -> Option<Duration> {
        (self.token.purge_interval_secs > 0)
            .then(|| Duration::from_secs(self.token.purge_interval_secs))
    }
}
