//! Configuration module for the ledger client
//!
//! Loaded from a TOML file layered with `LEDGER__*` environment variables
//! (e.g. `LEDGER__RETRY__MAX_ATTEMPTS=5`). A `.env` file is honoured.

use crate::crypto::KdfParams;
use crate::errors::{ClientError, ClientResult};
use crate::invoker::RetryPolicy;
use crate::nonce::{UnboundPolicy, DEFAULT_CAPACITY};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub nonce: NonceConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub subscription: SubscriptionConfig,

    #[serde(default)]
    pub keystore: KeyStoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Address of the ledger node, handed to the transport
    #[serde(default = "default_endpoint_url")]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonceConfig {
    /// Identities tracked before LRU eviction; 0 = unbounded
    #[serde(default = "default_nonce_capacity")]
    pub capacity: usize,

    #[serde(default)]
    pub unbound_policy: UnboundPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Submission attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait between attempts after a nonce conflict
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Bound on total wall-clock time across all attempts
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Items buffered between the stream and the observer
    #[serde(default = "default_subscription_buffer")]
    pub buffer: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStoreBackend {
    #[default]
    Memory,
    File,
    Sled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyStoreConfig {
    #[serde(default)]
    pub backend: KeyStoreBackend,

    /// Directory (file) or database path (sled)
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub kdf: KdfParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_endpoint_url() -> String { "localhost:7845".to_string() }
fn default_nonce_capacity() -> usize { DEFAULT_CAPACITY }
fn default_max_attempts() -> u32 { 3 }
fn default_interval_ms() -> u64 { 1000 }
fn default_subscription_buffer() -> usize { 256 }
fn default_log_level() -> String { "info".to_string() }

impl Default for EndpointConfig {
    fn default() -> Self {
        Self { url: default_endpoint_url() }
    }
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            capacity: default_nonce_capacity(),
            unbound_policy: UnboundPolicy::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
            operation_timeout_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_attempts, Duration::from_millis(self.interval_ms));
        match self.operation_timeout_ms {
            Some(ms) => policy.with_operation_timeout(Duration::from_millis(ms)),
            None => policy,
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { buffer: default_subscription_buffer() }
    }
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            backend: KeyStoreBackend::default(),
            path: None,
            kdf: KdfParams::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load from a TOML file with environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("LEDGER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Config = settings
            .try_deserialize()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse inline TOML without environment layering
    pub fn from_toml_str(content: &str) -> ClientResult<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| ClientError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(ClientError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if matches!(self.retry.operation_timeout_ms, Some(0)) {
            return Err(ClientError::Configuration(
                "retry.operation_timeout_ms must be positive when set".to_string(),
            ));
        }
        if self.subscription.buffer == 0 {
            return Err(ClientError::Configuration(
                "subscription.buffer must be positive".to_string(),
            ));
        }
        let kdf = &self.keystore.kdf;
        if kdf.m_cost == 0 || kdf.t_cost == 0 || kdf.p_cost == 0 {
            return Err(ClientError::Configuration(
                "keystore.kdf costs must be positive".to_string(),
            ));
        }
        if self.keystore.backend != KeyStoreBackend::Memory && self.keystore.path.is_none() {
            return Err(ClientError::Configuration(format!(
                "keystore.path is required for the {:?} backend",
                self.keystore.backend
            )));
        }
        tracing_subscriber::EnvFilter::try_new(&self.logging.level).map_err(|e| {
            ClientError::Configuration(format!("logging.level '{}': {}", self.logging.level, e))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.nonce.capacity, 1000);
        assert_eq!(config.nonce.unbound_policy, UnboundPolicy::Fail);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.policy().interval(), Duration::from_millis(1000));
        assert_eq!(config.keystore.backend, KeyStoreBackend::Memory);
    }

    #[test]
    fn test_inline_overrides() {
        let config = Config::from_toml_str(
            r#"
            [nonce]
            capacity = 0
            unbound_policy = "start_from_zero"

            [retry]
            max_attempts = 5
            interval_ms = 10
            operation_timeout_ms = 2000

            [keystore]
            backend = "sled"
            path = "/tmp/keys"
            "#,
        )
        .unwrap();
        assert_eq!(config.nonce.capacity, 0);
        assert_eq!(config.nonce.unbound_policy, UnboundPolicy::StartFromZero);
        let policy = config.retry.policy();
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.operation_timeout(), Some(Duration::from_millis(2000)));
    }

    #[test]
    fn test_validation_failures() {
        for bad in [
            "[retry]\nmax_attempts = 0",
            "[keystore]\nbackend = \"file\"",
            "[keystore.kdf]\nm_cost = 0\nt_cost = 1\np_cost = 1",
            "[subscription]\nbuffer = 0",
            "[logging]\nlevel = \"info,ledger=loud\"",
        ] {
            let err = Config::from_toml_str(bad).unwrap_err();
            assert_eq!(err.category(), "config", "accepted: {}", bad);
        }
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[retry]\ninterval_ms = 25").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.retry.interval_ms, 25);
    }
}
