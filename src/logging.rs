//! Logging setup and per-operation structured logging

use crate::config::LoggingConfig;
use crate::errors::ClientError;
use crate::types::{AccountAddress, TxHash};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

/// Install the global subscriber
///
/// `RUST_LOG` wins over `config.level`. Returns `false` if a subscriber was
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };
    installed.is_ok()
}

/// Correlation ID for tracking one logical operation across attempts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structured logger for one invocation and its retries
#[derive(Debug, Clone)]
pub struct OperationLogger {
    correlation_id: CorrelationId,
    operation: &'static str,
    address: AccountAddress,
}

impl OperationLogger {
    pub fn new(operation: &'static str, address: AccountAddress) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            operation,
            address,
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn log_attempt(&self, attempt: u32, nonce: u64) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            operation = self.operation,
            address = %self.address,
            attempt,
            nonce,
            "Submitting transaction"
        );
    }

    pub fn log_success(&self, attempt: u32, hash: &TxHash, latency_ms: u64) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            operation = self.operation,
            address = %self.address,
            attempt,
            tx_hash = %hash,
            latency_ms,
            "Transaction accepted"
        );
    }

    pub fn log_conflict(&self, attempt: u32, submitted: u64, expected: Option<u64>) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            operation = self.operation,
            address = %self.address,
            attempt,
            submitted,
            expected = ?expected,
            "Nonce conflict"
        );
    }

    pub fn log_rebind(&self, nonce: u64) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            address = %self.address,
            nonce,
            "Rebound nonce from account state"
        );
    }

    pub fn log_exhausted(&self, attempts: u32) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            operation = self.operation,
            address = %self.address,
            attempts,
            "Nonce conflict retries exhausted"
        );
    }

    pub fn log_failure(&self, attempt: u32, error: &ClientError) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            operation = self.operation,
            address = %self.address,
            attempt,
            category = error.category(),
            error = %error,
            "Invocation failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_ids_are_unique() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        let config = LoggingConfig::default();
        let first = init_logging(&config);
        // A second install must not panic, only report that it was skipped
        assert!(!init_logging(&config) || !first);
    }
}
