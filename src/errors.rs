//! Error taxonomy for the orchestration core
//!
//! Every terminal failure carries a kind, a message and, where it applies,
//! the offending field or identity. Callers use [`ClientError::disposition`]
//! to tell "fix your input" apart from "try again later" and "give up".
//!
//! Only [`ClientError::NonceConflict`] is ever retried locally, and only by
//! the invoker. Validation and misuse errors never enter the retry loop.

use crate::types::AccountAddress;
use thiserror::Error;

/// What a caller should do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Local input was rejected; resubmitting the same request will fail again
    FixInput,
    /// Conditions may change; the same request can be issued later
    RetryLater,
    /// The remote side refused the request or the client is misconfigured
    GiveUp,
}

/// Errors raised by key stores
#[derive(Debug, Clone, Error, PartialEq)]
pub enum KeyStoreError {
    /// No key is stored under the identity
    #[error("No key stored for identity {0}")]
    NotFound(String),

    /// A key is already stored under the identity
    #[error("Key already stored for identity {0}")]
    AlreadyExists(String),

    /// Password did not decrypt the stored key
    #[error("Wrong password for identity {0}")]
    WrongPassword(String),

    /// Address identity does not belong to the supplied key
    #[error("Identity {0} does not match the key's address")]
    IdentityMismatch(String),

    /// Filesystem failure
    #[error("Key store I/O error: {0}")]
    Io(String),

    /// Stored record could not be decoded
    #[error("Corrupted key record for {identity}: {reason}")]
    Corrupted { identity: String, reason: String },

    /// Backend (embedded database) failure
    #[error("Key store backend error: {0}")]
    Backend(String),
}

/// Core client errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    /// Local validation failure naming the offending field
    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// Nonce allocation requested for an identity that was never bound (or was evicted)
    #[error("No nonce bound for identity {0}")]
    UnboundIdentity(AccountAddress),

    /// The account's nonce sequence has reached `u64::MAX`
    #[error("Nonce space exhausted for identity {0}")]
    NonceExhausted(AccountAddress),

    /// Remote endpoint rejected the submitted nonce
    #[error("Nonce conflict for {address}: submitted {submitted}, expected {expected:?}")]
    NonceConflict {
        address: AccountAddress,
        submitted: u64,
        expected: Option<u64>,
    },

    /// Nonce conflicts persisted for every allowed attempt
    #[error("Retry exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        last: Box<ClientError>,
    },

    /// Remote endpoint refused the request for any reason other than a nonce conflict
    #[error("Remote error: {0}")]
    Remote(String),

    /// Transport-level failure talking to the endpoint
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation exceeded its overall deadline
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Terminal fault on a push stream
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Key store failure
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    /// Signing capability failure
    #[error("Signing error: {0}")]
    Signing(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Create an invalid-field error
    pub fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Create a missing-field error
    pub fn missing_field(field: &'static str) -> Self {
        Self::InvalidField {
            field,
            reason: "required field is missing".to_string(),
        }
    }

    /// Name of the offending field, if this is a validation failure
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidField { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Identity involved in the failure, if any
    pub fn identity(&self) -> Option<&AccountAddress> {
        match self {
            Self::UnboundIdentity(address) | Self::NonceExhausted(address) => Some(address),
            Self::NonceConflict { address, .. } => Some(address),
            Self::RetryExhausted { last, .. } => last.identity(),
            _ => None,
        }
    }

    /// Only nonce conflicts are retried, and only by the invoker
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NonceConflict { .. })
    }

    /// Whether this is the marker for exhausted nonce-conflict retries
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidField { .. } => "invalid_field",
            Self::UnboundIdentity(_) => "unbound_identity",
            Self::NonceExhausted(_) => "nonce_exhausted",
            Self::NonceConflict { .. } => "nonce_conflict",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::Remote(_) => "remote",
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::Subscription(_) => "subscription",
            Self::KeyStore(_) => "keystore",
            Self::Signing(_) => "signing",
            Self::Configuration(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Tell the caller what to do next
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::InvalidField { .. } | Self::UnboundIdentity(_) => Disposition::FixInput,
            Self::KeyStore(KeyStoreError::WrongPassword(_))
            | Self::KeyStore(KeyStoreError::NotFound(_))
            | Self::KeyStore(KeyStoreError::AlreadyExists(_))
            | Self::KeyStore(KeyStoreError::IdentityMismatch(_)) => Disposition::FixInput,

            Self::NonceConflict { .. }
            | Self::RetryExhausted { .. }
            | Self::Transport(_)
            | Self::Timeout(_)
            | Self::Subscription(_) => Disposition::RetryLater,

            Self::Remote(_)
            | Self::NonceExhausted(_)
            | Self::KeyStore(_)
            | Self::Signing(_)
            | Self::Configuration(_)
            | Self::Internal(_) => Disposition::GiveUp,
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
