//! Key stores
//!
//! One capability trait, [`KeyStore`], with independent backends:
//! - [`InMemoryKeyStore`]: process-local map
//! - [`FileKeyStore`]: one JSON record per identity in a directory
//! - [`SledKeyStore`]: records in an embedded sled tree
//!
//! Every backend keeps only password-encrypted key material. Loading a
//! signer always goes through the password.

pub mod file;
pub mod memory;
pub mod sled_store;

pub use file::FileKeyStore;
pub use memory::InMemoryKeyStore;
pub use sled_store::SledKeyStore;

use crate::config::{KeyStoreBackend, KeyStoreConfig};
use crate::crypto::{EncryptedPrivateKey, KdfParams, KeyPair};
use crate::errors::KeyStoreError;
use crate::types::AccountAddress;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use zeroize::Zeroizing;

static ALIAS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]{1,64}$").expect("static alias pattern"));

/// Human-chosen name for a stored key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyAlias(String);

impl KeyAlias {
    pub fn new(alias: &str) -> Result<Self, KeyStoreError> {
        if !ALIAS_PATTERN.is_match(alias) {
            return Err(KeyStoreError::Backend(format!(
                "invalid key alias '{}': use 1-64 of [A-Za-z0-9_-]",
                alias
            )));
        }
        Ok(Self(alias.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Name a key is stored under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Identity {
    Address(AccountAddress),
    Alias(KeyAlias),
}

impl Identity {
    /// Stable key used by persistent backends
    pub fn storage_key(&self) -> String {
        match self {
            Identity::Address(address) => format!("address-{}", address.encoded()),
            Identity::Alias(alias) => format!("alias-{}", alias.as_str()),
        }
    }
}

impl From<AccountAddress> for Identity {
    fn from(address: AccountAddress) -> Self {
        Identity::Address(address)
    }
}

impl From<KeyAlias> for Identity {
    fn from(alias: KeyAlias) -> Self {
        Identity::Alias(alias)
    }
}

impl FromStr for Identity {
    type Err = KeyStoreError;

    /// Encoded addresses win; anything else must be a valid alias
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match AccountAddress::from_str(s) {
            Ok(address) => Ok(Identity::Address(address)),
            Err(_) => KeyAlias::new(s).map(Identity::Alias),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Address(address) => fmt::Display::fmt(address, f),
            Identity::Alias(alias) => f.write_str(alias.as_str()),
        }
    }
}

/// Identity plus the password protecting its key
#[derive(Clone)]
pub struct Authentication {
    identity: Identity,
    password: Zeroizing<String>,
}

impl Authentication {
    pub fn of(identity: impl Into<Identity>, password: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authentication")
            .field("identity", &self.identity)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Persisted form of one stored key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub identity: Identity,
    pub address: AccountAddress,
    pub encrypted_key: EncryptedPrivateKey,
    pub created_at: DateTime<Utc>,
}

impl KeyRecord {
    /// Encrypt `key` for storage under `auth`
    pub fn seal(
        auth: &Authentication,
        key: &KeyPair,
        kdf: KdfParams,
    ) -> Result<Self, KeyStoreError> {
        if let Identity::Address(address) = auth.identity() {
            if address != key.address() {
                return Err(KeyStoreError::IdentityMismatch(address.to_string()));
            }
        }
        Ok(Self {
            identity: auth.identity().clone(),
            address: key.address().clone(),
            encrypted_key: key.encrypt(auth.password(), kdf)?,
            created_at: Utc::now(),
        })
    }

    /// Decrypt with `password`, reporting failures against this record's identity
    pub fn unlock(&self, password: &str) -> Result<KeyPair, KeyStoreError> {
        let key = KeyPair::decrypt(&self.encrypted_key, password).map_err(|e| match e {
            KeyStoreError::WrongPassword(_) => {
                KeyStoreError::WrongPassword(self.identity.to_string())
            }
            KeyStoreError::Corrupted { reason, .. } => KeyStoreError::Corrupted {
                identity: self.identity.to_string(),
                reason,
            },
            other => other,
        })?;
        if key.address() != &self.address {
            return Err(KeyStoreError::Corrupted {
                identity: self.identity.to_string(),
                reason: "decrypted key does not match recorded address".to_string(),
            });
        }
        Ok(key)
    }
}

/// Storage for password-protected signing keys
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Short backend name (e.g. `"memory"`, `"file"`)
    fn backend(&self) -> &'static str;

    /// Store `key` under the credentials; fails if the identity is taken
    async fn save(&self, auth: &Authentication, key: &KeyPair) -> Result<(), KeyStoreError>;

    /// Decrypt and return the signer for the credentials
    async fn load(&self, auth: &Authentication) -> Result<KeyPair, KeyStoreError>;

    /// Delete the key; the password must be correct
    async fn remove(&self, auth: &Authentication) -> Result<(), KeyStoreError>;

    /// Re-encrypt the key under `new_password` for transfer elsewhere
    async fn export(
        &self,
        auth: &Authentication,
        new_password: &str,
    ) -> Result<EncryptedPrivateKey, KeyStoreError>;

    /// Every stored identity
    async fn list_identities(&self) -> Result<Vec<Identity>, KeyStoreError>;
}

/// Shared export logic: unlock with the current password, seal with the new one
pub(crate) fn reseal(
    record: &KeyRecord,
    auth: &Authentication,
    new_password: &str,
    kdf: KdfParams,
) -> Result<EncryptedPrivateKey, KeyStoreError> {
    let key = record.unlock(auth.password())?;
    key.encrypt(new_password, kdf)
}

/// Open the backend named by `config`
pub async fn open(config: &KeyStoreConfig) -> Result<Arc<dyn KeyStore>, KeyStoreError> {
    let require_path = || {
        config.path.clone().ok_or_else(|| {
            KeyStoreError::Backend(format!("{:?} key store needs a path", config.backend))
        })
    };
    let store: Arc<dyn KeyStore> = match config.backend {
        KeyStoreBackend::Memory => Arc::new(InMemoryKeyStore::with_kdf(config.kdf)),
        KeyStoreBackend::File => Arc::new(FileKeyStore::open(require_path()?, config.kdf).await?),
        KeyStoreBackend::Sled => Arc::new(SledKeyStore::open(require_path()?, config.kdf)?),
    };
    Ok(store)
}
