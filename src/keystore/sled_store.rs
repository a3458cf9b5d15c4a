//! Embedded database key store

use super::{reseal, Authentication, Identity, KeyRecord, KeyStore};
use crate::crypto::{EncryptedPrivateKey, KdfParams, KeyPair};
use crate::errors::KeyStoreError;
use crate::keystore::KeyAlias;
use crate::types::AccountAddress;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

const TREE_NAME: &str = "keys";

fn backend_error(err: sled::Error) -> KeyStoreError {
    KeyStoreError::Backend(err.to_string())
}

/// Key records in a sled tree, bincode-encoded
#[derive(Debug, Clone)]
pub struct SledKeyStore {
    db: sled::Db,
    tree: sled::Tree,
    kdf: KdfParams,
}

impl SledKeyStore {
    pub fn open(path: impl AsRef<Path>, kdf: KdfParams) -> Result<Self, KeyStoreError> {
        let db = sled::open(path).map_err(backend_error)?;
        let tree = db.open_tree(TREE_NAME).map_err(backend_error)?;
        Ok(Self { db, tree, kdf })
    }

    /// Store backed by a temporary database removed on drop
    pub fn temporary(kdf: KdfParams) -> Result<Self, KeyStoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(backend_error)?;
        let tree = db.open_tree(TREE_NAME).map_err(backend_error)?;
        Ok(Self { db, tree, kdf })
    }

    /// Persist pending writes
    pub async fn flush(&self) -> Result<(), KeyStoreError> {
        self.db.flush_async().await.map_err(backend_error)?;
        Ok(())
    }

    fn read_record(&self, identity: &Identity) -> Result<KeyRecord, KeyStoreError> {
        let bytes = self
            .tree
            .get(identity.storage_key())
            .map_err(backend_error)?
            .ok_or_else(|| KeyStoreError::NotFound(identity.to_string()))?;
        decode(identity.to_string(), &bytes)
    }
}

/// Identity as bincode sees it: externally tagged, no self-describing fields
#[derive(Serialize, Deserialize)]
enum StoredIdentity {
    Address(AccountAddress),
    Alias(KeyAlias),
}

/// Row layout of the sled tree
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    identity: StoredIdentity,
    address: AccountAddress,
    encrypted_key: EncryptedPrivateKey,
    created_at: DateTime<Utc>,
}

impl From<KeyRecord> for StoredRecord {
    fn from(record: KeyRecord) -> Self {
        let identity = match record.identity {
            Identity::Address(address) => StoredIdentity::Address(address),
            Identity::Alias(alias) => StoredIdentity::Alias(alias),
        };
        Self {
            identity,
            address: record.address,
            encrypted_key: record.encrypted_key,
            created_at: record.created_at,
        }
    }
}

impl From<StoredRecord> for KeyRecord {
    fn from(stored: StoredRecord) -> Self {
        let identity = match stored.identity {
            StoredIdentity::Address(address) => Identity::Address(address),
            StoredIdentity::Alias(alias) => Identity::Alias(alias),
        };
        Self {
            identity,
            address: stored.address,
            encrypted_key: stored.encrypted_key,
            created_at: stored.created_at,
        }
    }
}

fn encode(record: KeyRecord) -> Result<Vec<u8>, KeyStoreError> {
    bincode::serialize(&StoredRecord::from(record))
        .map_err(|e| KeyStoreError::Backend(e.to_string()))
}

fn decode(label: impl Into<String>, bytes: &[u8]) -> Result<KeyRecord, KeyStoreError> {
    bincode::deserialize::<StoredRecord>(bytes)
        .map(KeyRecord::from)
        .map_err(|e| KeyStoreError::Corrupted {
            identity: label.into(),
            reason: e.to_string(),
        })
}

#[async_trait]
impl KeyStore for SledKeyStore {
    fn backend(&self) -> &'static str {
        "sled"
    }

    async fn save(&self, auth: &Authentication, key: &KeyPair) -> Result<(), KeyStoreError> {
        let record = KeyRecord::seal(auth, key, self.kdf)?;
        let bytes = encode(record)?;
        let swapped = self
            .tree
            .compare_and_swap(auth.identity().storage_key(), None as Option<&[u8]>, Some(bytes))
            .map_err(backend_error)?;
        if swapped.is_err() {
            return Err(KeyStoreError::AlreadyExists(auth.identity().to_string()));
        }
        info!(identity = %auth.identity(), backend = "sled", "Key saved");
        Ok(())
    }

    async fn load(&self, auth: &Authentication) -> Result<KeyPair, KeyStoreError> {
        self.read_record(auth.identity())?.unlock(auth.password())
    }

    async fn remove(&self, auth: &Authentication) -> Result<(), KeyStoreError> {
        self.read_record(auth.identity())?.unlock(auth.password())?;
        self.tree
            .remove(auth.identity().storage_key())
            .map_err(backend_error)?;
        info!(identity = %auth.identity(), backend = "sled", "Key removed");
        Ok(())
    }

    async fn export(
        &self,
        auth: &Authentication,
        new_password: &str,
    ) -> Result<EncryptedPrivateKey, KeyStoreError> {
        reseal(&self.read_record(auth.identity())?, auth, new_password, self.kdf)
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, KeyStoreError> {
        let mut identities = Vec::new();
        for entry in self.tree.iter() {
            let (key, value) = entry.map_err(backend_error)?;
            let label = String::from_utf8_lossy(&key).into_owned();
            identities.push(decode(label, &value)?.identity);
        }
        Ok(identities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_flush_reopen() {
        let dir = TempDir::new().unwrap();
        let key = KeyPair::generate();
        let auth = Authentication::of(KeyAlias::new("main").unwrap(), "pw");
        {
            let store = SledKeyStore::open(dir.path().join("db"), KdfParams::LIGHT).unwrap();
            store.save(&auth, &key).await.unwrap();
            store.flush().await.unwrap();
        }
        let store = SledKeyStore::open(dir.path().join("db"), KdfParams::LIGHT).unwrap();
        assert_eq!(store.load(&auth).await.unwrap().address(), key.address());
        assert_eq!(store.list_identities().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_is_exclusive() {
        let store = SledKeyStore::temporary(KdfParams::LIGHT).unwrap();
        let key = KeyPair::generate();
        let auth = Authentication::of(key.address().clone(), "pw");
        store.save(&auth, &key).await.unwrap();
        assert!(matches!(
            store.save(&auth, &key).await,
            Err(KeyStoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_export_and_remove() {
        let store = SledKeyStore::temporary(KdfParams::LIGHT).unwrap();
        let key = KeyPair::generate();
        let auth = Authentication::of(KeyAlias::new("k").unwrap(), "pw");
        store.save(&auth, &key).await.unwrap();

        let exported = store.export(&auth, "other").await.unwrap();
        assert_eq!(KeyPair::decrypt(&exported, "other").unwrap().address(), key.address());

        store.remove(&auth).await.unwrap();
        assert!(matches!(store.load(&auth).await, Err(KeyStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_identities_after_reopen() {
        let dir = TempDir::new().unwrap();
        let aliased = KeyPair::generate();
        let addressed = KeyPair::generate();
        let alias = Identity::Alias(KeyAlias::new("cold").unwrap());
        let address = Identity::Address(addressed.address().clone());
        {
            let store = SledKeyStore::open(dir.path().join("db"), KdfParams::LIGHT).unwrap();
            store.save(&Authentication::of(alias.clone(), "pw"), &aliased).await.unwrap();
            store.save(&Authentication::of(address.clone(), "pw"), &addressed).await.unwrap();
            store.flush().await.unwrap();
        }

        let store = SledKeyStore::open(dir.path().join("db"), KdfParams::LIGHT).unwrap();
        let mut listed = store.list_identities().await.unwrap();
        listed.sort();
        let mut expected = vec![alias, address.clone()];
        expected.sort();
        assert_eq!(listed, expected);

        let loaded = store.load(&Authentication::of(address, "pw")).await.unwrap();
        assert_eq!(loaded.address(), addressed.address());
    }

    #[test]
    fn test_garbage_row_reports_corruption() {
        assert!(matches!(
            decode("broken", &[0xff, 0x01]),
            Err(KeyStoreError::Corrupted { .. })
        ));
    }
}
