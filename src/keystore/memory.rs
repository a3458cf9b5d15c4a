//! Process-local key store

use super::{reseal, Authentication, Identity, KeyRecord, KeyStore};
use crate::crypto::{EncryptedPrivateKey, KdfParams, KeyPair};
use crate::errors::KeyStoreError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::info;

/// Keys held in memory for the life of the process
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    records: RwLock<BTreeMap<Identity, KeyRecord>>,
    kdf: KdfParams,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kdf(kdf: KdfParams) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            kdf,
        }
    }

    fn record(&self, identity: &Identity) -> Result<KeyRecord, KeyStoreError> {
        self.records
            .read()
            .get(identity)
            .cloned()
            .ok_or_else(|| KeyStoreError::NotFound(identity.to_string()))
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn save(&self, auth: &Authentication, key: &KeyPair) -> Result<(), KeyStoreError> {
        let record = KeyRecord::seal(auth, key, self.kdf)?;
        let mut records = self.records.write();
        if records.contains_key(auth.identity()) {
            return Err(KeyStoreError::AlreadyExists(auth.identity().to_string()));
        }
        records.insert(auth.identity().clone(), record);
        info!(identity = %auth.identity(), backend = "memory", "Key saved");
        Ok(())
    }

    async fn load(&self, auth: &Authentication) -> Result<KeyPair, KeyStoreError> {
        self.record(auth.identity())?.unlock(auth.password())
    }

    async fn remove(&self, auth: &Authentication) -> Result<(), KeyStoreError> {
        self.record(auth.identity())?.unlock(auth.password())?;
        self.records.write().remove(auth.identity());
        info!(identity = %auth.identity(), backend = "memory", "Key removed");
        Ok(())
    }

    async fn export(
        &self,
        auth: &Authentication,
        new_password: &str,
    ) -> Result<EncryptedPrivateKey, KeyStoreError> {
        reseal(&self.record(auth.identity())?, auth, new_password, self.kdf)
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, KeyStoreError> {
        Ok(self.records.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::KeyAlias;

    fn store() -> InMemoryKeyStore {
        InMemoryKeyStore::with_kdf(KdfParams::LIGHT)
    }

    #[tokio::test]
    async fn test_save_load_remove() {
        let store = store();
        let key = KeyPair::generate();
        let auth = Authentication::of(key.address().clone(), "pw");

        store.save(&auth, &key).await.unwrap();
        assert_eq!(store.load(&auth).await.unwrap().address(), key.address());
        assert!(matches!(
            store.save(&auth, &key).await,
            Err(KeyStoreError::AlreadyExists(_))
        ));

        let wrong = Authentication::of(key.address().clone(), "bad");
        assert!(matches!(store.remove(&wrong).await, Err(KeyStoreError::WrongPassword(_))));

        store.remove(&auth).await.unwrap();
        assert!(matches!(store.load(&auth).await, Err(KeyStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_export_reencrypts() {
        let store = store();
        let key = KeyPair::generate();
        let auth = Authentication::of(KeyAlias::new("main").unwrap(), "old");
        store.save(&auth, &key).await.unwrap();

        let exported = store.export(&auth, "new").await.unwrap();
        assert_eq!(KeyPair::decrypt(&exported, "new").unwrap().address(), key.address());
        assert!(KeyPair::decrypt(&exported, "old").is_err());
    }

    #[tokio::test]
    async fn test_list_identities() {
        let store = store();
        for alias in ["a", "b"] {
            let auth = Authentication::of(KeyAlias::new(alias).unwrap(), "pw");
            store.save(&auth, &KeyPair::generate()).await.unwrap();
        }
        assert_eq!(store.list_identities().await.unwrap().len(), 2);
    }
}
