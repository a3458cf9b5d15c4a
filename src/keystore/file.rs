//! Directory-backed key store, one JSON record per identity

use super::{reseal, Authentication, Identity, KeyRecord, KeyStore};
use crate::crypto::{EncryptedPrivateKey, KdfParams, KeyPair};
use crate::errors::KeyStoreError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FileKeyStore {
    root: PathBuf,
    kdf: KdfParams,
}

fn io_error(path: &Path, err: std::io::Error) -> KeyStoreError {
    KeyStoreError::Io(format!("{}: {}", path.display(), err))
}

impl FileKeyStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>, kdf: KdfParams) -> Result<Self, KeyStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error(&root, e))?;
        Ok(Self { root, kdf })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, identity: &Identity) -> PathBuf {
        self.root
            .join(format!("{}.{}", identity.storage_key(), RECORD_EXTENSION))
    }

    async fn read_record(&self, identity: &Identity) -> Result<KeyRecord, KeyStoreError> {
        let path = self.path_for(identity);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(KeyStoreError::NotFound(identity.to_string()))
            }
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_slice(&content).map_err(|e| KeyStoreError::Corrupted {
            identity: identity.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn save(&self, auth: &Authentication, key: &KeyPair) -> Result<(), KeyStoreError> {
        let record = KeyRecord::seal(auth, key, self.kdf)?;
        let path = self.path_for(auth.identity());
        let content = serde_json::to_vec_pretty(&record)
            .map_err(|e| KeyStoreError::Backend(e.to_string()))?;

        // create_new makes the existence check and the write one step
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        let mut file = match options.open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(KeyStoreError::AlreadyExists(auth.identity().to_string()))
            }
            Err(e) => return Err(io_error(&path, e)),
        };
        tokio::io::AsyncWriteExt::write_all(&mut file, &content)
            .await
            .map_err(|e| io_error(&path, e))?;
        file.sync_all().await.map_err(|e| io_error(&path, e))?;

        info!(identity = %auth.identity(), path = %path.display(), "Key saved");
        Ok(())
    }

    async fn load(&self, auth: &Authentication) -> Result<KeyPair, KeyStoreError> {
        self.read_record(auth.identity()).await?.unlock(auth.password())
    }

    async fn remove(&self, auth: &Authentication) -> Result<(), KeyStoreError> {
        self.read_record(auth.identity())
            .await?
            .unlock(auth.password())?;
        let path = self.path_for(auth.identity());
        fs::remove_file(&path).await.map_err(|e| io_error(&path, e))?;
        info!(identity = %auth.identity(), path = %path.display(), "Key removed");
        Ok(())
    }

    async fn export(
        &self,
        auth: &Authentication,
        new_password: &str,
    ) -> Result<EncryptedPrivateKey, KeyStoreError> {
        let record = self.read_record(auth.identity()).await?;
        reseal(&record, auth, new_password, self.kdf)
    }

    async fn list_identities(&self) -> Result<Vec<Identity>, KeyStoreError> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;
        let mut identities = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let content = fs::read(&path).await.map_err(|e| io_error(&path, e))?;
            match serde_json::from_slice::<KeyRecord>(&content) {
                Ok(record) => identities.push(record.identity),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable key record")
                }
            }
        }
        identities.sort();
        Ok(identities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::KeyAlias;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> FileKeyStore {
        FileKeyStore::open(dir.path(), KdfParams::LIGHT).await.unwrap()
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let key = KeyPair::generate();
        let auth = Authentication::of(key.address().clone(), "pw");
        store(&dir).await.save(&auth, &key).await.unwrap();

        let reopened = store(&dir).await;
        assert_eq!(reopened.load(&auth).await.unwrap().address(), key.address());
        assert_eq!(
            reopened.list_identities().await.unwrap(),
            vec![Identity::Address(key.address().clone())]
        );
    }

    #[tokio::test]
    async fn test_duplicate_save_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let key = KeyPair::generate();
        let auth = Authentication::of(KeyAlias::new("main").unwrap(), "pw");

        store.save(&auth, &key).await.unwrap();
        assert!(matches!(
            store.save(&auth, &KeyPair::generate()).await,
            Err(KeyStoreError::AlreadyExists(_))
        ));
        store.remove(&auth).await.unwrap();
        assert!(store.list_identities().await.unwrap().is_empty());
        assert!(matches!(store.remove(&auth).await, Err(KeyStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_corrupted_record_reported() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;
        let identity = Identity::Alias(KeyAlias::new("broken").unwrap());
        std::fs::write(store.path_for(&identity), b"{not json").unwrap();

        let auth = Authentication::of(identity, "pw");
        assert!(matches!(
            store.load(&auth).await,
            Err(KeyStoreError::Corrupted { .. })
        ));
        // Listing skips unreadable records instead of failing
        assert!(store.list_identities().await.unwrap().is_empty());
    }
}
