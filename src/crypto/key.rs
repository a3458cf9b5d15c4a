//! ed25519 key material

use super::encrypted::{EncryptedPrivateKey, KdfParams};
use super::{Signature, SignerService};
use crate::errors::{ClientError, ClientResult, KeyStoreError};
use crate::types::{AccountAddress, Hash256};
use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use std::fmt;
use zeroize::Zeroizing;

/// Signing key bound to one account
///
/// The secret is zeroized on drop.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    address: AccountAddress,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_secret_bytes(secret: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    pub fn from_secret_slice(secret: &[u8]) -> ClientResult<Self> {
        let secret: &[u8; SECRET_KEY_LENGTH] = secret.try_into().map_err(|_| {
            ClientError::Signing(format!(
                "expected {} byte secret key, got {}",
                SECRET_KEY_LENGTH,
                secret.len()
            ))
        })?;
        Ok(Self::from_secret_bytes(secret))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = AccountAddress::from_public_key(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            address,
        }
    }

    pub fn address(&self) -> &AccountAddress {
        &self.address
    }

    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LENGTH]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    /// Export under `password`
    pub fn encrypt(
        &self,
        password: &str,
        kdf: KdfParams,
    ) -> Result<EncryptedPrivateKey, KeyStoreError> {
        EncryptedPrivateKey::seal(&self.secret_bytes()[..], password, kdf)
    }

    /// Import from an exported key
    pub fn decrypt(encrypted: &EncryptedPrivateKey, password: &str) -> Result<Self, KeyStoreError> {
        let secret = encrypted.open(password)?;
        Self::from_secret_slice(&secret).map_err(|e| KeyStoreError::Corrupted {
            identity: "encrypted key".to_string(),
            reason: e.to_string(),
        })
    }

    /// Sign exactly these 32 bytes
    pub fn sign_digest_sync(&self, digest: &Hash256) -> Signature {
        Signature::from(self.signing_key.sign(digest.as_bytes()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SignerService for KeyPair {
    fn address(&self) -> AccountAddress {
        self.address.clone()
    }

    async fn sign_digest(&self, digest: &Hash256) -> ClientResult<Signature> {
        Ok(self.sign_digest_sync(digest))
    }
}
