//! Signing and verification
//!
//! Two signing paths exist and are kept apart by type:
//! - [`SignerService::sign_digest`] signs a caller-supplied [`Hash256`] verbatim
//! - [`SignerService::sign_message`] hashes arbitrary bytes with sha256 first
//!
//! Transactions are signed over [`RawTransaction::hash`]. Verification
//! returns `Ok(false)` for a signature that does not check out and only
//! errors on malformed input.

pub mod encrypted;
pub mod key;

pub use encrypted::{EncryptedPrivateKey, KdfParams};
pub use key::KeyPair;

use crate::errors::{ClientError, ClientResult};
use crate::metrics::{metrics, Timer};
use crate::tx::RawTransaction;
use crate::types::{AccountAddress, Hash256, TxHash};
use async_trait::async_trait;
use ed25519_dalek::{VerifyingKey, SIGNATURE_LENGTH};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;

/// sha256 of `bytes`
pub fn sha256(bytes: &[u8]) -> Hash256 {
    Hash256(Sha256::digest(bytes).into())
}

/// Raw signature bytes
///
/// Length is checked at verification time so signatures received from
/// elsewhere can be represented before they are validated.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(Vec<u8>);

impl Signature {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<ed25519_dalek::Signature> for Signature {
    fn from(signature: ed25519_dalek::Signature) -> Self {
        Self(signature.to_bytes().to_vec())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0))
    }
}

/// Async signer trait bound to one account's private material
#[async_trait]
pub trait SignerService: Send + Sync {
    /// Account the signer signs for
    fn address(&self) -> AccountAddress;

    /// Sign a pre-computed digest as-is
    async fn sign_digest(&self, digest: &Hash256) -> ClientResult<Signature>;

    /// Hash `message` with sha256, then sign the digest
    async fn sign_message(&self, message: &[u8]) -> ClientResult<Signature> {
        self.sign_digest(&sha256(message)).await
    }

    /// Sign a raw transaction over its canonical hash
    async fn sign_transaction(&self, raw: RawTransaction) -> ClientResult<SignedTransaction> {
        if &self.address() != raw.from() {
            return Err(ClientError::Signing(format!(
                "signer {} cannot sign for sender {}",
                self.address(),
                raw.from()
            )));
        }
        let timer = Timer::start();
        let hash = raw.hash();
        let signature = self.sign_digest(&hash).await?;
        timer.observe(&metrics().sign_latency);
        debug!(from = %raw.from(), nonce = raw.nonce(), hash = %hash, "Transaction signed");
        Ok(SignedTransaction {
            raw,
            signature,
            hash: TxHash(hash),
        })
    }
}

/// Raw transaction plus signature and content hash
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub(crate) raw: RawTransaction,
    pub(crate) signature: Signature,
    pub(crate) hash: TxHash,
}

impl SignedTransaction {
    /// Reassemble a signed transaction received from elsewhere; not checked
    pub fn from_parts(raw: RawTransaction, signature: Signature, hash: TxHash) -> Self {
        Self {
            raw,
            signature,
            hash,
        }
    }

    pub fn raw(&self) -> &RawTransaction {
        &self.raw
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn hash(&self) -> &TxHash {
        &self.hash
    }

    pub fn into_raw(self) -> RawTransaction {
        self.raw
    }
}

fn verifying_key(address: &AccountAddress) -> ClientResult<VerifyingKey> {
    VerifyingKey::from_bytes(address.as_bytes())
        .map_err(|e| ClientError::invalid_field("from", format!("not a valid public key: {}", e)))
}

/// Check `signature` over `digest` exactly as given
pub fn verify_digest(
    address: &AccountAddress,
    digest: &Hash256,
    signature: &Signature,
) -> ClientResult<bool> {
    let bytes: &[u8; SIGNATURE_LENGTH] = signature.as_bytes().try_into().map_err(|_| {
        ClientError::invalid_field(
            "signature",
            format!("expected {} bytes, got {}", SIGNATURE_LENGTH, signature.as_bytes().len()),
        )
    })?;
    let key = verifying_key(address)?;
    let signature = ed25519_dalek::Signature::from_bytes(bytes);
    Ok(key.verify_strict(digest.as_bytes(), &signature).is_ok())
}

/// Check a signature produced by [`SignerService::sign_message`]
pub fn verify_message(
    address: &AccountAddress,
    message: &[u8],
    signature: &Signature,
) -> ClientResult<bool> {
    verify_digest(address, &sha256(message), signature)
}

/// Recompute the hash and check the sender's signature
pub fn verify_transaction(signed: &SignedTransaction) -> ClientResult<bool> {
    let recomputed = signed.raw.hash();
    if recomputed != signed.hash.0 {
        debug!(claimed = %signed.hash, recomputed = %recomputed, "Transaction hash mismatch");
        return Ok(false);
    }
    verify_digest(signed.raw.from(), &recomputed, &signed.signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChainIdHash, Fee};
    use bytes::Bytes;

    fn transfer(key: &KeyPair) -> RawTransaction {
        RawTransaction::transfer()
            .chain_id_hash(ChainIdHash::from([1u8; 32]))
            .from(key.address().clone())
            .to(AccountAddress::from_public_key([3u8; 32]))
            .amount(10)
            .nonce(1)
            .fee(Fee::INFINITY)
            .payload(b"payload-bytes".to_vec())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_sign_then_verify() {
        let key = KeyPair::generate();
        let signed = key.sign_transaction(transfer(&key)).await.unwrap();
        assert_eq!(signed.hash().0, signed.raw().hash());
        assert!(verify_transaction(&signed).unwrap());
    }

    #[tokio::test]
    async fn test_flipping_any_payload_byte_fails_verification() {
        let key = KeyPair::generate();
        let signed = key.sign_transaction(transfer(&key)).await.unwrap();
        let original = signed.raw.payload.clone();

        for index in 0..original.len() {
            let mut bytes = original.to_vec();
            bytes[index] ^= 0xFF;
            let mut tampered = signed.clone();
            tampered.raw.payload = Bytes::from(bytes);
            assert!(!verify_transaction(&tampered).unwrap(), "byte {} flip verified", index);

            // Also with the hash recomputed to match the tampered content
            tampered.hash = TxHash(tampered.raw.hash());
            assert!(!verify_transaction(&tampered).unwrap());
        }
    }

    #[tokio::test]
    async fn test_signer_must_match_sender() {
        let key = KeyPair::generate();
        let other = KeyPair::generate();
        let err = other.sign_transaction(transfer(&key)).await.unwrap_err();
        assert_eq!(err.category(), "signing");
    }

    #[tokio::test]
    async fn test_digest_and_message_paths_differ() {
        let key = KeyPair::generate();
        let digest = sha256(b"hello");

        let over_digest = key.sign_digest(&digest).await.unwrap();
        let over_message = key.sign_message(b"hello").await.unwrap();
        // Message path hashes once, so both sign the same bytes
        assert_eq!(over_digest, over_message);

        // Treating the digest as a message double-hashes
        let double_hashed = key.sign_message(digest.as_bytes()).await.unwrap();
        assert_ne!(double_hashed, over_digest);

        assert!(verify_digest(key.address(), &digest, &over_digest).unwrap());
        assert!(verify_message(key.address(), b"hello", &over_message).unwrap());
        assert!(!verify_message(key.address(), b"hell0", &over_message).unwrap());
    }

    #[test]
    fn test_malformed_signature_is_an_error() {
        let key = KeyPair::generate();
        let short = Signature::from_bytes(vec![0u8; 10]);
        let err = verify_digest(key.address(), &Hash256::ZERO, &short).unwrap_err();
        assert_eq!(err.field(), Some("signature"));

        // Well-formed but wrong signature is just false
        let wrong = Signature::from_bytes(vec![0u8; SIGNATURE_LENGTH]);
        assert!(!verify_digest(key.address(), &Hash256::ZERO, &wrong).unwrap());
    }
}
