//! Password-encrypted private key container (Argon2id + XChaCha20-Poly1305)
//!
//! Layout: magic || version || m_cost || t_cost || p_cost || salt || nonce || ciphertext+tag.
//! Everything before the ciphertext is authenticated as associated data.

use crate::errors::KeyStoreError;
use argon2::{Argon2, ParamsBuilder, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

const MAGIC: [u8; 4] = *b"LKEY";
const VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const HEADER_LEN: usize = 4 + 1 + 12 + SALT_LEN + NONCE_LEN;

/// Version byte of the base58check text form
pub const ENCRYPTED_KEY_VERSION: u8 = 0xAA;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl KdfParams {
    /// Cheap parameters for tests and throwaway keys
    pub const LIGHT: KdfParams = KdfParams {
        m_cost: 8,
        t_cost: 1,
        p_cost: 1,
    };
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 19456,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

/// Private key sealed under a password
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedPrivateKey {
    kdf: KdfParams,
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

impl fmt::Debug for EncryptedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedPrivateKey")
            .field("kdf", &self.kdf)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

impl EncryptedPrivateKey {
    /// Seal `secret` under `password`
    pub fn seal(secret: &[u8], password: &str, kdf: KdfParams) -> Result<Self, KeyStoreError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let key = derive_key(password, &salt, &kdf)?;
        let sealed = Self {
            kdf,
            salt,
            nonce,
            ciphertext: Vec::new(),
        };
        let aad = sealed.header_bytes();
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let ciphertext = cipher
            .encrypt(&nonce.into(), Payload { msg: secret, aad: &aad })
            .map_err(|e| KeyStoreError::Backend(format!("encryption failed: {}", e)))?;
        Ok(Self { ciphertext, ..sealed })
    }

    /// Recover the secret; a wrong password and a tampered container look the same
    pub fn open(&self, password: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let key = derive_key(password, &self.salt, &self.kdf)?;
        let aad = self.header_bytes();
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
        cipher
            .decrypt(
                &self.nonce.into(),
                Payload {
                    msg: &self.ciphertext,
                    aad: &aad,
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| KeyStoreError::WrongPassword("encrypted key".to_string()))
    }

    pub fn kdf(&self) -> KdfParams {
        self.kdf
    }

    fn header_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN);
        buf.extend_from_slice(&MAGIC);
        buf.push(VERSION);
        buf.extend_from_slice(&self.kdf.m_cost.to_le_bytes());
        buf.extend_from_slice(&self.kdf.t_cost.to_le_bytes());
        buf.extend_from_slice(&self.kdf.p_cost.to_le_bytes());
        buf.extend_from_slice(&self.salt);
        buf.extend_from_slice(&self.nonce);
        buf
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.header_bytes();
        buf.extend_from_slice(&self.ciphertext);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, KeyStoreError> {
        let corrupted = |reason: &str| KeyStoreError::Corrupted {
            identity: "encrypted key".to_string(),
            reason: reason.to_string(),
        };
        if data.len() <= HEADER_LEN {
            return Err(corrupted("too short"));
        }
        if data[0..4] != MAGIC {
            return Err(corrupted("bad magic"));
        }
        if data[4] != VERSION {
            return Err(corrupted("unsupported version"));
        }
        let read_u32 = |offset: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&data[offset..offset + 4]);
            u32::from_le_bytes(word)
        };
        let kdf = KdfParams {
            m_cost: read_u32(5),
            t_cost: read_u32(9),
            p_cost: read_u32(13),
        };
        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(&data[17..17 + SALT_LEN]);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&data[17 + SALT_LEN..HEADER_LEN]);
        Ok(Self {
            kdf,
            salt,
            nonce,
            ciphertext: data[HEADER_LEN..].to_vec(),
        })
    }
}

fn derive_key(
    password: &str,
    salt: &[u8; SALT_LEN],
    kdf: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, KeyStoreError> {
    let params = ParamsBuilder::new()
        .m_cost(kdf.m_cost)
        .t_cost(kdf.t_cost)
        .p_cost(kdf.p_cost)
        .build()
        .map_err(|e| KeyStoreError::Backend(format!("invalid argon2 parameters: {}", e)))?;
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| KeyStoreError::Backend(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

impl fmt::Display for EncryptedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(
            &bs58::encode(self.to_bytes())
                .with_check_version(ENCRYPTED_KEY_VERSION)
                .into_string(),
        )
    }
}

impl FromStr for EncryptedPrivateKey {
    type Err = KeyStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = bs58::decode(s)
            .with_check(Some(ENCRYPTED_KEY_VERSION))
            .into_vec()
            .map_err(|e| KeyStoreError::Corrupted {
                identity: "encrypted key".to_string(),
                reason: e.to_string(),
            })?;
        Self::from_bytes(&decoded[1..])
    }
}

impl Serialize for EncryptedPrivateKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EncryptedPrivateKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
