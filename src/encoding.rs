//! Text encodings for byte values
//!
//! Hashes and addresses travel as base58 / base58check, signatures and
//! encrypted keys are commonly shown as base64 or hex.

use crate::errors::{ClientError, ClientResult};
use base64::Engine as _;

/// Supported text encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Hex,
    Base58,
    /// Base58 with a 4-byte double-sha256 checksum
    Base58Check,
    Base64,
}

impl Encoding {
    /// Encode raw bytes
    pub fn encode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Hex => hex::encode(bytes),
            Encoding::Base58 => bs58::encode(bytes).into_string(),
            Encoding::Base58Check => bs58::encode(bytes).with_check().into_string(),
            Encoding::Base64 => base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Decode text back into raw bytes
    pub fn decode(self, encoded: &str) -> ClientResult<Vec<u8>> {
        let decoded = match self {
            Encoding::Hex => hex::decode(encoded).map_err(|e| e.to_string()),
            Encoding::Base58 => bs58::decode(encoded).into_vec().map_err(|e| e.to_string()),
            Encoding::Base58Check => bs58::decode(encoded)
                .with_check(None)
                .into_vec()
                .map_err(|e| e.to_string()),
            Encoding::Base64 => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| e.to_string()),
        };
        decoded.map_err(|reason| {
            ClientError::invalid_field("encoded", format!("{:?} decode failed: {}", self, reason))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(Encoding::Hex.encode(b"test"), "74657374");
        assert_eq!(Encoding::Base58.encode(b"test"), "3yZe7d");
        assert_eq!(Encoding::Base64.encode(b"test"), "dGVzdA==");

        assert_eq!(Encoding::Hex.decode("74657374").unwrap(), b"test");
        assert_eq!(Encoding::Base58.decode("3yZe7d").unwrap(), b"test");
        assert_eq!(Encoding::Base64.decode("dGVzdA==").unwrap(), b"test");
    }

    #[test]
    fn test_base58check_detects_corruption() {
        let encoded = Encoding::Base58Check.encode(b"test");
        assert_eq!(Encoding::Base58Check.decode(&encoded).unwrap(), b"test");

        let mut corrupted: Vec<char> = encoded.chars().collect();
        corrupted[0] = if corrupted[0] == '2' { '3' } else { '2' };
        let corrupted: String = corrupted.into_iter().collect();
        let err = Encoding::Base58Check.decode(&corrupted).unwrap_err();
        assert_eq!(err.field(), Some("encoded"));
    }

    #[test]
    fn test_invalid_input_is_field_error() {
        assert!(Encoding::Hex.decode("zz").is_err());
        assert!(Encoding::Base58.decode("0OIl").is_err());
        assert!(Encoding::Base64.decode("***").is_err());
    }
}
