//! Core value types shared by every component
//!
//! Identities, hashes, amounts, fees and the chain-side records that flow
//! back from the remote endpoint (account state, blocks, events).

use crate::errors::{ClientError, ClientResult};
use crate::tx::ContractArg;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version byte prefixed to addresses before base58check encoding
pub const ADDRESS_VERSION: u8 = 0x42;

/// Length of the public key an address is derived from
pub const ADDRESS_LENGTH: usize = 32;

/// Base units per aergo
pub const AER_PER_AERGO: u128 = 1_000_000_000_000_000_000;

/// Base units per gaer
pub const AER_PER_GAER: u128 = 1_000_000_000;

// ============================================================================
// HASHES
// ============================================================================

/// A 32-byte digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from raw bytes, failing with `field` when the length is wrong
    pub fn from_slice(field: &'static str, bytes: &[u8]) -> ClientResult<Self> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            ClientError::invalid_field(field, format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(array))
    }

    fn parse_base58(field: &'static str, encoded: &str) -> ClientResult<Self> {
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| ClientError::invalid_field(field, e.to_string()))?;
        Self::from_slice(field, &bytes)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self)
    }
}

macro_rules! hash_newtype {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Hash256);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; 32] {
                self.0.as_bytes()
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(Hash256(bytes))
            }
        }

        impl FromStr for $name {
            type Err = ClientError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Hash256::parse_base58($field, s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

hash_newtype!(
    /// Identifies the target network; transactions for another chain are rejected
    ChainIdHash,
    "chain_id_hash"
);
hash_newtype!(
    /// Content-addressed transaction identifier
    TxHash,
    "tx_hash"
);
hash_newtype!(BlockHash, "block_hash");

// ============================================================================
// IDENTITIES
// ============================================================================

/// Account identity derived from a public key
///
/// Immutable; used as the nonce allocation key and in `from` / `to` fields.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountAddress([u8; ADDRESS_LENGTH]);

/// Contracts share the account address space
pub type ContractAddress = AccountAddress;

impl AccountAddress {
    /// Derive an address from an ed25519 public key
    pub fn from_public_key(public_key: [u8; ADDRESS_LENGTH]) -> Self {
        Self(public_key)
    }

    /// Raw bytes of the address (the sender's public key)
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Parse an encoded address, reporting failures against `field`
    pub fn parse_field(field: &'static str, encoded: &str) -> ClientResult<Self> {
        if encoded.is_empty() {
            return Err(ClientError::invalid_field(field, "address is empty"));
        }
        let decoded = bs58::decode(encoded)
            .with_check(Some(ADDRESS_VERSION))
            .into_vec()
            .map_err(|e| ClientError::invalid_field(field, format!("malformed address: {}", e)))?;

        // The version byte is kept in the decoded output
        let body = match decoded.split_first() {
            Some((&ADDRESS_VERSION, rest)) if rest.len() == ADDRESS_LENGTH => rest,
            _ => {
                return Err(ClientError::invalid_field(
                    field,
                    format!("expected {} byte address body", ADDRESS_LENGTH),
                ))
            }
        };
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(body);
        Ok(Self(bytes))
    }

    /// base58check text form
    pub fn encoded(&self) -> String {
        bs58::encode(self.0)
            .with_check_version(ADDRESS_VERSION)
            .into_string()
    }
}

impl FromStr for AccountAddress {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_field("address", s)
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encoded())
    }
}

impl fmt::Debug for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountAddress({})", self.encoded())
    }
}

impl Serialize for AccountAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encoded())
    }
}

impl<'de> Deserialize<'de> for AccountAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::parse_field("address", &encoded).map_err(serde::de::Error::custom)
    }
}

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]{12}$").expect("static name pattern"));

/// Registered account name, usable as a transfer recipient
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Name(String);

impl Name {
    pub const LENGTH: usize = 12;

    /// Validate a name, reporting failures against `field`
    pub fn parse_field(field: &'static str, value: &str) -> ClientResult<Self> {
        if !NAME_PATTERN.is_match(value) {
            return Err(ClientError::invalid_field(
                field,
                format!("name must be {} characters of [a-z0-9]", Self::LENGTH),
            ));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Name {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_field("name", s)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Built-in accounts that receive governance transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystemAccount {
    /// Name registry
    Name,
    /// Staking and voting
    System,
}

impl SystemAccount {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemAccount::Name => "aergo.name",
            SystemAccount::System => "aergo.system",
        }
    }
}

/// Transaction recipient: an address, a registered name or a system account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    Address(AccountAddress),
    Name(Name),
    System(SystemAccount),
}

impl Recipient {
    /// Bytes placed in the canonical encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Recipient::Address(address) => address.as_bytes().to_vec(),
            Recipient::Name(name) => name.as_str().as_bytes().to_vec(),
            Recipient::System(account) => account.as_str().as_bytes().to_vec(),
        }
    }
}

impl From<AccountAddress> for Recipient {
    fn from(address: AccountAddress) -> Self {
        Recipient::Address(address)
    }
}

impl From<Name> for Recipient {
    fn from(name: Name) -> Self {
        Recipient::Name(name)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Address(address) => fmt::Display::fmt(address, f),
            Recipient::Name(name) => fmt::Display::fmt(name, f),
            Recipient::System(account) => f.write_str(account.as_str()),
        }
    }
}

// ============================================================================
// AMOUNTS AND FEES
// ============================================================================

/// Denomination used when parsing human-readable amounts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AerUnit {
    Aer,
    Gaer,
    Aergo,
}

impl AerUnit {
    fn scale(self) -> u128 {
        match self {
            AerUnit::Aer => 1,
            AerUnit::Gaer => AER_PER_GAER,
            AerUnit::Aergo => AER_PER_AERGO,
        }
    }

    fn decimals(self) -> usize {
        match self {
            AerUnit::Aer => 0,
            AerUnit::Gaer => 9,
            AerUnit::Aergo => 18,
        }
    }
}

/// Non-negative amount in base units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Aer(u128);

impl Aer {
    pub const ZERO: Aer = Aer(0);
    pub const ONE: Aer = Aer(1);
    pub const AERGO_ONE: Aer = Aer(AER_PER_AERGO);

    pub fn new(base_units: u128) -> Self {
        Self(base_units)
    }

    pub fn value(&self) -> u128 {
        self.0
    }

    /// Whole aergo
    pub fn aergo(amount: u64) -> Self {
        Self(amount as u128 * AER_PER_AERGO)
    }

    /// Parse a decimal string such as `"10000"` or `"1.5"` in the given unit
    pub fn parse(value: &str, unit: AerUnit) -> ClientResult<Self> {
        let value = value.trim();
        if value.starts_with('-') {
            return Err(ClientError::invalid_field("amount", "must not be negative"));
        }
        let (whole, fraction) = match value.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (value, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(ClientError::invalid_field("amount", "empty amount"));
        }
        if fraction.len() > unit.decimals() {
            return Err(ClientError::invalid_field(
                "amount",
                format!("more than {} decimals for {:?}", unit.decimals(), unit),
            ));
        }
        let parse_digits = |digits: &str| -> ClientResult<u128> {
            if digits.is_empty() {
                return Ok(0);
            }
            if !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ClientError::invalid_field(
                    "amount",
                    format!("not a number: {}", value),
                ));
            }
            digits
                .parse::<u128>()
                .map_err(|e| ClientError::invalid_field("amount", e.to_string()))
        };
        let whole_units = parse_digits(whole)?
            .checked_mul(unit.scale())
            .ok_or_else(|| ClientError::invalid_field("amount", "overflow"))?;
        let padded = format!("{:0<width$}", fraction, width = unit.decimals());
        let fraction_units = parse_digits(&padded)?;
        whole_units
            .checked_add(fraction_units)
            .map(Self)
            .ok_or_else(|| ClientError::invalid_field("amount", "overflow"))
    }

    /// Big-endian bytes with leading zeros stripped
    pub fn to_minimal_bytes(&self) -> Vec<u8> {
        let bytes = self.0.to_be_bytes();
        let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        bytes[first..].to_vec()
    }

    /// Validate a signed input amount
    pub fn from_signed(field: &'static str, value: i128) -> ClientResult<Self> {
        u128::try_from(value)
            .map(Self)
            .map_err(|_| ClientError::invalid_field(field, "must not be negative"))
    }
}

/// Amount input accepted by transaction setters
///
/// Signed integers are accepted so that negative input reaches validation
/// and is reported against the `amount` field instead of wrapping.
pub trait IntoAmount {
    fn into_amount(self) -> ClientResult<Aer>;
}

impl IntoAmount for Aer {
    fn into_amount(self) -> ClientResult<Aer> {
        Ok(self)
    }
}

macro_rules! signed_amount {
    ($($ty:ty),*) => {$(
        impl IntoAmount for $ty {
            fn into_amount(self) -> ClientResult<Aer> {
                Aer::from_signed("amount", i128::from(self))
            }
        }
    )*};
}

macro_rules! unsigned_amount {
    ($($ty:ty),*) => {$(
        impl IntoAmount for $ty {
            fn into_amount(self) -> ClientResult<Aer> {
                Ok(Aer(u128::from(self)))
            }
        }
    )*};
}

signed_amount!(i32, i64, i128);
unsigned_amount!(u32, u64, u128);

impl fmt::Display for Aer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} aer", self.0)
    }
}

/// Fee specification: a fixed maximum cost or the unlimited marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fee {
    Fixed(Aer),
    Unlimited,
}

impl Fee {
    pub const ZERO: Fee = Fee::Fixed(Aer::ZERO);
    pub const INFINITY: Fee = Fee::Unlimited;

    /// Validate a signed fee amount
    pub fn fixed(amount: i128) -> ClientResult<Self> {
        Aer::from_signed("fee", amount).map(Fee::Fixed)
    }

    /// Fee limit encoded into the canonical form; zero means unlimited
    pub fn limit(&self) -> u128 {
        match self {
            Fee::Fixed(aer) => aer.value(),
            Fee::Unlimited => 0,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Fee::Unlimited)
    }
}

impl Default for Fee {
    fn default() -> Self {
        Fee::ZERO
    }
}

// ============================================================================
// CHAIN RECORDS
// ============================================================================

/// Authoritative account state reported by the endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub address: AccountAddress,
    /// Last nonce used on chain
    pub nonce: u64,
    pub balance: Aer,
}

/// Block header pushed on the new-block stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: BlockHash,
    pub previous_hash: BlockHash,
    pub height: u64,
    pub timestamp: DateTime<Utc>,
    pub tx_hashes: Vec<TxHash>,
}

/// Lightweight block summary pushed on the metadata stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub hash: BlockHash,
    pub height: u64,
    pub tx_count: usize,
}

impl From<&Block> for BlockMetadata {
    fn from(block: &Block) -> Self {
        Self {
            hash: block.hash,
            height: block.height,
            tx_count: block.tx_hashes.len(),
        }
    }
}

/// Contract event emitted by a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub contract: ContractAddress,
    pub name: String,
    pub args: Vec<ContractArg>,
    pub index: u32,
    pub tx_hash: TxHash,
    pub block_hash: BlockHash,
    pub block_number: u64,
}

/// Block lookup key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Hash(BlockHash),
    Height(u64),
}

impl From<BlockHash> for BlockRef {
    fn from(hash: BlockHash) -> Self {
        BlockRef::Hash(hash)
    }
}

impl From<u64> for BlockRef {
    fn from(height: u64) -> Self {
        BlockRef::Height(height)
    }
}

/// Head of the chain as seen by the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainStatus {
    pub best_block_hash: BlockHash,
    pub best_height: u64,
    pub chain_id_hash: ChainIdHash,
}

/// Outcome recorded for an accepted transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Success,
    Error,
}

/// Execution receipt of an accepted transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub status: TxStatus,
    /// Raw execution result, JSON for contract calls
    pub result: String,
    /// Set for deployments
    pub contract_address: Option<ContractAddress>,
}

/// Amount an account has staked and the height it last changed at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeInfo {
    pub address: AccountAddress,
    pub amount: Aer,
    pub when: u64,
}

/// One ballot cast by an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteInfo {
    pub vote_id: String,
    pub candidates: Vec<String>,
    /// Voting power, the voter's staked amount
    pub amount: Aer,
}

/// Every ballot of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTotalVote {
    pub address: AccountAddress,
    pub votes: Vec<VoteInfo>,
}

/// Candidate and accumulated voting power in a vote tally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectedCandidate {
    pub vote_id: String,
    pub candidate: String,
    pub amount: Aer,
}

/// Raw result of a read-only contract query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractResult(bytes::Bytes);

impl ContractResult {
    pub fn new(raw: impl Into<bytes::Bytes>) -> Self {
        Self(raw.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Deserialize the JSON result into `T`
    pub fn bind<T: serde::de::DeserializeOwned>(&self) -> ClientResult<T> {
        serde_json::from_slice(&self.0).map_err(|e| {
            ClientError::invalid_field("result", format!("cannot bind contract result: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trips_through_text() {
        let address = AccountAddress::from_public_key([5u8; 32]);
        let encoded = address.to_string();
        let parsed: AccountAddress = encoded.parse().unwrap();
        assert_eq!(parsed, address);
    }

    #[test]
    fn test_malformed_address_names_field() {
        let err = AccountAddress::parse_field("to", "not-an-address").unwrap_err();
        assert_eq!(err.field(), Some("to"));

        let err = AccountAddress::parse_field("from", "").unwrap_err();
        assert_eq!(err.field(), Some("from"));

        // Valid base58check but wrong version byte
        let foreign = bs58::encode([1u8; 32]).with_check_version(0x17).into_string();
        assert!(AccountAddress::parse_field("to", &foreign).is_err());
    }

    #[test]
    fn test_name_rules() {
        assert!(Name::from_str("namenamename").is_ok());
        assert!(Name::from_str("short").is_err());
        assert!(Name::from_str("NAMENAMENAME").is_err());
        assert!(Name::from_str("name_name_na").is_err());
    }

    #[test]
    fn test_aer_parsing() {
        assert_eq!(Aer::parse("10000", AerUnit::Aergo).unwrap(), Aer::aergo(10000));
        assert_eq!(Aer::parse("1.5", AerUnit::Gaer).unwrap(), Aer::new(1_500_000_000));
        assert_eq!(Aer::parse("7", AerUnit::Aer).unwrap(), Aer::new(7));
        assert_eq!(
            Aer::parse("-1", AerUnit::Aer).unwrap_err().field(),
            Some("amount")
        );
        assert!(Aer::parse("0.1", AerUnit::Aer).is_err());
        assert!(Aer::parse("1e5", AerUnit::Aergo).is_err());
    }

    #[test]
    fn test_signed_amounts_rejected() {
        assert_eq!(Aer::from_signed("amount", -1).unwrap_err().field(), Some("amount"));
        assert_eq!(Fee::fixed(-5).unwrap_err().field(), Some("fee"));
        assert_eq!(Fee::fixed(5).unwrap(), Fee::Fixed(Aer::new(5)));
    }

    #[test]
    fn test_minimal_bytes() {
        assert!(Aer::ZERO.to_minimal_bytes().is_empty());
        assert_eq!(Aer::new(0x0102).to_minimal_bytes(), vec![0x01, 0x02]);
    }

    #[test]
    fn test_hash_text_form() {
        let hash = TxHash::from([3u8; 32]);
        let parsed: TxHash = hash.to_string().parse().unwrap();
        assert_eq!(parsed, hash);
        assert_eq!("abc".parse::<ChainIdHash>().unwrap_err().field(), Some("chain_id_hash"));
    }

    #[test]
    fn test_amount_inputs_never_clamp() {
        assert_eq!(Aer::new(u128::MAX).into_amount().unwrap().value(), u128::MAX);
        assert_eq!(u64::MAX.into_amount().unwrap().value(), u64::MAX as u128);
        assert_eq!(i128::MAX.into_amount().unwrap().value(), i128::MAX as u128);
        assert_eq!((-1i64).into_amount().unwrap_err().field(), Some("amount"));
        assert_eq!(i128::MIN.into_amount().unwrap_err().field(), Some("amount"));
    }

    #[test]
    fn test_contract_result_binding() {
        let result = ContractResult::new(br#"{"Int":333,"Text":"test2"}"#.to_vec());
        let value: ContractArg = result.bind().unwrap();
        let mut expected = std::collections::BTreeMap::new();
        expected.insert("Int".to_string(), ContractArg::Integer(333));
        expected.insert("Text".to_string(), ContractArg::from("test2"));
        assert_eq!(value, ContractArg::Map(expected));

        let err = ContractResult::new(b"not json".to_vec()).bind::<ContractArg>().unwrap_err();
        assert_eq!(err.field(), Some("result"));
    }
}
