//! Payload encoding for contract and governance transactions
//!
//! Formats:
//! - invocation: JSON `{"Name": <function>, "Args": [...]}`
//! - deploy: `u32` big-endian length of (code + 4) || code || JSON args (omitted when empty)
//! - governance: JSON `{"Name": "v1<call>", "Args": [...]}` addressed to a system account
//!
//! Every encoder has a decoder that recovers the original description, so
//! tooling can inspect past transactions.

use crate::errors::{ClientError, ClientResult};
use crate::types::{Aer, ContractAddress};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version byte of base58check-encoded compiled contracts
pub const CONTRACT_CODE_VERSION: u8 = 0xC0;

/// Version prefix carried by every governance call name
pub const GOVERNANCE_VERSION: &str = "v1";

/// A single contract call argument
///
/// Maps one-to-one onto JSON values so argument count and types survive a
/// round trip through the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContractArg {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<ContractArg>),
    Map(BTreeMap<String, ContractArg>),
}

impl ContractArg {
    /// Non-finite floats have no JSON form and would decode as null
    fn check_encodable(&self) -> ClientResult<()> {
        match self {
            ContractArg::Float(value) if !value.is_finite() => Err(ClientError::invalid_field(
                "args",
                format!("non-finite float {} cannot be encoded", value),
            )),
            ContractArg::List(items) => items.iter().try_for_each(ContractArg::check_encodable),
            ContractArg::Map(entries) => {
                entries.values().try_for_each(ContractArg::check_encodable)
            }
            _ => Ok(()),
        }
    }
}

impl From<&str> for ContractArg {
    fn from(value: &str) -> Self {
        ContractArg::String(value.to_string())
    }
}

impl From<String> for ContractArg {
    fn from(value: String) -> Self {
        ContractArg::String(value)
    }
}

impl From<i64> for ContractArg {
    fn from(value: i64) -> Self {
        ContractArg::Integer(value)
    }
}

impl From<i32> for ContractArg {
    fn from(value: i32) -> Self {
        ContractArg::Integer(value as i64)
    }
}

impl From<u32> for ContractArg {
    fn from(value: u32) -> Self {
        ContractArg::Integer(value as i64)
    }
}

impl From<bool> for ContractArg {
    fn from(value: bool) -> Self {
        ContractArg::Bool(value)
    }
}

impl From<f64> for ContractArg {
    fn from(value: f64) -> Self {
        ContractArg::Float(value)
    }
}

impl<T: Into<ContractArg>> From<Vec<T>> for ContractArg {
    fn from(values: Vec<T>) -> Self {
        ContractArg::List(values.into_iter().map(Into::into).collect())
    }
}

fn check_args(args: &[ContractArg]) -> ClientResult<()> {
    args.iter().try_for_each(ContractArg::check_encodable)
}

/// Wire shape shared by invocation and governance payloads
#[derive(Debug, Serialize, Deserialize)]
struct CallBody<A> {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Args", default = "Vec::new")]
    args: Vec<A>,
}

// ============================================================================
// INVOCATION
// ============================================================================

/// Description of a contract function call
#[derive(Debug, Clone, PartialEq)]
pub struct ContractInvocation {
    pub contract: ContractAddress,
    pub function: String,
    pub args: Vec<ContractArg>,
    pub amount: Aer,
    /// Contract pays the fee instead of the sender
    pub delegate_fee: bool,
}

impl ContractInvocation {
    pub fn builder(contract: ContractAddress) -> InvocationBuilder {
        InvocationBuilder {
            contract,
            function: None,
            args: Vec::new(),
            amount: Aer::ZERO,
            delegate_fee: false,
        }
    }

    /// Encode the call into a transaction payload
    pub fn encode_payload(&self) -> ClientResult<Bytes> {
        check_args(&self.args)?;
        let body = CallBody {
            name: self.function.clone(),
            args: self.args.clone(),
        };
        serde_json::to_vec(&body)
            .map(Bytes::from)
            .map_err(|e| ClientError::invalid_field("args", e.to_string()))
    }

    /// Recover the call from a payload sent to `contract`
    ///
    /// Amount and fee delegation live on the transaction, not the payload, so
    /// they come back as their defaults.
    pub fn decode_payload(contract: ContractAddress, payload: &[u8]) -> ClientResult<Self> {
        let body: CallBody<ContractArg> = serde_json::from_slice(payload).map_err(|e| {
            ClientError::invalid_field("payload", format!("not an invocation: {}", e))
        })?;
        if body.name.is_empty() {
            return Err(ClientError::invalid_field("payload", "function name is empty"));
        }
        Ok(Self {
            contract,
            function: body.name,
            args: body.args,
            amount: Aer::ZERO,
            delegate_fee: false,
        })
    }
}

/// Builder for [`ContractInvocation`]
#[derive(Debug, Clone)]
pub struct InvocationBuilder {
    contract: ContractAddress,
    function: Option<String>,
    args: Vec<ContractArg>,
    amount: Aer,
    delegate_fee: bool,
}

impl InvocationBuilder {
    pub fn function(mut self, name: impl Into<String>) -> Self {
        self.function = Some(name.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<ContractArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<ContractArg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn amount(mut self, amount: Aer) -> Self {
        self.amount = amount;
        self
    }

    pub fn delegate_fee(mut self, delegate: bool) -> Self {
        self.delegate_fee = delegate;
        self
    }

    pub fn build(self) -> ClientResult<ContractInvocation> {
        let function = self
            .function
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ClientError::missing_field("function"))?;
        check_args(&self.args)?;
        Ok(ContractInvocation {
            contract: self.contract,
            function,
            args: self.args,
            amount: self.amount,
            delegate_fee: self.delegate_fee,
        })
    }
}

// ============================================================================
// DEFINITION
// ============================================================================

/// Compiled contract plus constructor arguments
#[derive(Debug, Clone, PartialEq)]
pub struct ContractDefinition {
    pub code: Bytes,
    pub constructor_args: Vec<ContractArg>,
    pub amount: Aer,
}

impl ContractDefinition {
    pub fn builder() -> DefinitionBuilder {
        DefinitionBuilder::default()
    }

    pub fn encode_payload(&self) -> ClientResult<Bytes> {
        check_args(&self.constructor_args)?;
        let declared = u32::try_from(self.code.len() + 4)
            .map_err(|_| ClientError::invalid_field("definition", "contract code too large"))?;

        let mut buf = BytesMut::with_capacity(self.code.len() + 4);
        buf.put_u32(declared);
        buf.extend_from_slice(&self.code);
        if !self.constructor_args.is_empty() {
            let args = serde_json::to_vec(&self.constructor_args)
                .map_err(|e| ClientError::invalid_field("args", e.to_string()))?;
            buf.extend_from_slice(&args);
        }
        Ok(buf.freeze())
    }

    /// Recover code and constructor arguments from a deploy payload
    pub fn decode_payload(payload: &[u8]) -> ClientResult<Self> {
        if payload.len() < 4 {
            return Err(ClientError::invalid_field("payload", "deploy payload shorter than header"));
        }
        let declared =
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        if declared < 4 || declared > payload.len() {
            return Err(ClientError::invalid_field(
                "payload",
                format!("declared code length {} out of range", declared),
            ));
        }
        let code = Bytes::copy_from_slice(&payload[4..declared]);
        let tail = &payload[declared..];
        let constructor_args = if tail.is_empty() {
            Vec::new()
        } else {
            serde_json::from_slice(tail).map_err(|e| {
                ClientError::invalid_field("payload", format!("bad constructor args: {}", e))
            })?
        };
        Ok(Self {
            code,
            constructor_args,
            amount: Aer::ZERO,
        })
    }
}

/// Builder for [`ContractDefinition`]
#[derive(Debug, Clone, Default)]
pub struct DefinitionBuilder {
    code: Option<ClientResult<Bytes>>,
    constructor_args: Vec<ContractArg>,
    amount: Aer,
}

impl DefinitionBuilder {
    /// base58check text as emitted by the contract compiler
    pub fn encoded_contract(mut self, encoded: &str) -> Self {
        let decoded = bs58::decode(encoded)
            .with_check(Some(CONTRACT_CODE_VERSION))
            .into_vec()
            .map_err(|e| {
                ClientError::invalid_field("definition", format!("malformed contract: {}", e))
            })
            .map(|mut bytes| {
                bytes.remove(0);
                Bytes::from(bytes)
            });
        self.code = Some(decoded);
        self
    }

    /// Raw compiled bytes
    pub fn code(mut self, code: impl Into<Bytes>) -> Self {
        self.code = Some(Ok(code.into()));
        self
    }

    pub fn constructor_arg(mut self, arg: impl Into<ContractArg>) -> Self {
        self.constructor_args.push(arg.into());
        self
    }

    pub fn amount(mut self, amount: Aer) -> Self {
        self.amount = amount;
        self
    }

    pub fn build(self) -> ClientResult<ContractDefinition> {
        let code = self.code.ok_or_else(|| ClientError::missing_field("definition"))??;
        if code.is_empty() {
            return Err(ClientError::invalid_field("definition", "contract code is empty"));
        }
        check_args(&self.constructor_args)?;
        Ok(ContractDefinition {
            code,
            constructor_args: self.constructor_args,
            amount: self.amount,
        })
    }
}

// ============================================================================
// GOVERNANCE
// ============================================================================

/// Call names owned by the name and staking system; never valid vote ids
pub const RESERVED_CALLS: [&str; 4] = ["createName", "updateName", "stake", "unstake"];

/// Whether `vote_id` would collide with a reserved system call on decode
pub fn is_reserved_call(vote_id: &str) -> bool {
    RESERVED_CALLS.contains(&vote_id)
}

/// System calls carried by governance transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernanceCall {
    CreateName { name: String },
    UpdateName { name: String, next_owner: String },
    Stake,
    Unstake,
    Vote { vote_id: String, candidates: Vec<String> },
}

impl GovernanceCall {
    fn call_name(&self) -> String {
        let suffix = match self {
            GovernanceCall::CreateName { .. } => "createName",
            GovernanceCall::UpdateName { .. } => "updateName",
            GovernanceCall::Stake => "stake",
            GovernanceCall::Unstake => "unstake",
            GovernanceCall::Vote { vote_id, .. } => vote_id.as_str(),
        };
        format!("{}{}", GOVERNANCE_VERSION, suffix)
    }

    fn call_args(&self) -> Vec<String> {
        match self {
            GovernanceCall::CreateName { name } => vec![name.clone()],
            GovernanceCall::UpdateName { name, next_owner } => {
                vec![name.clone(), next_owner.clone()]
            }
            GovernanceCall::Stake | GovernanceCall::Unstake => Vec::new(),
            GovernanceCall::Vote { candidates, .. } => candidates.clone(),
        }
    }

    pub fn encode_payload(&self) -> ClientResult<Bytes> {
        if let GovernanceCall::Vote { vote_id, .. } = self {
            if vote_id.is_empty() || is_reserved_call(vote_id) {
                return Err(ClientError::invalid_field(
                    "vote_id",
                    format!("'{}' is not a valid vote id", vote_id),
                ));
            }
        }
        let body = CallBody {
            name: self.call_name(),
            args: self.call_args(),
        };
        serde_json::to_vec(&body)
            .map(Bytes::from)
            .map_err(|e| ClientError::Internal(format!("governance payload: {}", e)))
    }

    pub fn decode_payload(payload: &[u8]) -> ClientResult<Self> {
        let body: CallBody<String> = serde_json::from_slice(payload).map_err(|e| {
            ClientError::invalid_field("payload", format!("not a governance call: {}", e))
        })?;
        let call = body.name.strip_prefix(GOVERNANCE_VERSION).ok_or_else(|| {
            ClientError::invalid_field(
                "payload",
                format!("unversioned governance call {}", body.name),
            )
        })?;
        let mut args = body.args.into_iter();
        let decoded = match call {
            "createName" => GovernanceCall::CreateName {
                name: args.next().ok_or_else(|| ClientError::missing_field("name"))?,
            },
            "updateName" => GovernanceCall::UpdateName {
                name: args.next().ok_or_else(|| ClientError::missing_field("name"))?,
                next_owner: args.next().ok_or_else(|| ClientError::missing_field("next_owner"))?,
            },
            "stake" => GovernanceCall::Stake,
            "unstake" => GovernanceCall::Unstake,
            vote_id if !vote_id.is_empty() => GovernanceCall::Vote {
                vote_id: vote_id.to_string(),
                candidates: args.collect(),
            },
            _ => return Err(ClientError::invalid_field("payload", "empty governance call")),
        };
        Ok(decoded)
    }
}
