//! Transaction construction
//!
//! A [`RawTransaction`] is an immutable, validated value made of the fields
//! every transaction shares plus a tagged [`TxBody`]. The payload bytes are
//! derived from the body when the transaction is built, so the payload format
//! always matches the declared variant.
//!
//! Construction goes through [`TxBuilder`], which records the first invalid
//! field and reports it from `build()`.

pub mod payload;

pub use payload::{
    ContractArg, ContractDefinition, ContractInvocation, DefinitionBuilder, GovernanceCall,
    InvocationBuilder,
};

use crate::errors::{ClientError, ClientResult};
use crate::types::{
    AccountAddress, Aer, ChainIdHash, ContractAddress, Fee, Hash256, IntoAmount, Name, Recipient,
    SystemAccount,
};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fmt;

/// Type tag carried in the canonical encoding; nodes dispatch on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TxType {
    Normal = 0,
    Governance = 1,
    Redeploy = 2,
    FeeDelegation = 3,
    Transfer = 4,
    Call = 5,
    Deploy = 6,
}

/// Transaction variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxKind {
    Transfer,
    Deploy,
    Invoke,
    Redeploy,
    CreateName,
    UpdateName,
    Stake,
    Unstake,
    Vote,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxKind::Transfer => "transfer",
            TxKind::Deploy => "deploy",
            TxKind::Invoke => "invoke",
            TxKind::Redeploy => "redeploy",
            TxKind::CreateName => "create_name",
            TxKind::UpdateName => "update_name",
            TxKind::Stake => "stake",
            TxKind::Unstake => "unstake",
            TxKind::Vote => "vote",
        };
        f.write_str(name)
    }
}

/// Variant-specific content of a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TxBody {
    Transfer {
        to: Recipient,
        amount: Aer,
        payload: Bytes,
    },
    Deploy {
        definition: ContractDefinition,
    },
    Invoke {
        invocation: ContractInvocation,
    },
    Redeploy {
        contract: ContractAddress,
        definition: ContractDefinition,
    },
    CreateName {
        name: Name,
    },
    UpdateName {
        name: Name,
        next_owner: AccountAddress,
    },
    Stake {
        amount: Aer,
    },
    Unstake {
        amount: Aer,
    },
    Vote {
        vote_id: String,
        candidates: Vec<String>,
    },
}

impl TxBody {
    pub fn kind(&self) -> TxKind {
        match self {
            TxBody::Transfer { .. } => TxKind::Transfer,
            TxBody::Deploy { .. } => TxKind::Deploy,
            TxBody::Invoke { .. } => TxKind::Invoke,
            TxBody::Redeploy { .. } => TxKind::Redeploy,
            TxBody::CreateName { .. } => TxKind::CreateName,
            TxBody::UpdateName { .. } => TxKind::UpdateName,
            TxBody::Stake { .. } => TxKind::Stake,
            TxBody::Unstake { .. } => TxKind::Unstake,
            TxBody::Vote { .. } => TxKind::Vote,
        }
    }

    pub fn tx_type(&self) -> TxType {
        match self {
            TxBody::Transfer { .. } => TxType::Transfer,
            TxBody::Deploy { .. } => TxType::Deploy,
            TxBody::Invoke { invocation } if invocation.delegate_fee => TxType::FeeDelegation,
            TxBody::Invoke { .. } => TxType::Call,
            TxBody::Redeploy { .. } => TxType::Redeploy,
            TxBody::CreateName { .. }
            | TxBody::UpdateName { .. }
            | TxBody::Stake { .. }
            | TxBody::Unstake { .. }
            | TxBody::Vote { .. } => TxType::Governance,
        }
    }

    pub fn recipient(&self) -> Option<Recipient> {
        match self {
            TxBody::Transfer { to, .. } => Some(to.clone()),
            TxBody::Deploy { .. } => None,
            TxBody::Invoke { invocation } => Some(Recipient::Address(invocation.contract.clone())),
            TxBody::Redeploy { contract, .. } => Some(Recipient::Address(contract.clone())),
            TxBody::CreateName { .. } | TxBody::UpdateName { .. } => {
                Some(Recipient::System(SystemAccount::Name))
            }
            TxBody::Stake { .. } | TxBody::Unstake { .. } | TxBody::Vote { .. } => {
                Some(Recipient::System(SystemAccount::System))
            }
        }
    }

    pub fn amount(&self) -> Aer {
        match self {
            TxBody::Transfer { amount, .. }
            | TxBody::Stake { amount }
            | TxBody::Unstake { amount } => *amount,
            TxBody::Deploy { definition } | TxBody::Redeploy { definition, .. } => {
                definition.amount
            }
            TxBody::Invoke { invocation } => invocation.amount,
            TxBody::CreateName { .. } | TxBody::UpdateName { .. } | TxBody::Vote { .. } => {
                Aer::ZERO
            }
        }
    }

    /// Payload bytes for this variant
    pub fn encode_payload(&self) -> ClientResult<Bytes> {
        match self {
            TxBody::Transfer { payload, .. } => Ok(payload.clone()),
            TxBody::Deploy { definition } | TxBody::Redeploy { definition, .. } => {
                definition.encode_payload()
            }
            TxBody::Invoke { invocation } => invocation.encode_payload(),
            TxBody::CreateName { name } => GovernanceCall::CreateName {
                name: name.as_str().to_string(),
            }
            .encode_payload(),
            TxBody::UpdateName { name, next_owner } => GovernanceCall::UpdateName {
                name: name.as_str().to_string(),
                next_owner: next_owner.encoded(),
            }
            .encode_payload(),
            TxBody::Stake { .. } => GovernanceCall::Stake.encode_payload(),
            TxBody::Unstake { .. } => GovernanceCall::Unstake.encode_payload(),
            TxBody::Vote { vote_id, candidates } => GovernanceCall::Vote {
                vote_id: vote_id.clone(),
                candidates: candidates.clone(),
            }
            .encode_payload(),
        }
    }
}

/// Unsigned, validated transaction
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub(crate) chain_id_hash: ChainIdHash,
    pub(crate) from: AccountAddress,
    pub(crate) nonce: u64,
    pub(crate) fee: Fee,
    pub(crate) body: TxBody,
    pub(crate) payload: Bytes,
}

impl RawTransaction {
    pub fn builder(kind: TxKind) -> TxBuilder {
        TxBuilder::new(kind)
    }

    pub fn transfer() -> TxBuilder {
        TxBuilder::new(TxKind::Transfer)
    }

    pub fn deploy() -> TxBuilder {
        TxBuilder::new(TxKind::Deploy)
    }

    pub fn invoke() -> TxBuilder {
        TxBuilder::new(TxKind::Invoke)
    }

    pub fn redeploy() -> TxBuilder {
        TxBuilder::new(TxKind::Redeploy)
    }

    pub fn create_name() -> TxBuilder {
        TxBuilder::new(TxKind::CreateName)
    }

    pub fn update_name() -> TxBuilder {
        TxBuilder::new(TxKind::UpdateName)
    }

    pub fn stake() -> TxBuilder {
        TxBuilder::new(TxKind::Stake)
    }

    pub fn unstake() -> TxBuilder {
        TxBuilder::new(TxKind::Unstake)
    }

    pub fn vote() -> TxBuilder {
        TxBuilder::new(TxKind::Vote)
    }

    pub fn chain_id_hash(&self) -> &ChainIdHash {
        &self.chain_id_hash
    }

    pub fn from(&self) -> &AccountAddress {
        &self.from
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn fee(&self) -> Fee {
        self.fee
    }

    pub fn body(&self) -> &TxBody {
        &self.body
    }

    pub fn kind(&self) -> TxKind {
        self.body.kind()
    }

    pub fn tx_type(&self) -> TxType {
        self.body.tx_type()
    }

    pub fn to(&self) -> Option<Recipient> {
        self.body.recipient()
    }

    pub fn amount(&self) -> Aer {
        self.body.amount()
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Same transaction with another nonce; used when a retry reallocates
    pub fn with_nonce(&self, nonce: u64) -> ClientResult<Self> {
        if nonce == 0 {
            return Err(ClientError::invalid_field("nonce", "must be greater than zero"));
        }
        Ok(Self {
            nonce,
            ..self.clone()
        })
    }

    /// Deterministic byte encoding covered by the transaction hash
    ///
    /// Variable-length fields are length-prefixed so distinct transactions
    /// never share an encoding.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        fn put_var(buf: &mut Vec<u8>, bytes: &[u8]) {
            buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(bytes);
        }

        let mut buf = Vec::with_capacity(128 + self.payload.len());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(self.from.as_bytes());
        put_var(&mut buf, &self.to().map(|r| r.to_bytes()).unwrap_or_default());
        put_var(&mut buf, &self.amount().to_minimal_bytes());
        put_var(&mut buf, &self.payload);
        buf.extend_from_slice(&self.fee.limit().to_le_bytes());
        buf.push(u8::from(self.fee.is_unlimited()));
        buf.push(self.tx_type() as u8);
        buf.extend_from_slice(self.chain_id_hash.as_bytes());
        buf
    }

    /// sha256 over the canonical encoding
    pub fn hash(&self) -> Hash256 {
        Hash256(Sha256::digest(self.canonical_bytes()).into())
    }

    /// Recover the contract call carried by an invoke transaction
    pub fn invocation(&self) -> ClientResult<ContractInvocation> {
        match &self.body {
            TxBody::Invoke { invocation } => {
                let mut decoded =
                    ContractInvocation::decode_payload(invocation.contract.clone(), &self.payload)?;
                decoded.amount = invocation.amount;
                decoded.delegate_fee = self.tx_type() == TxType::FeeDelegation;
                Ok(decoded)
            }
            _ => Err(ClientError::invalid_field(
                "kind",
                format!("{} transaction carries no invocation", self.kind()),
            )),
        }
    }
}

/// Fluent builder for [`RawTransaction`]
///
/// Setters never fail; the first rejected input is remembered and returned
/// by [`TxBuilder::build`].
#[derive(Debug, Clone)]
pub struct TxBuilder {
    kind: TxKind,
    first_error: Option<ClientError>,
    chain_id_hash: Option<ChainIdHash>,
    from: Option<AccountAddress>,
    to: Option<Recipient>,
    amount: Option<Aer>,
    nonce: Option<u64>,
    fee: Option<Fee>,
    payload: Option<Bytes>,
    definition: Option<ContractDefinition>,
    invocation: Option<ContractInvocation>,
    contract: Option<ContractAddress>,
    name: Option<Name>,
    next_owner: Option<AccountAddress>,
    vote_id: Option<String>,
    candidates: Vec<String>,
}

impl TxBuilder {
    pub fn new(kind: TxKind) -> Self {
        Self {
            kind,
            first_error: None,
            chain_id_hash: None,
            from: None,
            to: None,
            amount: None,
            nonce: None,
            fee: None,
            payload: None,
            definition: None,
            invocation: None,
            contract: None,
            name: None,
            next_owner: None,
            vote_id: None,
            candidates: Vec::new(),
        }
    }

    fn record<T>(&mut self, result: ClientResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.first_error.get_or_insert(err);
                None
            }
        }
    }

    pub fn chain_id_hash(mut self, chain_id_hash: ChainIdHash) -> Self {
        self.chain_id_hash = Some(chain_id_hash);
        self
    }

    pub fn from(mut self, from: AccountAddress) -> Self {
        self.from = Some(from);
        self
    }

    /// Sender given in its text form
    pub fn from_encoded(mut self, from: &str) -> Self {
        let parsed = AccountAddress::parse_field("from", from);
        self.from = self.record(parsed);
        self
    }

    pub fn to(mut self, to: impl Into<Recipient>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Recipient given as an encoded address or a registered name
    pub fn to_encoded(mut self, to: &str) -> Self {
        let parsed = AccountAddress::parse_field("to", to)
            .map(Recipient::Address)
            .or_else(|_| Name::parse_field("to", to).map(Recipient::Name));
        self.to = self.record(parsed);
        self
    }

    /// Negative input is rejected with the `amount` field
    pub fn amount(mut self, amount: impl IntoAmount) -> Self {
        let amount = amount.into_amount();
        self.amount = self.record(amount);
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn fee(mut self, fee: Fee) -> Self {
        self.fee = Some(fee);
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn definition(mut self, definition: ContractDefinition) -> Self {
        self.definition = Some(definition);
        self
    }

    pub fn invocation(mut self, invocation: ContractInvocation) -> Self {
        self.invocation = Some(invocation);
        self
    }

    pub fn contract(mut self, contract: ContractAddress) -> Self {
        self.contract = Some(contract);
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        let parsed = Name::parse_field("name", name);
        self.name = self.record(parsed);
        self
    }

    pub fn next_owner(mut self, owner: AccountAddress) -> Self {
        self.next_owner = Some(owner);
        self
    }

    pub fn vote_id(mut self, vote_id: impl Into<String>) -> Self {
        self.vote_id = Some(vote_id.into());
        self
    }

    pub fn candidate(mut self, candidate: impl Into<String>) -> Self {
        self.candidates.push(candidate.into());
        self
    }

    pub fn candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidates.extend(candidates.into_iter().map(Into::into));
        self
    }

    /// Reject a field the variant does not use
    fn forbid<T>(&self, field: &'static str, value: &Option<T>) -> ClientResult<()> {
        if value.is_some() {
            return Err(ClientError::invalid_field(
                field,
                format!("not applicable to {} transactions", self.kind),
            ));
        }
        Ok(())
    }

    fn required_amount(&self) -> ClientResult<Aer> {
        self.amount.ok_or_else(|| ClientError::missing_field("amount"))
    }

    fn build_body(&mut self) -> ClientResult<TxBody> {
        match self.kind {
            TxKind::Transfer => {
                let to = self.to.take().ok_or_else(|| ClientError::missing_field("to"))?;
                let amount = self.required_amount()?;
                let payload = self.payload.take().unwrap_or_default();
                Ok(TxBody::Transfer { to, amount, payload })
            }
            TxKind::Deploy => {
                self.forbid("to", &self.to)?;
                let definition = self.take_definition()?;
                Ok(TxBody::Deploy { definition })
            }
            TxKind::Redeploy => {
                self.forbid("to", &self.to)?;
                let contract = self
                    .contract
                    .take()
                    .ok_or_else(|| ClientError::missing_field("contract"))?;
                let definition = self.take_definition()?;
                Ok(TxBody::Redeploy { contract, definition })
            }
            TxKind::Invoke => {
                self.forbid("to", &self.to)?;
                self.forbid("payload", &self.payload)?;
                let mut invocation = self
                    .invocation
                    .take()
                    .ok_or_else(|| ClientError::missing_field("invocation"))?;
                if let Some(amount) = self.amount {
                    invocation.amount = amount;
                }
                Ok(TxBody::Invoke { invocation })
            }
            TxKind::CreateName => {
                let name = self.name.take().ok_or_else(|| ClientError::missing_field("name"))?;
                Ok(TxBody::CreateName { name })
            }
            TxKind::UpdateName => {
                let name = self.name.take().ok_or_else(|| ClientError::missing_field("name"))?;
                let next_owner = self
                    .next_owner
                    .take()
                    .ok_or_else(|| ClientError::missing_field("next_owner"))?;
                Ok(TxBody::UpdateName { name, next_owner })
            }
            TxKind::Stake => Ok(TxBody::Stake {
                amount: self.required_amount()?,
            }),
            TxKind::Unstake => Ok(TxBody::Unstake {
                amount: self.required_amount()?,
            }),
            TxKind::Vote => {
                let vote_id = self
                    .vote_id
                    .take()
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| ClientError::missing_field("vote_id"))?;
                if payload::is_reserved_call(&vote_id) {
                    return Err(ClientError::invalid_field(
                        "vote_id",
                        format!("'{}' is a reserved system call", vote_id),
                    ));
                }
                if self.candidates.is_empty() {
                    return Err(ClientError::invalid_field(
                        "candidates",
                        "at least one candidate required",
                    ));
                }
                if self.candidates.iter().any(|c| c.is_empty()) {
                    return Err(ClientError::invalid_field(
                        "candidates",
                        "candidate must not be empty",
                    ));
                }
                Ok(TxBody::Vote {
                    vote_id,
                    candidates: std::mem::take(&mut self.candidates),
                })
            }
        }
    }

    fn take_definition(&mut self) -> ClientResult<ContractDefinition> {
        self.forbid("payload", &self.payload)?;
        let mut definition = self
            .definition
            .take()
            .ok_or_else(|| ClientError::missing_field("definition"))?;
        if let Some(amount) = self.amount {
            definition.amount = amount;
        }
        Ok(definition)
    }

    /// Validate and assemble the transaction
    pub fn build(mut self) -> ClientResult<RawTransaction> {
        if let Some(err) = self.first_error.take() {
            return Err(err);
        }
        let chain_id_hash = self
            .chain_id_hash
            .take()
            .ok_or_else(|| ClientError::missing_field("chain_id_hash"))?;
        let from = self.from.take().ok_or_else(|| ClientError::missing_field("from"))?;
        let nonce = self.nonce.ok_or_else(|| ClientError::missing_field("nonce"))?;
        if nonce == 0 {
            return Err(ClientError::invalid_field("nonce", "must be greater than zero"));
        }
        let fee = self.fee.unwrap_or_default();
        let body = self.build_body()?;
        let payload = body.encode_payload()?;

        Ok(RawTransaction {
            chain_id_hash,
            from,
            nonce,
            fee,
            body,
            payload,
        })
    }
}
