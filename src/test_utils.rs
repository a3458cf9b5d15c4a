//! Test Utilities Module
//!
//! An in-process [`LedgerEndpoint`] that behaves like a node closely enough
//! to drive the orchestration core deterministically: it enforces
//! per-account sequence numbers, checks chain id and signatures, can be
//! scripted to inject conflicts and failures, and pushes blocks and events
//! to open streams.
//!
//! Accepted transactions take effect on ledger state: balances, the name
//! registry (with per-height history), stakes and ballots. Every contract
//! behaves as a key-value store: `set(key, value...)` writes and the
//! read-only `get(key)` query reads. Calls to contracts that were never
//! deployed are accepted.
//!
//! Only compiled when running tests or when the `test_utils` feature is
//! enabled.

#![cfg(any(test, feature = "test_utils"))]

use crate::crypto::{sha256, verify_transaction, SignedTransaction};
use crate::endpoint::{
    BlockRange, EventFilter, ItemStream, LedgerEndpoint, StreamFilter, StreamItem,
};
use crate::errors::{ClientError, ClientResult};
use crate::tx::{ContractArg, ContractInvocation, RawTransaction, TxBody};
use crate::types::{
    AccountAddress, AccountState, AccountTotalVote, Aer, Block, BlockHash, BlockMetadata, BlockRef,
    BlockchainStatus, ChainIdHash, ContractAddress, ContractResult, ElectedCandidate, Event, Name,
    Recipient, StakeInfo, TxHash, TxReceipt, TxStatus, VoteInfo,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

type StreamSender = mpsc::UnboundedSender<ClientResult<StreamItem>>;

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<AccountAddress, AccountState>,
    /// Accepted but not yet sealed into a block
    pending: Vec<TxHash>,
    accepted: Vec<SignedTransaction>,
    blocks: Vec<Block>,
    events: Vec<Event>,
    /// Nonces a simulated competing writer consumes before the next submit
    competing_writes: HashMap<AccountAddress, u32>,
    failures: VecDeque<ClientError>,
    streams: Vec<(StreamFilter, StreamSender)>,
    receipts: HashMap<TxHash, TxReceipt>,
    /// Ownership changes as (effective height, owner), oldest first
    names: HashMap<Name, Vec<(u64, AccountAddress)>>,
    stakes: HashMap<AccountAddress, StakeInfo>,
    ballots: HashMap<AccountAddress, BTreeMap<String, Vec<String>>>,
    contracts: HashMap<ContractAddress, BTreeMap<String, ContractArg>>,
}

impl LedgerState {
    fn account(&mut self, address: &AccountAddress) -> &mut AccountState {
        self.accounts
            .entry(address.clone())
            .or_insert_with(|| AccountState {
                address: address.clone(),
                nonce: 0,
                balance: Aer::ZERO,
            })
    }

    fn best_height(&self) -> u64 {
        self.blocks.last().map(|b| b.height).unwrap_or(0)
    }

    /// Send to every stream `route` selects, dropping closed ones
    fn push(&mut self, route: impl Fn(&StreamFilter) -> Option<StreamItem>) {
        self.streams.retain(|(filter, sender)| match route(filter) {
            Some(item) => sender.unbounded_send(Ok(item)).is_ok(),
            None => !sender.is_closed(),
        });
    }

    fn credit(&mut self, address: &AccountAddress, amount: Aer) {
        let account = self.account(address);
        account.balance = Aer::new(account.balance.value() + amount.value());
    }

    fn staked(&self, address: &AccountAddress) -> Aer {
        self.stakes.get(address).map(|s| s.amount).unwrap_or(Aer::ZERO)
    }

    /// Owner at the best state, or at the end of block `height`
    fn name_owner(&self, name: &Name, height: Option<u64>) -> Option<AccountAddress> {
        let history = self.names.get(name)?;
        let entry = match height {
            None => history.last(),
            Some(height) => history.iter().rev().find(|(at, _)| *at <= height),
        };
        entry.map(|(_, owner)| owner.clone())
    }

    /// Reject transactions the node would refuse after the nonce check
    fn check(&mut self, raw: &RawTransaction) -> ClientResult<()> {
        let from = raw.from();
        let debit = match raw.body() {
            TxBody::Unstake { .. } => Aer::ZERO,
            _ => raw.amount(),
        };
        let balance = self.account(from).balance;
        if debit > balance {
            return Err(ClientError::Remote(format!(
                "insufficient balance: {} < {}",
                balance, debit
            )));
        }
        let refusal = match raw.body() {
            TxBody::Transfer {
                to: Recipient::Name(name),
                ..
            } if self.name_owner(name, None).is_none() => {
                Some(format!("name {} is not registered", name))
            }
            TxBody::CreateName { name } if self.name_owner(name, None).is_some() => {
                Some(format!("name {} is already registered", name))
            }
            TxBody::UpdateName { name, .. }
                if self.name_owner(name, None).as_ref() != Some(from) =>
            {
                Some(format!("{} does not own name {}", from, name))
            }
            TxBody::Unstake { amount } if *amount > self.staked(from) => {
                Some(format!("insufficient staked amount: {} < {}", self.staked(from), amount))
            }
            TxBody::Vote { .. } if self.staked(from) == Aer::ZERO => {
                Some("voting requires a stake".to_string())
            }
            _ => None,
        };
        match refusal {
            Some(reason) => Err(ClientError::Remote(reason)),
            None => Ok(()),
        }
    }

    /// Apply an accepted transaction and record its receipt
    fn apply(&mut self, raw: &RawTransaction, hash: TxHash) -> TxReceipt {
        let from = raw.from().clone();
        let height = self.best_height() + 1;
        let mut receipt = TxReceipt {
            tx_hash: hash,
            status: TxStatus::Success,
            result: String::new(),
            contract_address: None,
        };

        let account = self.account(&from);
        account.nonce = raw.nonce();
        if !matches!(raw.body(), TxBody::Unstake { .. }) {
            account.balance = Aer::new(account.balance.value() - raw.amount().value());
        }

        match raw.body() {
            TxBody::Transfer { to, amount, .. } => {
                let receiver = match to {
                    Recipient::Address(address) => Some(address.clone()),
                    Recipient::Name(name) => self.name_owner(name, None),
                    Recipient::System(_) => None,
                };
                if let Some(receiver) = receiver {
                    self.credit(&receiver, *amount);
                }
            }
            TxBody::Deploy { definition } => {
                let mut preimage = from.as_bytes().to_vec();
                preimage.extend_from_slice(&raw.nonce().to_be_bytes());
                let contract = AccountAddress::from_public_key(sha256(&preimage).0);
                self.contracts.entry(contract.clone()).or_default();
                self.credit(&contract, definition.amount);
                receipt.contract_address = Some(contract);
            }
            TxBody::Redeploy { contract, definition } => {
                self.contracts.entry(contract.clone()).or_default();
                self.credit(contract, definition.amount);
            }
            TxBody::Invoke { invocation } => {
                self.credit(&invocation.contract, invocation.amount);
                let store = self.contracts.entry(invocation.contract.clone()).or_default();
                if let (Some(key), Some(value)) = (set_call(invocation), stored_value(invocation)) {
                    store.insert(key, value);
                }
            }
            TxBody::CreateName { name } => {
                self.names.entry(name.clone()).or_default().push((height, from));
            }
            TxBody::UpdateName { name, next_owner } => {
                self.names
                    .entry(name.clone())
                    .or_default()
                    .push((height, next_owner.clone()));
            }
            TxBody::Stake { amount } => {
                let stake = self.stakes.entry(from.clone()).or_insert_with(|| StakeInfo {
                    address: from.clone(),
                    amount: Aer::ZERO,
                    when: height,
                });
                stake.amount = Aer::new(stake.amount.value() + amount.value());
                stake.when = height;
            }
            TxBody::Unstake { amount } => {
                if let Some(stake) = self.stakes.get_mut(&from) {
                    stake.amount = Aer::new(stake.amount.value() - amount.value());
                    stake.when = height;
                }
                self.credit(&from, *amount);
            }
            TxBody::Vote { vote_id, candidates } => {
                self.ballots
                    .entry(from)
                    .or_default()
                    .insert(vote_id.clone(), candidates.clone());
            }
        }
        self.receipts.insert(hash, receipt.clone());
        receipt
    }
}

/// Key written by a `set(key, value...)` call
fn set_call(invocation: &ContractInvocation) -> Option<String> {
    match (invocation.function.as_str(), invocation.args.first()) {
        ("set", Some(ContractArg::String(key))) => Some(key.clone()),
        _ => None,
    }
}

/// A single value is stored as-is, several as a list
fn stored_value(invocation: &ContractInvocation) -> Option<ContractArg> {
    match invocation.args.get(1..) {
        None | Some([]) => None,
        Some([value]) => Some(value.clone()),
        Some(values) => Some(ContractArg::List(values.to_vec())),
    }
}

/// Simulated ledger node
pub struct SimulatedLedger {
    chain_id_hash: ChainIdHash,
    state: Mutex<LedgerState>,
    submit_calls: AtomicUsize,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLedger {
    pub fn new() -> Self {
        Self::with_chain_id_hash(ChainIdHash(sha256(b"simulated-ledger")))
    }

    pub fn with_chain_id_hash(chain_id_hash: ChainIdHash) -> Self {
        Self {
            chain_id_hash,
            state: Mutex::new(LedgerState::default()),
            submit_calls: AtomicUsize::new(0),
        }
    }

    pub fn chain_id(&self) -> ChainIdHash {
        self.chain_id_hash
    }

    /// Credit `amount` to `address`
    pub fn fund(&self, address: &AccountAddress, amount: Aer) {
        let mut state = self.state.lock();
        let account = state.account(address);
        account.balance = Aer::new(account.balance.value() + amount.value());
    }

    /// Overwrite the on-chain nonce of `address`
    pub fn set_nonce(&self, address: &AccountAddress, nonce: u64) {
        self.state.lock().account(address).nonce = nonce;
    }

    pub fn account(&self, address: &AccountAddress) -> AccountState {
        self.state.lock().account(address).clone()
    }

    /// Let a competing writer take the next nonce of `address` before each
    /// of its next `count` submissions, so each of them conflicts
    pub fn inject_competing_writes(&self, address: &AccountAddress, count: u32) {
        *self
            .state
            .lock()
            .competing_writes
            .entry(address.clone())
            .or_default() += count;
    }

    /// Fail the next submission with `error`, whatever it is
    pub fn inject_failure(&self, error: ClientError) {
        self.state.lock().failures.push_back(error);
    }

    /// Number of `submit` calls, accepted or not
    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> Vec<SignedTransaction> {
        self.state.lock().accepted.clone()
    }

    pub fn open_streams(&self) -> usize {
        let mut state = self.state.lock();
        state.streams.retain(|(_, sender)| !sender.is_closed());
        state.streams.len()
    }

    /// Seal pending transactions into a block and push it to block streams
    pub fn seal_block(&self) -> Block {
        let mut state = self.state.lock();
        let previous_hash = state
            .blocks
            .last()
            .map(|b| b.hash)
            .unwrap_or(BlockHash::from([0u8; 32]));
        let height = state.best_height() + 1;
        let tx_hashes = std::mem::take(&mut state.pending);

        let mut preimage = previous_hash.as_bytes().to_vec();
        preimage.extend_from_slice(&height.to_be_bytes());
        for hash in &tx_hashes {
            preimage.extend_from_slice(hash.as_bytes());
        }
        let block = Block {
            hash: BlockHash(sha256(&preimage)),
            previous_hash,
            height,
            timestamp: Utc::now(),
            tx_hashes,
        };
        state.blocks.push(block.clone());

        let metadata = BlockMetadata::from(&block);
        state.push(|filter| match filter {
            StreamFilter::Blocks => Some(StreamItem::Block(block.clone())),
            StreamFilter::BlockMetadata => Some(StreamItem::BlockMetadata(metadata.clone())),
            StreamFilter::Events(_) => None,
        });
        debug!(height, "Simulated block sealed");
        block
    }

    /// Record an event from `contract` in the next block and push it
    pub fn emit_event(
        &self,
        contract: &ContractAddress,
        name: &str,
        args: Vec<ContractArg>,
    ) -> Event {
        let mut state = self.state.lock();
        let block_number = state.best_height() + 1;
        let event = Event {
            contract: contract.clone(),
            name: name.to_string(),
            args,
            index: state.events.iter().filter(|e| e.block_number == block_number).count() as u32,
            tx_hash: TxHash(sha256(name.as_bytes())),
            block_hash: BlockHash::from([0u8; 32]),
            block_number,
        };
        state.events.push(event.clone());

        let best_height = block_number;
        state.push(|filter| match filter {
            StreamFilter::Events(events) if events.matches(&event, best_height) => {
                Some(StreamItem::Event(event.clone()))
            }
            _ => None,
        });
        event
    }

    /// End every open stream cleanly
    pub fn close_streams(&self) {
        self.state.lock().streams.clear();
    }

    /// Terminate every open stream with `error`
    pub fn fail_streams(&self, error: ClientError) {
        let streams = std::mem::take(&mut self.state.lock().streams);
        for (_, sender) in streams {
            let _ = sender.unbounded_send(Err(error.clone()));
        }
    }
}

#[async_trait]
impl LedgerEndpoint for SimulatedLedger {
    async fn get_chain_id_hash(&self) -> ClientResult<ChainIdHash> {
        Ok(self.chain_id_hash)
    }

    async fn get_account_state(&self, address: &AccountAddress) -> ClientResult<AccountState> {
        Ok(self.account(address))
    }

    async fn submit(&self, transaction: &SignedTransaction) -> ClientResult<TxHash> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let raw = transaction.raw();

        if raw.chain_id_hash() != &self.chain_id_hash {
            return Err(ClientError::Remote("chain id mismatch".to_string()));
        }
        if !verify_transaction(transaction)? {
            return Err(ClientError::Remote("invalid signature".to_string()));
        }

        let mut state = self.state.lock();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        let from = raw.from().clone();
        let competing = match state.competing_writes.get_mut(&from) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        if competing {
            state.account(&from).nonce += 1;
        }

        let expected = state.account(&from).nonce + 1;
        if raw.nonce() != expected {
            return Err(ClientError::NonceConflict {
                address: from,
                submitted: raw.nonce(),
                expected: Some(expected),
            });
        }

        state.check(raw)?;
        let hash = *transaction.hash();
        state.apply(raw, hash);
        state.pending.push(hash);
        state.accepted.push(transaction.clone());
        debug!(
            from = %raw.from(),
            nonce = raw.nonce(),
            hash = %hash,
            "Simulated ledger accepted transaction"
        );
        Ok(hash)
    }

    async fn open_stream(&self, filter: &StreamFilter) -> ClientResult<ItemStream> {
        let (sender, receiver) = mpsc::unbounded();
        let mut state = self.state.lock();

        // Event filters with a block window replay matching history first
        if let StreamFilter::Events(events) = filter {
            if events.range != BlockRange::Unbounded {
                let best_height = state.best_height();
                for event in state.events.iter().filter(|e| events.matches(e, best_height)) {
                    let _ = sender.unbounded_send(Ok(StreamItem::Event(event.clone())));
                }
            }
        }

        state.streams.push((filter.clone(), sender));
        Ok(receiver.boxed())
    }

    async fn get_blockchain_status(&self) -> ClientResult<BlockchainStatus> {
        let state = self.state.lock();
        Ok(BlockchainStatus {
            best_block_hash: state
                .blocks
                .last()
                .map(|b| b.hash)
                .unwrap_or(BlockHash::from([0u8; 32])),
            best_height: state.best_height(),
            chain_id_hash: self.chain_id_hash,
        })
    }

    async fn get_block(&self, block: BlockRef) -> ClientResult<Option<Block>> {
        let state = self.state.lock();
        let found = state.blocks.iter().find(|b| match block {
            BlockRef::Hash(hash) => b.hash == hash,
            BlockRef::Height(height) => b.height == height,
        });
        Ok(found.cloned())
    }

    async fn get_transaction(&self, hash: &TxHash) -> ClientResult<Option<SignedTransaction>> {
        let state = self.state.lock();
        Ok(state.accepted.iter().find(|t| t.hash() == hash).cloned())
    }

    async fn get_receipt(&self, hash: &TxHash) -> ClientResult<Option<TxReceipt>> {
        Ok(self.state.lock().receipts.get(hash).cloned())
    }

    async fn get_name_owner(
        &self,
        name: &Name,
        height: Option<u64>,
    ) -> ClientResult<Option<AccountAddress>> {
        Ok(self.state.lock().name_owner(name, height))
    }

    async fn get_stake_info(&self, address: &AccountAddress) -> ClientResult<StakeInfo> {
        let state = self.state.lock();
        Ok(state.stakes.get(address).cloned().unwrap_or_else(|| StakeInfo {
            address: address.clone(),
            amount: Aer::ZERO,
            when: 0,
        }))
    }

    async fn get_votes_of(&self, address: &AccountAddress) -> ClientResult<AccountTotalVote> {
        let state = self.state.lock();
        let amount = state.staked(address);
        let votes = state
            .ballots
            .get(address)
            .map(|ballots| {
                ballots
                    .iter()
                    .map(|(vote_id, candidates)| VoteInfo {
                        vote_id: vote_id.clone(),
                        candidates: candidates.clone(),
                        amount,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(AccountTotalVote {
            address: address.clone(),
            votes,
        })
    }

    async fn list_elected(
        &self,
        vote_id: &str,
        max_count: usize,
    ) -> ClientResult<Vec<ElectedCandidate>> {
        let state = self.state.lock();
        let mut tally: BTreeMap<&str, u128> = BTreeMap::new();
        for (voter, ballots) in &state.ballots {
            if let Some(candidates) = ballots.get(vote_id) {
                let power = state.staked(voter).value();
                for candidate in candidates {
                    *tally.entry(candidate.as_str()).or_default() += power;
                }
            }
        }
        let mut elected: Vec<ElectedCandidate> = tally
            .into_iter()
            .map(|(candidate, amount)| ElectedCandidate {
                vote_id: vote_id.to_string(),
                candidate: candidate.to_string(),
                amount: Aer::new(amount),
            })
            .collect();
        // Stable sort keeps candidate order among equal tallies
        elected.sort_by(|a, b| b.amount.cmp(&a.amount));
        elected.truncate(max_count);
        Ok(elected)
    }

    async fn query_contract(
        &self,
        invocation: &ContractInvocation,
    ) -> ClientResult<ContractResult> {
        let state = self.state.lock();
        let store = state
            .contracts
            .get(&invocation.contract)
            .ok_or_else(|| {
                ClientError::Remote(format!("contract {} not found", invocation.contract))
            })?;
        let value = match (invocation.function.as_str(), invocation.args.as_slice()) {
            ("get", [ContractArg::String(key)]) => {
                store.get(key).cloned().unwrap_or(ContractArg::Null)
            }
            (function, _) => {
                return Err(ClientError::Remote(format!(
                    "contract {} has no query {}",
                    invocation.contract, function
                )))
            }
        };
        serde_json::to_vec(&value)
            .map(ContractResult::new)
            .map_err(|e| ClientError::Internal(e.to_string()))
    }

    async fn list_events(&self, filter: &EventFilter) -> ClientResult<Vec<Event>> {
        let state = self.state.lock();
        let best_height = state.best_height();
        Ok(state
            .events
            .iter()
            .filter(|e| filter.matches(e, best_height))
            .cloned()
            .collect())
    }
}
