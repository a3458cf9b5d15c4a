//! Remote ledger endpoint interface
//!
//! The core only consumes this trait. Transport, wire formats and the
//! node's validation rules live behind it.
//!
//! Read-only queries have default bodies that report the query as not
//! served, so an endpoint only implements the lookups its node exposes.

use crate::crypto::SignedTransaction;
use crate::errors::{ClientError, ClientResult};
use crate::tx::{ContractArg, ContractInvocation};
use crate::types::{
    AccountAddress, AccountState, AccountTotalVote, Block, BlockMetadata, BlockRef,
    BlockchainStatus, ChainIdHash, ContractAddress, ContractResult, ElectedCandidate, Event, Name,
    StakeInfo, TxHash, TxReceipt,
};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Push stream returned by [`LedgerEndpoint::open_stream`]
///
/// `None` is a clean server-side close; an `Err` item is a terminal fault.
pub type ItemStream = BoxStream<'static, ClientResult<StreamItem>>;

/// What a push stream carries
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFilter {
    Blocks,
    BlockMetadata,
    Events(EventFilter),
}

impl StreamFilter {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamFilter::Blocks => "blocks",
            StreamFilter::BlockMetadata => "block_metadata",
            StreamFilter::Events(_) => "events",
        }
    }
}

/// One pushed item
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Block(Block),
    BlockMetadata(BlockMetadata),
    Event(Event),
}

/// Block window an event filter applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRange {
    /// Every block from now on
    Unbounded,
    /// The most recent `n` blocks, then new ones
    Recent(u64),
    /// Explicit inclusive range
    Between { from: u64, to: u64 },
}

/// Narrows a contract event stream
#[derive(Debug, Clone, PartialEq)]
pub struct EventFilter {
    pub contract: ContractAddress,
    pub event_name: Option<String>,
    /// Positional prefix the event's arguments must start with
    pub args: Vec<ContractArg>,
    pub range: BlockRange,
}

impl EventFilter {
    pub fn builder(contract: ContractAddress) -> EventFilterBuilder {
        EventFilterBuilder {
            contract,
            event_name: None,
            args: Vec::new(),
            recent: None,
            from: None,
            to: None,
        }
    }

    /// Whether `event` passes the filter at chain height `best_height`
    pub fn matches(&self, event: &Event, best_height: u64) -> bool {
        if event.contract != self.contract {
            return false;
        }
        if let Some(name) = &self.event_name {
            if &event.name != name {
                return false;
            }
        }
        if !event.args.starts_with(&self.args) {
            return false;
        }
        match self.range {
            BlockRange::Unbounded => true,
            BlockRange::Recent(count) => best_height.saturating_sub(event.block_number) < count,
            BlockRange::Between { from, to } => (from..=to).contains(&event.block_number),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventFilterBuilder {
    contract: ContractAddress,
    event_name: Option<String>,
    args: Vec<ContractArg>,
    recent: Option<u64>,
    from: Option<u64>,
    to: Option<u64>,
}

impl EventFilterBuilder {
    pub fn event_name(mut self, name: impl Into<String>) -> Self {
        self.event_name = Some(name.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<ContractArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn recent_block_count(mut self, count: u64) -> Self {
        self.recent = Some(count);
        self
    }

    pub fn from_block(mut self, height: u64) -> Self {
        self.from = Some(height);
        self
    }

    pub fn to_block(mut self, height: u64) -> Self {
        self.to = Some(height);
        self
    }

    pub fn build(self) -> ClientResult<EventFilter> {
        if matches!(&self.event_name, Some(name) if name.is_empty()) {
            return Err(ClientError::invalid_field("event_name", "must not be empty"));
        }
        let range = match (self.recent, self.from, self.to) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(ClientError::invalid_field(
                    "range",
                    "recent block count and explicit range are exclusive",
                ))
            }
            (Some(0), None, None) => {
                return Err(ClientError::invalid_field("recent_block_count", "must be positive"))
            }
            (Some(count), None, None) => BlockRange::Recent(count),
            (None, None, None) => BlockRange::Unbounded,
            (None, from, to) => {
                let from = from.unwrap_or(0);
                let to = to.unwrap_or(u64::MAX);
                if from > to {
                    return Err(ClientError::invalid_field(
                        "from_block",
                        format!("from {} is after to {}", from, to),
                    ));
                }
                BlockRange::Between { from, to }
            }
        };
        Ok(EventFilter {
            contract: self.contract,
            event_name: self.event_name,
            args: self.args,
            range,
        })
    }
}

/// Remote ledger node as seen by the client core
#[async_trait]
pub trait LedgerEndpoint: Send + Sync {
    /// Hash identifying the network the endpoint serves
    async fn get_chain_id_hash(&self) -> ClientResult<ChainIdHash>;

    /// Authoritative state of an account
    async fn get_account_state(&self, address: &AccountAddress) -> ClientResult<AccountState>;

    /// Submit a signed transaction
    ///
    /// Must report a sequence mismatch as [`ClientError::NonceConflict`] so the
    /// invoker can tell it apart from every other refusal.
    async fn submit(&self, transaction: &SignedTransaction) -> ClientResult<TxHash>;

    /// Open a push stream for `filter`
    async fn open_stream(&self, filter: &StreamFilter) -> ClientResult<ItemStream>;

    async fn get_blockchain_status(&self) -> ClientResult<BlockchainStatus> {
        Err(not_served("blockchain status"))
    }

    /// `Ok(None)` when no such block exists
    async fn get_block(&self, _block: BlockRef) -> ClientResult<Option<Block>> {
        Err(not_served("block lookup"))
    }

    async fn get_transaction(&self, _hash: &TxHash) -> ClientResult<Option<SignedTransaction>> {
        Err(not_served("transaction lookup"))
    }

    async fn get_receipt(&self, _hash: &TxHash) -> ClientResult<Option<TxReceipt>> {
        Err(not_served("receipt lookup"))
    }

    /// Owner of `name`, at the best block or at `height`
    async fn get_name_owner(
        &self,
        _name: &Name,
        _height: Option<u64>,
    ) -> ClientResult<Option<AccountAddress>> {
        Err(not_served("name owner"))
    }

    async fn get_stake_info(&self, _address: &AccountAddress) -> ClientResult<StakeInfo> {
        Err(not_served("stake info"))
    }

    async fn get_votes_of(&self, _address: &AccountAddress) -> ClientResult<AccountTotalVote> {
        Err(not_served("vote info"))
    }

    /// Top `max_count` candidates of `vote_id` by voting power
    async fn list_elected(
        &self,
        _vote_id: &str,
        _max_count: usize,
    ) -> ClientResult<Vec<ElectedCandidate>> {
        Err(not_served("vote result"))
    }

    /// Run `invocation` read-only; nothing is submitted
    async fn query_contract(
        &self,
        _invocation: &ContractInvocation,
    ) -> ClientResult<ContractResult> {
        Err(not_served("contract query"))
    }

    /// Past events matching `filter`
    async fn list_events(&self, _filter: &EventFilter) -> ClientResult<Vec<Event>> {
        Err(not_served("event listing"))
    }
}

fn not_served(query: &str) -> ClientError {
    ClientError::Remote(format!("{} is not served by this endpoint", query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockHash, Hash256};

    fn contract() -> ContractAddress {
        AccountAddress::from_public_key([6u8; 32])
    }

    fn event(name: &str, block_number: u64, args: Vec<ContractArg>) -> Event {
        Event {
            contract: contract(),
            name: name.to_string(),
            args,
            index: 0,
            tx_hash: TxHash(Hash256::ZERO),
            block_hash: BlockHash(Hash256::ZERO),
            block_number,
        }
    }

    #[test]
    fn test_range_validation() {
        let err = EventFilter::builder(contract())
            .from_block(10)
            .to_block(5)
            .build()
            .unwrap_err();
        assert_eq!(err.field(), Some("from_block"));

        let err = EventFilter::builder(contract())
            .recent_block_count(3)
            .from_block(1)
            .build()
            .unwrap_err();
        assert_eq!(err.field(), Some("range"));

        let filter = EventFilter::builder(contract()).from_block(5).build().unwrap();
        assert_eq!(filter.range, BlockRange::Between { from: 5, to: u64::MAX });
    }

    #[test]
    fn test_matching() {
        let filter = EventFilter::builder(contract())
            .event_name("set")
            .arg("key")
            .from_block(10)
            .to_block(20)
            .build()
            .unwrap();

        assert!(filter.matches(&event("set", 15, vec!["key".into(), 1.into()]), 100));
        assert!(!filter.matches(&event("get", 15, vec!["key".into()]), 100));
        assert!(!filter.matches(&event("set", 21, vec!["key".into()]), 100));
        assert!(!filter.matches(&event("set", 15, vec!["other".into()]), 100));

        let recent = EventFilter::builder(contract()).recent_block_count(5).build().unwrap();
        assert!(recent.matches(&event("any", 96, vec![]), 100));
        assert!(!recent.matches(&event("any", 95, vec![]), 100));
    }

    #[test]
    fn test_huge_recent_window_matches_everything() {
        let all = EventFilter::builder(contract())
            .recent_block_count(u64::MAX)
            .build()
            .unwrap();
        assert!(all.matches(&event("any", 0, vec![]), u64::MAX - 1));
        assert!(all.matches(&event("any", u64::MAX, vec![]), 10));

        let one = EventFilter::builder(contract()).recent_block_count(1).build().unwrap();
        assert!(one.matches(&event("any", u64::MAX, vec![]), u64::MAX));
        assert!(!one.matches(&event("any", 0, vec![]), u64::MAX));
    }
}
