//! Low-level client over one ledger endpoint
//!
//! Operations take the signer explicitly. Nonces come from the shared
//! [`NonceProvider`]; on this path the caller binds them, either directly or
//! with [`LedgerClient::refresh_nonce`]. The wallet layer binds on first use.

use crate::config::Config;
use crate::crypto::{SignedTransaction, SignerService};
use crate::endpoint::{EventFilter, LedgerEndpoint};
use crate::errors::{ClientError, ClientResult};
use crate::invoker::{NonceRetryInvoker, RetryPolicy};
use crate::nonce::NonceProvider;
use crate::subscription::{StreamObserver, Subscription, SubscriptionHub};
use crate::tx::{ContractDefinition, ContractInvocation, RawTransaction, TxBuilder};
use crate::types::{
    AccountAddress, AccountState, AccountTotalVote, Block, BlockMetadata, BlockRef,
    BlockchainStatus, ChainIdHash, ContractAddress, ContractResult, ElectedCandidate, Event, Fee,
    IntoAmount, Name, Recipient, StakeInfo, TxHash, TxReceipt,
};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Entry point tying the endpoint, nonce cache, invoker and subscriptions together
#[derive(Clone)]
pub struct LedgerClient {
    endpoint: Arc<dyn LedgerEndpoint>,
    invoker: NonceRetryInvoker,
    subscriptions: SubscriptionHub,
    chain_id_hash: Arc<OnceCell<ChainIdHash>>,
}

impl LedgerClient {
    /// Build from configuration; must be called inside a tokio runtime
    pub fn new(endpoint: Arc<dyn LedgerEndpoint>, config: &Config) -> ClientResult<Self> {
        config.validate()?;
        let nonces = NonceProvider::with_capacity(config.nonce.capacity)
            .with_policy(config.nonce.unbound_policy);
        Self::with_parts(
            endpoint,
            Arc::new(nonces),
            config.retry.policy(),
            config.subscription.buffer,
        )
    }

    pub fn with_parts(
        endpoint: Arc<dyn LedgerEndpoint>,
        nonces: Arc<NonceProvider>,
        policy: RetryPolicy,
        subscription_buffer: usize,
    ) -> ClientResult<Self> {
        let subscriptions = SubscriptionHub::new(endpoint.clone(), subscription_buffer)?;
        info!(
            nonce_capacity = nonces.capacity(),
            max_attempts = policy.max_attempts(),
            interval_ms = policy.interval().as_millis() as u64,
            "Ledger client created"
        );
        Ok(Self {
            invoker: NonceRetryInvoker::new(endpoint.clone(), nonces, policy),
            endpoint,
            subscriptions,
            chain_id_hash: Arc::new(OnceCell::new()),
        })
    }

    pub fn endpoint(&self) -> &Arc<dyn LedgerEndpoint> {
        &self.endpoint
    }

    pub fn nonces(&self) -> &Arc<NonceProvider> {
        self.invoker.nonces()
    }

    pub fn invoker(&self) -> &NonceRetryInvoker {
        &self.invoker
    }

    /// Chain id of the endpoint, fetched once
    pub async fn chain_id_hash(&self) -> ClientResult<ChainIdHash> {
        self.chain_id_hash
            .get_or_try_init(|| self.endpoint.get_chain_id_hash())
            .await
            .copied()
    }

    pub async fn account_state(&self, address: &AccountAddress) -> ClientResult<AccountState> {
        self.endpoint.get_account_state(address).await
    }

    /// Rebind `address` to its on-chain nonce, returning it
    pub async fn refresh_nonce(&self, address: &AccountAddress) -> ClientResult<u64> {
        let state = self.account_state(address).await?;
        self.nonces().bind_state(&state);
        Ok(state.nonce)
    }

    pub fn transaction(&self) -> TransactionOperation<'_> {
        TransactionOperation { client: self }
    }

    pub fn contract(&self) -> ContractOperation<'_> {
        ContractOperation { client: self }
    }

    pub fn block(&self) -> BlockOperation<'_> {
        BlockOperation { client: self }
    }

    pub fn query(&self) -> QueryOperation<'_> {
        QueryOperation { client: self }
    }

    async fn check_chain(&self, raw: &RawTransaction) -> ClientResult<()> {
        let chain_id_hash = self.chain_id_hash().await?;
        if raw.chain_id_hash() != &chain_id_hash {
            return Err(ClientError::invalid_field(
                "chain_id_hash",
                format!(
                    "transaction targets {}, endpoint serves {}",
                    raw.chain_id_hash(),
                    chain_id_hash
                ),
            ));
        }
        Ok(())
    }

    /// Fill in chain id, sender and nonce on `prepare()` and run it through the invoker
    pub(crate) async fn invoke_with<F>(
        &self,
        operation: &'static str,
        signer: &dyn SignerService,
        prepare: F,
    ) -> ClientResult<TxHash>
    where
        F: Fn() -> TxBuilder + Send + Sync,
    {
        let chain_id_hash = self.chain_id_hash().await?;
        let from = signer.address();
        self.invoker
            .invoke(operation, signer, |nonce| {
                prepare()
                    .chain_id_hash(chain_id_hash)
                    .from(from.clone())
                    .nonce(nonce)
                    .build()
            })
            .await
    }
}

/// Single-shot commits and plain transfers
pub struct TransactionOperation<'a> {
    client: &'a LedgerClient,
}

impl<'a> TransactionOperation<'a> {
    /// Submit an already-signed transaction once
    ///
    /// Its nonce is fixed by the signature, so a conflict is returned, not retried.
    pub async fn commit(&self, signed: &SignedTransaction) -> ClientResult<TxHash> {
        self.client.check_chain(signed.raw()).await?;
        let hash = self.client.invoker.submit_once(signed).await?;
        debug!(hash = %hash, "Committed signed transaction");
        Ok(hash)
    }

    /// Sign `raw` with `signer` and submit it once
    pub async fn commit_raw(
        &self,
        signer: &dyn SignerService,
        raw: RawTransaction,
    ) -> ClientResult<TxHash> {
        self.client.check_chain(&raw).await?;
        let signed = signer.sign_transaction(raw).await?;
        self.commit(&signed).await
    }

    /// Transfer with nonce allocation and conflict retries
    pub async fn send(
        &self,
        signer: &dyn SignerService,
        to: impl Into<Recipient>,
        amount: impl IntoAmount,
        fee: Fee,
    ) -> ClientResult<TxHash> {
        let to = to.into();
        let amount = amount.into_amount()?;
        self.client
            .invoke_with("send", signer, || {
                RawTransaction::transfer().to(to.clone()).amount(amount).fee(fee)
            })
            .await
    }
}

/// Contract deployment and execution through the retrying invoker
pub struct ContractOperation<'a> {
    client: &'a LedgerClient,
}

impl<'a> ContractOperation<'a> {
    pub async fn deploy(
        &self,
        signer: &dyn SignerService,
        definition: ContractDefinition,
        fee: Fee,
    ) -> ClientResult<TxHash> {
        self.client
            .invoke_with("deploy", signer, || {
                RawTransaction::deploy().definition(definition.clone()).fee(fee)
            })
            .await
    }

    pub async fn redeploy(
        &self,
        signer: &dyn SignerService,
        contract: &ContractAddress,
        definition: ContractDefinition,
        fee: Fee,
    ) -> ClientResult<TxHash> {
        self.client
            .invoke_with("redeploy", signer, || {
                RawTransaction::redeploy()
                    .contract(contract.clone())
                    .definition(definition.clone())
                    .fee(fee)
            })
            .await
    }

    pub async fn execute(
        &self,
        signer: &dyn SignerService,
        invocation: ContractInvocation,
        fee: Fee,
    ) -> ClientResult<TxHash> {
        self.client
            .invoke_with("execute", signer, || {
                RawTransaction::invoke().invocation(invocation.clone()).fee(fee)
            })
            .await
    }
}

/// Read-only lookups against the endpoint
///
/// Nothing here touches the nonce cache or signs anything.
pub struct QueryOperation<'a> {
    client: &'a LedgerClient,
}

impl<'a> QueryOperation<'a> {
    pub async fn blockchain_status(&self) -> ClientResult<BlockchainStatus> {
        self.client.endpoint.get_blockchain_status().await
    }

    pub async fn block(&self, block: impl Into<BlockRef>) -> ClientResult<Option<Block>> {
        self.client.endpoint.get_block(block.into()).await
    }

    pub async fn transaction(&self, hash: &TxHash) -> ClientResult<Option<SignedTransaction>> {
        self.client.endpoint.get_transaction(hash).await
    }

    pub async fn receipt(&self, hash: &TxHash) -> ClientResult<Option<TxReceipt>> {
        self.client.endpoint.get_receipt(hash).await
    }

    /// Current owner of `name`, or the owner as of block `height`
    pub async fn name_owner(
        &self,
        name: &Name,
        height: Option<u64>,
    ) -> ClientResult<Option<AccountAddress>> {
        self.client.endpoint.get_name_owner(name, height).await
    }

    pub async fn stake_info(&self, address: &AccountAddress) -> ClientResult<StakeInfo> {
        self.client.endpoint.get_stake_info(address).await
    }

    pub async fn votes_of(&self, address: &AccountAddress) -> ClientResult<AccountTotalVote> {
        self.client.endpoint.get_votes_of(address).await
    }

    pub async fn list_elected(
        &self,
        vote_id: &str,
        max_count: usize,
    ) -> ClientResult<Vec<ElectedCandidate>> {
        if max_count == 0 {
            return Err(ClientError::invalid_field("max_count", "must be at least 1"));
        }
        self.client.endpoint.list_elected(vote_id, max_count).await
    }

    /// Run a read-only contract function
    pub async fn contract(&self, invocation: &ContractInvocation) -> ClientResult<ContractResult> {
        let result = self.client.endpoint.query_contract(invocation).await?;
        debug!(
            contract = %invocation.contract,
            function = %invocation.function,
            bytes = result.as_bytes().len(),
            "Contract queried"
        );
        Ok(result)
    }

    /// Events already on chain matching `filter`
    pub async fn events(&self, filter: &EventFilter) -> ClientResult<Vec<Event>> {
        self.client.endpoint.list_events(filter).await
    }
}

/// Push subscriptions
pub struct BlockOperation<'a> {
    client: &'a LedgerClient,
}

impl<'a> BlockOperation<'a> {
    pub fn subscribe_new_blocks(&self, observer: impl StreamObserver<Block>) -> Subscription {
        self.client.subscriptions.subscribe_blocks(observer)
    }

    pub fn subscribe_new_block_metadata(
        &self,
        observer: impl StreamObserver<BlockMetadata>,
    ) -> Subscription {
        self.client.subscriptions.subscribe_block_metadata(observer)
    }

    pub fn subscribe_events(
        &self,
        filter: EventFilter,
        observer: impl StreamObserver<Event>,
    ) -> Subscription {
        self.client.subscriptions.subscribe_events(filter, observer)
    }
}
