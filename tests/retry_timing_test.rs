//! Retry timing against a stub endpoint that conflicts a fixed number of times
//!
//! Uses only the public API, with its own endpoint implementation.

use async_trait::async_trait;
use ledger_orchestrator::crypto::{SignedTransaction, SignerService};
use ledger_orchestrator::endpoint::{ItemStream, LedgerEndpoint, StreamFilter};
use ledger_orchestrator::types::{AccountState, Aer};
use ledger_orchestrator::{
    AccountAddress, ChainIdHash, ClientError, ClientResult, KeyPair, NonceProvider,
    NonceRetryInvoker, RawTransaction, RetryPolicy, TxHash,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Rejects the first `conflicts` submissions with a nonce conflict
struct ConflictingEndpoint {
    conflicts: u32,
    submits: AtomicU32,
    state_queries: AtomicU32,
}

impl ConflictingEndpoint {
    fn new(conflicts: u32) -> Arc<Self> {
        Arc::new(Self {
            conflicts,
            submits: AtomicU32::new(0),
            state_queries: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl LedgerEndpoint for ConflictingEndpoint {
    async fn get_chain_id_hash(&self) -> ClientResult<ChainIdHash> {
        Ok(ChainIdHash::from([1u8; 32]))
    }

    async fn get_account_state(&self, address: &AccountAddress) -> ClientResult<AccountState> {
        let queries = self.state_queries.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AccountState {
            address: address.clone(),
            nonce: u64::from(queries) * 10,
            balance: Aer::ZERO,
        })
    }

    async fn submit(&self, transaction: &SignedTransaction) -> ClientResult<TxHash> {
        let call = self.submits.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.conflicts {
            return Err(ClientError::NonceConflict {
                address: transaction.raw().from().clone(),
                submitted: transaction.raw().nonce(),
                expected: None,
            });
        }
        Ok(*transaction.hash())
    }

    async fn open_stream(&self, _filter: &StreamFilter) -> ClientResult<ItemStream> {
        Err(ClientError::Subscription("streams not supported".to_string()))
    }
}

async fn run(
    endpoint: Arc<ConflictingEndpoint>,
    policy: RetryPolicy,
) -> (ClientResult<TxHash>, Vec<u64>) {
    let key = KeyPair::generate();
    let nonces = Arc::new(NonceProvider::new());
    nonces.bind(key.address(), 0);
    let invoker = NonceRetryInvoker::new(endpoint, nonces, policy);

    let used = parking_lot::Mutex::new(Vec::new());
    let from = SignerService::address(&key);
    let result = invoker
        .invoke("transfer", &key, |nonce| {
            used.lock().push(nonce);
            RawTransaction::transfer()
                .chain_id_hash(ChainIdHash::from([1u8; 32]))
                .from(from.clone())
                .to(AccountAddress::from_public_key([2u8; 32]))
                .amount(1)
                .nonce(nonce)
                .build()
        })
        .await;
    (result, used.into_inner())
}

#[tokio::test]
async fn test_conflicts_twice_then_succeeds_with_three_attempts() {
    let endpoint = ConflictingEndpoint::new(2);
    let start = Instant::now();
    let policy = RetryPolicy::new(3, Duration::from_millis(10));
    let (result, nonces) = run(endpoint.clone(), policy).await;

    assert!(result.is_ok());
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert_eq!(endpoint.submits.load(Ordering::SeqCst), 3);
    // Each retry starts from the freshly queried chain nonce
    assert_eq!(nonces, vec![1, 11, 21]);
}

#[tokio::test]
async fn test_conflicts_twice_exhausts_two_attempts() {
    let endpoint = ConflictingEndpoint::new(2);
    let (result, _) = run(endpoint.clone(), RetryPolicy::new(2, Duration::from_millis(10))).await;

    match result {
        Err(ClientError::RetryExhausted { attempts, last }) => {
            assert_eq!(attempts, 2);
            assert!(matches!(*last, ClientError::NonceConflict { .. }));
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }
    assert_eq!(endpoint.submits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_single_attempt_policy_never_waits() {
    let endpoint = ConflictingEndpoint::new(1);
    let start = Instant::now();
    let (result, _) = run(endpoint.clone(), RetryPolicy::new(1, Duration::from_secs(5))).await;

    assert!(matches!(result, Err(ClientError::RetryExhausted { attempts: 1, .. })));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(endpoint.state_queries.load(Ordering::SeqCst), 0);
}
