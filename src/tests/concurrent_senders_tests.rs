//! Concurrency Tests for nonce allocation and submission
//!
//! - Many tasks allocating for one identity get a gapless, repeat-free range
//! - Independent accounts submit in parallel without interfering
//! - Eviction under capacity pressure forces a rebind, never a reused nonce

#[cfg(test)]
mod concurrent_senders_tests {
    use super::super::test_helpers::test_helpers::*;
    use crate::errors::ClientError;
    use crate::nonce::NonceProvider;
    use crate::test_utils::SimulatedLedger;
    use crate::types::Fee;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_parallel_allocation_is_gapless() {
        let provider = Arc::new(NonceProvider::new());
        let identity = address(1);
        provider.bind(&identity, 500);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let provider = provider.clone();
            let identity = identity.clone();
            handles.push(tokio::spawn(async move {
                let mut taken = Vec::new();
                for _ in 0..50 {
                    taken.push(provider.allocate(&identity).unwrap());
                    tokio::task::yield_now().await;
                }
                taken
            }));
        }

        let mut all = HashSet::new();
        for handle in handles {
            for nonce in handle.await.unwrap() {
                assert!(all.insert(nonce), "nonce {} handed out twice", nonce);
            }
        }
        let expected: HashSet<u64> = (501..=500 + 32 * 50).collect();
        assert_eq!(all, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_independent_accounts_submit_in_parallel() {
        let ledger = Arc::new(SimulatedLedger::new());
        let client = new_client(&ledger, fast_policy(3));

        let mut handles = Vec::new();
        for i in 0..8u8 {
            let ledger = ledger.clone();
            let client = client.clone();
            handles.push(tokio::spawn(async move {
                let session = funded_session(&ledger, &format!("account-{}", i)).await;
                for _ in 0..5 {
                    session
                        .with(&client)
                        .transaction()
                        .send(address(200), 1, Fee::ZERO)
                        .await
                        .unwrap();
                }
                session.principal().clone()
            }));
        }

        for handle in handles {
            let principal = handle.await.unwrap();
            assert_eq!(ledger.account(&principal).nonce, 5);
        }
        assert_eq!(ledger.accepted().len(), 40);
        assert_eq!(ledger.submit_calls(), 40);
    }

    #[tokio::test]
    async fn test_evicted_identity_must_rebind() {
        let provider = NonceProvider::with_capacity(2);
        provider.bind(&address(1), 10);
        provider.bind(&address(2), 20);
        provider.allocate(&address(1)).unwrap();
        provider.bind(&address(3), 30);

        // Least recently used is address(2)
        assert!(matches!(
            provider.allocate(&address(2)),
            Err(ClientError::UnboundIdentity(_))
        ));
        assert_eq!(provider.allocate(&address(1)).unwrap(), 12);
        assert_eq!(provider.len(), 2);
    }
}
