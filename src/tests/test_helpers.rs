//! Shared fixtures for the scenario tests
//!
//! Builds a client over a [`SimulatedLedger`] and unlocks a funded account
//! through an in-memory key store.

#[cfg(test)]
pub mod test_helpers {
    use crate::client::LedgerClient;
    use crate::crypto::KdfParams;
    use crate::invoker::RetryPolicy;
    use crate::keystore::{Authentication, InMemoryKeyStore, KeyAlias};
    use crate::nonce::NonceProvider;
    use crate::test_utils::SimulatedLedger;
    use crate::types::{AccountAddress, Aer};
    use crate::wallet::{UnlockedSession, WalletApi};
    use std::sync::Arc;
    use std::time::Duration;

    pub const STARTING_BALANCE: u128 = 1_000_000;

    pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    pub fn new_client(ledger: &Arc<SimulatedLedger>, policy: RetryPolicy) -> LedgerClient {
        LedgerClient::with_parts(ledger.clone(), Arc::new(NonceProvider::new()), policy, 64)
            .expect("client inside runtime")
    }

    /// Create, fund and unlock a fresh account named `alias`
    pub async fn funded_session(ledger: &SimulatedLedger, alias: &str) -> UnlockedSession {
        let wallet = WalletApi::new(Arc::new(InMemoryKeyStore::with_kdf(KdfParams::LIGHT)));
        let auth = Authentication::of(KeyAlias::new(alias).expect("valid alias"), "password");
        let address = wallet.create_key(&auth).await.expect("key created");
        ledger.fund(&address, Aer::new(STARTING_BALANCE));
        wallet.unlock(&auth).await.expect("unlocked")
    }

    pub fn address(seed: u8) -> AccountAddress {
        AccountAddress::from_public_key([seed; 32])
    }
}
