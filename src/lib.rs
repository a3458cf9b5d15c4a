//! Ledger Orchestrator - client-side orchestration core for a remote ledger
//!
//! Allocates per-account nonces, builds and signs typed transactions,
//! retries submissions that lose a nonce race, and multiplexes push
//! subscriptions for blocks and contract events.
//!
//! The remote node, the signing capability and key persistence sit behind
//! the [`LedgerEndpoint`], [`SignerService`] and [`KeyStore`] traits.

pub mod client;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod endpoint;
pub mod errors;
pub mod invoker;
pub mod keystore;
pub mod logging;
pub mod metrics;
pub mod nonce;
pub mod subscription;
pub mod test_utils;
pub mod tx;
pub mod types;
pub mod wallet;

// Re-export commonly used types
pub use client::LedgerClient;
pub use config::Config;
pub use crypto::{KeyPair, SignedTransaction, SignerService};
pub use endpoint::{EventFilter, LedgerEndpoint};
pub use errors::{ClientError, ClientResult, Disposition, KeyStoreError};
pub use invoker::{NonceRetryInvoker, RetryPolicy};
pub use keystore::{Authentication, Identity, KeyStore};
pub use nonce::{NonceProvider, UnboundPolicy};
pub use subscription::{StreamObserver, Subscription};
pub use tx::{ContractArg, ContractDefinition, ContractInvocation, RawTransaction};
pub use types::{AccountAddress, Aer, ChainIdHash, Fee, IntoAmount, TxHash};
pub use wallet::{UnlockedSession, WalletApi};

#[cfg(test)]
mod tests {
    // Scenario test modules
    mod concurrent_senders_tests;
    mod retry_scenario_tests;
    mod subscription_scenario_tests;
    mod test_helpers;
}
