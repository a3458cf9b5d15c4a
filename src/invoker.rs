//! Build-sign-submit with retry on nonce conflicts
//!
//! Each attempt draws a fresh nonce from the [`NonceProvider`], builds the
//! transaction for it, signs and submits. Only
//! [`ClientError::NonceConflict`] is retried: the invoker re-reads the
//! account state from the endpoint, rebinds the provider to it and waits
//! the policy interval before the next attempt. The nonce is always
//! re-derived from chain state, never bumped locally.
//!
//! A conflict on the final attempt ends in [`ClientError::RetryExhausted`].
//! Every other failure is returned as-is on the attempt it happened.

use crate::crypto::{SignedTransaction, SignerService};
use crate::endpoint::LedgerEndpoint;
use crate::errors::{ClientError, ClientResult};
use crate::logging::OperationLogger;
use crate::metrics::{metrics, Timer};
use crate::nonce::NonceProvider;
use crate::tx::RawTransaction;
use crate::types::{AccountAddress, TxHash};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::debug;

/// Attempt bound and spacing for nonce-conflict retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
    operation_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// `max_attempts` counts the first attempt; values below 1 are raised to 1
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            operation_timeout: None,
        }
    }

    /// Bound the total time across all attempts
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Shared retry engine for the wallet and low-level contract paths
#[derive(Clone)]
pub struct NonceRetryInvoker {
    endpoint: Arc<dyn LedgerEndpoint>,
    nonces: Arc<NonceProvider>,
    policy: RetryPolicy,
}

impl NonceRetryInvoker {
    pub fn new(
        endpoint: Arc<dyn LedgerEndpoint>,
        nonces: Arc<NonceProvider>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            endpoint,
            nonces,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn nonces(&self) -> &Arc<NonceProvider> {
        &self.nonces
    }

    pub fn endpoint(&self) -> &Arc<dyn LedgerEndpoint> {
        &self.endpoint
    }

    /// Bind `address` from chain state unless it is already bound
    pub async fn ensure_bound(&self, address: &AccountAddress) -> ClientResult<()> {
        if self.nonces.peek(address).is_ok() {
            return Ok(());
        }
        let state = self.endpoint.get_account_state(address).await?;
        self.nonces.bind_state(&state);
        debug!(
            address = %address,
            nonce = state.nonce,
            "Bound nonce from chain state on first use"
        );
        Ok(())
    }

    /// Run build-sign-submit for `signer`, retrying nonce conflicts
    ///
    /// `build` receives the nonce for the current attempt and is called once
    /// per attempt.
    pub async fn invoke<F>(
        &self,
        operation: &'static str,
        signer: &dyn SignerService,
        build: F,
    ) -> ClientResult<TxHash>
    where
        F: Fn(u64) -> ClientResult<RawTransaction> + Send + Sync,
    {
        let timer = Timer::start();
        let attempts = self.run_attempts(operation, signer, &build);
        let result = match self.policy.operation_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempts).await {
                Ok(result) => result,
                Err(_) => Err(ClientError::Timeout(limit.as_millis() as u64)),
            },
            None => attempts.await,
        };
        timer.observe(&metrics().invoke_latency);
        if result.is_err() {
            metrics().tx_failed_total.inc();
        }
        result
    }

    async fn run_attempts<F>(
        &self,
        operation: &'static str,
        signer: &dyn SignerService,
        build: &F,
    ) -> ClientResult<TxHash>
    where
        F: Fn(u64) -> ClientResult<RawTransaction> + Send + Sync,
    {
        let address = signer.address();
        let logger = OperationLogger::new(operation, address.clone());
        let started = Timer::start();
        let attempts = AtomicU32::new(0);
        let max_attempts = self.policy.max_attempts;

        // One delay per retry; the strategy running dry ends the loop
        let delays = FixedInterval::new(self.policy.interval).take(max_attempts as usize - 1);

        let (address_ref, logger_ref, attempts_ref) = (&address, &logger, &attempts);
        let attempt_once = move || {
            let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
            self.attempt(attempt, signer, build, address_ref, logger_ref)
        };

        match RetryIf::spawn(delays, attempt_once, |err: &ClientError| err.is_retryable()).await {
            Ok(hash) => {
                let attempt = attempts.load(Ordering::SeqCst);
                logger.log_success(attempt, &hash, (started.elapsed_secs() * 1000.0) as u64);
                Ok(hash)
            }
            Err(err) if err.is_retryable() => {
                let attempt = attempts.load(Ordering::SeqCst);
                logger.log_exhausted(attempt);
                metrics().retries_exhausted_total.inc();
                Err(ClientError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                })
            }
            Err(err) => Err(err),
        }
    }

    /// One allocate-build-sign-submit pass
    ///
    /// A conflict that leaves attempts to spare rebinds from chain state
    /// before it is handed back to the retry driver.
    async fn attempt<F>(
        &self,
        attempt: u32,
        signer: &dyn SignerService,
        build: &F,
        address: &AccountAddress,
        logger: &OperationLogger,
    ) -> ClientResult<TxHash>
    where
        F: Fn(u64) -> ClientResult<RawTransaction> + Send + Sync,
    {
        let nonce = self.nonces.allocate(address)?;
        logger.log_attempt(attempt, nonce);

        let raw = build(nonce)?;
        let signed = signer.sign_transaction(raw).await?;
        let err = match self.submit_once(&signed).await {
            Ok(hash) => return Ok(hash),
            Err(err) => err,
        };
        if !err.is_retryable() {
            logger.log_failure(attempt, &err);
            return Err(err);
        }
        if let ClientError::NonceConflict { submitted, expected, .. } = &err {
            logger.log_conflict(attempt, *submitted, *expected);
        }
        if attempt < self.policy.max_attempts {
            let state = self.endpoint.get_account_state(address).await?;
            self.nonces.bind_state(&state);
            metrics().nonce_rebinds_total.inc();
            logger.log_rebind(state.nonce);
        }
        Err(err)
    }

    /// Submit an already-signed transaction exactly once
    pub async fn submit_once(&self, signed: &SignedTransaction) -> ClientResult<TxHash> {
        let timer = Timer::start();
        let result = self.endpoint.submit(signed).await;
        timer.observe(&metrics().submit_latency);
        match &result {
            Ok(_) => metrics().tx_submissions_total.inc(),
            Err(ClientError::NonceConflict { .. }) => metrics().nonce_conflicts_total.inc(),
            Err(_) => {}
        }
        result
    }
}
