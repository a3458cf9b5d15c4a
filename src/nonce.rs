//! Per-identity nonce allocation
//!
//! Each bound identity owns an atomic last-used counter. `allocate` is a
//! single `fetch_add` on that counter, so callers for different identities
//! never contend and callers for the same identity are totally ordered.
//!
//! Inserting a new identity goes through one admission lock, which is where
//! least-recently-used eviction happens when a capacity is configured.
//! Network I/O never happens under either lock.
//!
//! Unbound identities hard-fail by default with
//! [`ClientError::UnboundIdentity`]; [`UnboundPolicy::StartFromZero`] opts
//! into implicit binding at zero.

use crate::errors::{ClientError, ClientResult};
use crate::metrics::metrics;
use crate::types::{AccountAddress, AccountState};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Default number of identities tracked before eviction starts
pub const DEFAULT_CAPACITY: usize = 1000;

/// What `allocate` does for an identity that has no entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnboundPolicy {
    /// Fail with `UnboundIdentity`; callers must bind first
    #[default]
    Fail,
    /// Bind implicitly to zero so the first allocation returns 1
    StartFromZero,
}

/// Nonce entry for one identity
#[derive(Debug)]
struct NonceEntry {
    last_used: AtomicU64,
    /// Logical clock value of the last bind/allocate, for LRU eviction
    touched: AtomicU64,
}

impl NonceEntry {
    fn new(last_used: u64, tick: u64) -> Self {
        Self {
            last_used: AtomicU64::new(last_used),
            touched: AtomicU64::new(tick),
        }
    }
}

/// Concurrent nonce cache keyed by account identity
#[derive(Debug)]
pub struct NonceProvider {
    entries: DashMap<AccountAddress, Arc<NonceEntry>>,
    /// 0 means unbounded
    capacity: usize,
    policy: UnboundPolicy,
    clock: AtomicU64,
    admission: Mutex<()>,
}

impl Default for NonceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl NonceProvider {
    /// Provider with the default capacity and hard-fail policy
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Provider tracking at most `capacity` identities (0 = unbounded)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            policy: UnboundPolicy::Fail,
            clock: AtomicU64::new(0),
            admission: Mutex::new(()),
        }
    }

    pub fn with_policy(mut self, policy: UnboundPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> UnboundPolicy {
        self.policy
    }

    /// Number of identities currently bound
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Set the last-used nonce for `address`, replacing any previous value
    pub fn bind(&self, address: &AccountAddress, nonce: u64) {
        let tick = self.tick();
        if let Some(entry) = self.entries.get(address) {
            entry.last_used.store(nonce, Ordering::SeqCst);
            entry.touched.store(tick, Ordering::Relaxed);
            debug!(address = %address, nonce, "Nonce rebound");
            return;
        }

        let _guard = self.admission.lock();
        // Another caller may have inserted while we waited
        if let Some(entry) = self.entries.get(address) {
            entry.last_used.store(nonce, Ordering::SeqCst);
            entry.touched.store(tick, Ordering::Relaxed);
            return;
        }
        self.evict_for_insert();
        self.entries
            .insert(address.clone(), Arc::new(NonceEntry::new(nonce, tick)));
        metrics().nonce_bound_identities.set(self.entries.len() as i64);
        debug!(address = %address, nonce, "Nonce bound");
    }

    /// Bind from the authoritative account state
    pub fn bind_state(&self, state: &AccountState) {
        self.bind(&state.address, state.nonce);
    }

    /// Increment and return the next nonce for `address`
    pub fn allocate(&self, address: &AccountAddress) -> ClientResult<u64> {
        if let Some(next) = self.increment(address) {
            return next;
        }

        match self.policy {
            UnboundPolicy::Fail => {
                metrics().nonce_unbound_total.inc();
                Err(ClientError::UnboundIdentity(address.clone()))
            }
            UnboundPolicy::StartFromZero => {
                {
                    let _guard = self.admission.lock();
                    if !self.entries.contains_key(address) {
                        self.evict_for_insert();
                        let tick = self.tick();
                        self.entries
                            .insert(address.clone(), Arc::new(NonceEntry::new(0, tick)));
                        metrics().nonce_bound_identities.set(self.entries.len() as i64);
                        debug!(address = %address, "Nonce implicitly bound to zero");
                    }
                }
                self.increment(address)
                    .unwrap_or_else(|| Err(ClientError::UnboundIdentity(address.clone())))
            }
        }
    }

    /// `None` when unbound; the sequence never wraps past `u64::MAX`
    fn increment(&self, address: &AccountAddress) -> Option<ClientResult<u64>> {
        // The shard read guard keeps the entry from being evicted mid-increment
        let entry = self.entries.get(address)?;
        let previous = entry
            .last_used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| last.checked_add(1));
        let nonce = match previous {
            Ok(last) => last + 1,
            Err(_) => {
                warn!(address = %address, "Nonce sequence exhausted");
                return Some(Err(ClientError::NonceExhausted(address.clone())));
            }
        };
        entry.touched.store(self.tick(), Ordering::Relaxed);
        metrics().nonce_allocations_total.inc();
        trace!(address = %address, nonce, "Nonce allocated");
        Some(Ok(nonce))
    }

    /// Current last-used nonce without incrementing
    pub fn peek(&self, address: &AccountAddress) -> ClientResult<u64> {
        self.entries
            .get(address)
            .map(|entry| entry.last_used.load(Ordering::SeqCst))
            .ok_or_else(|| ClientError::UnboundIdentity(address.clone()))
    }

    /// Drop the entry for `address`; returns whether one existed
    pub fn unbind(&self, address: &AccountAddress) -> bool {
        let _guard = self.admission.lock();
        let removed = self.entries.remove(address).is_some();
        metrics().nonce_bound_identities.set(self.entries.len() as i64);
        removed
    }

    /// Must be called with the admission lock held
    fn evict_for_insert(&self) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().touched.load(Ordering::Relaxed))
                .map(|entry| entry.key().clone());
            match oldest {
                Some(address) => {
                    self.entries.remove(&address);
                    metrics().nonce_evictions_total.inc();
                    debug!(address = %address, "Evicted least recently used nonce entry");
                }
                None => break,
            }
        }
    }
}
