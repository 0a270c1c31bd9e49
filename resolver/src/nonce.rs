use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use alloy::{eips::BlockNumberOrTag, primitives::Address};
use async_trait::async_trait;
use tokio::sync::Mutex;
use txprep_core::chain::Chain;

use crate::{
    config::ResolverConfig,
    error::{NonceAllocationError, ResolutionError},
};

/// Hands out nonces for senders that did not pin one.
///
/// Every successful [`reserve`](NonceAllocator::reserve) is followed by exactly one
/// [`commit`](NonceAllocator::commit) (the transaction was resolved) or
/// [`release`](NonceAllocator::release) (the resolution failed and the nonce may be reused).
#[async_trait]
pub trait NonceAllocator: Send + Sync {
    async fn reserve(&self, chain: &dyn Chain, address: Address) -> Result<u64, ResolutionError>;

    async fn commit(&self, _chain_id: u64, _address: Address, _nonce: u64) {}

    async fn release(&self, _chain_id: u64, _address: Address, _nonce: u64) {}
}

/// Reads `eth_getTransactionCount(address, "pending")` on every reservation.
///
/// Keeps no state: two resolutions for the same sender racing each other receive the same
/// nonce. Use [`SequentialNonceAllocator`] when one process resolves many transactions per
/// sender.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkNonceAllocator;

async fn pending_nonce(chain: &dyn Chain, address: Address) -> Result<u64, NonceAllocationError> {
    chain
        .rpc()
        .get_transaction_count(address, BlockNumberOrTag::Pending)
        .await
        .map_err(|e| NonceAllocationError::SyncFailed {
            chain_id: chain.chain_id(),
            address,
            message: e.to_string(),
            inner_error: e,
        })
}

#[async_trait]
impl NonceAllocator for NetworkNonceAllocator {
    async fn reserve(&self, chain: &dyn Chain, address: Address) -> Result<u64, ResolutionError> {
        Ok(pending_nonce(chain, address).await?)
    }
}

/// Nonce bookkeeping for one sender on one chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountNonces {
    /// Next nonce never handed out before
    pub optimistic: u64,
    pub in_flight: BTreeSet<u64>,
    /// Released nonces, reused lowest first
    pub recycled: BTreeSet<u64>,
}

impl AccountNonces {
    pub fn new(onchain: u64) -> Self {
        Self {
            optimistic: onchain,
            ..Default::default()
        }
    }

    /// Moves past nonces the chain has already consumed.
    fn sync(&mut self, onchain: u64) {
        self.optimistic = self.optimistic.max(onchain);
        self.recycled = self.recycled.split_off(&onchain);
    }

    fn allocate(&mut self, max_in_flight: usize) -> Option<u64> {
        if self.in_flight.len() >= max_in_flight {
            return None;
        }

        let nonce = match self.recycled.pop_first() {
            Some(nonce) => nonce,
            None => {
                let nonce = self.optimistic;
                self.optimistic += 1;
                nonce
            }
        };
        self.in_flight.insert(nonce);

        Some(nonce)
    }

    fn commit(&mut self, nonce: u64) -> bool {
        self.in_flight.remove(&nonce)
    }

    fn release(&mut self, nonce: u64) -> bool {
        if !self.in_flight.remove(&nonce) {
            return false;
        }
        self.recycled.insert(nonce);
        true
    }
}

type AccountKey = (u64, Address);

/// Serializes nonce allocation per (chain, sender) inside this process.
///
/// The first reservation, and every reservation made while nothing is in flight, re-reads the
/// pending nonce from the chain. Otherwise nonces are handed out optimistically, reusing
/// released ones first.
///
/// State of a sender is kept after its last commit, since committed nonces may not be
/// pending on the chain yet. It is only dropped by [`resync`](Self::resync); long-running
/// callers resync senders they stop sending for.
pub struct SequentialNonceAllocator {
    max_in_flight: usize,
    accounts: Mutex<HashMap<AccountKey, Arc<Mutex<Option<AccountNonces>>>>>,
}

impl SequentialNonceAllocator {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            accounts: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::new(config.max_in_flight)
    }

    async fn account(&self, chain_id: u64, address: Address) -> Arc<Mutex<Option<AccountNonces>>> {
        self.accounts
            .lock()
            .await
            .entry((chain_id, address))
            .or_default()
            .clone()
    }

    /// Current bookkeeping for a sender, `None` before its first reservation
    pub async fn snapshot(&self, chain_id: u64, address: Address) -> Option<AccountNonces> {
        let account = self.accounts.lock().await.get(&(chain_id, address)).cloned()?;
        let nonces = account.lock().await;
        nonces.clone()
    }

    /// Forgets everything known about a sender; the next reservation re-reads the chain.
    pub async fn resync(&self, chain_id: u64, address: Address) {
        self.accounts.lock().await.remove(&(chain_id, address));
        tracing::debug!(chain_id, %address, "Dropped local nonce state");
    }
}

#[async_trait]
impl NonceAllocator for SequentialNonceAllocator {
    #[tracing::instrument(skip_all, fields(chain_id = chain.chain_id(), address = %address))]
    async fn reserve(&self, chain: &dyn Chain, address: Address) -> Result<u64, ResolutionError> {
        let chain_id = chain.chain_id();
        let account = self.account(chain_id, address).await;
        let mut state = account.lock().await;

        let onchain = match state.as_ref() {
            Some(nonces) if !nonces.in_flight.is_empty() => None,
            _ => Some(pending_nonce(chain, address).await?),
        };

        let nonces = state.get_or_insert_with(AccountNonces::default);
        if let Some(onchain) = onchain {
            nonces.sync(onchain);
        }

        let allocated = nonces.allocate(self.max_in_flight);
        let current = nonces.in_flight.len();

        match allocated {
            Some(nonce) => {
                tracing::debug!(nonce, in_flight = current, "Reserved nonce");
                Ok(nonce)
            }
            None => Err(NonceAllocationError::MaxInFlightReached {
                chain_id,
                address,
                current,
                max: self.max_in_flight,
            }
            .into()),
        }
    }

    async fn commit(&self, chain_id: u64, address: Address, nonce: u64) {
        let account = self.account(chain_id, address).await;
        let mut state = account.lock().await;

        if !state.as_mut().is_some_and(|nonces| nonces.commit(nonce)) {
            tracing::warn!(chain_id, %address, nonce, "Committed a nonce that was not in flight");
        }
    }

    async fn release(&self, chain_id: u64, address: Address, nonce: u64) {
        let account = self.account(chain_id, address).await;
        let mut state = account.lock().await;

        if state.as_mut().is_some_and(|nonces| nonces.release(nonce)) {
            tracing::debug!(chain_id, %address, nonce, "Recycled nonce");
        } else {
            tracing::warn!(chain_id, %address, nonce, "Released a nonce that was not in flight");
        }
    }
}
