//! In-crate test doubles for the chain seams.

use alloy::primitives::{Address, B256, I256, U256};
use async_trait::async_trait;
use keeper_chain::{
    BlockRef, EventKind, LiquidationSigner, MarketClient, MarketEvent, OrderedEvent, Submission,
    SubmitError,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::fixed_point::units;

pub(crate) const MARKET: Address = Address::repeat_byte(0xAA);

pub(crate) fn account(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub(crate) fn signed_units(n: i64) -> I256 {
    let magnitude = I256::from_raw(units(n.unsigned_abs()));
    if n < 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// `PositionModified` with whole-unit size, margin and price.
pub(crate) fn modified(
    who: u8,
    size: i64,
    margin: u64,
    price: u64,
    position: (u64, u64, u64),
) -> OrderedEvent {
    OrderedEvent::new(
        MarketEvent::PositionModified {
            id: U256::from(who),
            account: account(who),
            margin: units(margin),
            size: signed_units(size),
            trade_size: signed_units(size),
            last_price: units(price),
            funding_index: U256::ZERO,
            fee: U256::ZERO,
        },
        position.0,
        position.1,
        position.2,
    )
}

pub(crate) fn liquidated(who: u8, position: (u64, u64, u64)) -> OrderedEvent {
    OrderedEvent::new(
        MarketEvent::PositionLiquidated {
            id: U256::from(who),
            account: account(who),
            liquidator: account(0xEE),
            size: I256::ZERO,
            price: U256::ZERO,
            fee: U256::ZERO,
        },
        position.0,
        position.1,
        position.2,
    )
}

pub(crate) fn funding(timestamp: u64, position: (u64, u64, u64)) -> OrderedEvent {
    OrderedEvent::new(
        MarketEvent::FundingRecomputed {
            funding: I256::ZERO,
            index: U256::ZERO,
            timestamp,
        },
        position.0,
        position.1,
        position.2,
    )
}

/// Scriptable [`MarketClient`].
pub(crate) struct MockMarket {
    pub events: Mutex<Vec<OrderedEvent>>,
    pub price: Mutex<Option<U256>>,
    pub latest: AtomicU64,
    pub timestamps: Mutex<HashMap<u64, u64>>,
    /// Accounts `canLiquidate` answers true for; `None` means all.
    pub eligible: Mutex<Option<HashSet<Address>>>,
    /// Remaining `query_events` calls that fail.
    pub failing_queries: AtomicU32,
    pub query_calls: AtomicUsize,
    /// `(paused-clock instant, account)` per `canLiquidate` call.
    pub eligibility_checks: Mutex<Vec<(tokio::time::Instant, Address)>>,
    pub eligibility_delay: Mutex<Option<Duration>>,
}

impl MockMarket {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            price: Mutex::new(Some(units(1))),
            latest: AtomicU64::new(0),
            timestamps: Mutex::new(HashMap::new()),
            eligible: Mutex::new(Some(HashSet::new())),
            failing_queries: AtomicU32::new(0),
            query_calls: AtomicUsize::new(0),
            eligibility_checks: Mutex::new(Vec::new()),
            eligibility_delay: Mutex::new(None),
        }
    }

    pub fn with_events(events: Vec<OrderedEvent>) -> Self {
        let market = Self::new();
        *market.events.lock() = events;
        market
    }

    pub fn set_price(&self, price: Option<U256>) {
        *self.price.lock() = price;
    }

    pub fn set_latest(&self, block: u64) {
        self.latest.store(block, Ordering::SeqCst);
    }

    pub fn set_timestamp(&self, block: u64, timestamp: u64) {
        self.timestamps.lock().insert(block, timestamp);
    }

    pub fn make_eligible(&self, who: Address) {
        if let Some(set) = self.eligible.lock().as_mut() {
            set.insert(who);
        }
    }

    pub fn make_all_eligible(&self) {
        *self.eligible.lock() = None;
    }

    pub fn checked_accounts(&self) -> Vec<Address> {
        self.eligibility_checks.lock().iter().map(|(_, a)| *a).collect()
    }
}

fn bound(block: BlockRef) -> u64 {
    match block {
        BlockRef::Number(n) => n,
        BlockRef::Latest => u64::MAX,
    }
}

#[async_trait]
impl MarketClient for MockMarket {
    fn address(&self) -> Address {
        MARKET
    }

    async fn base_asset(&self) -> anyhow::Result<String> {
        Ok("sETH".to_string())
    }

    async fn asset_price(&self) -> anyhow::Result<U256> {
        (*self.price.lock()).ok_or_else(|| anyhow::anyhow!("price feed down"))
    }

    async fn can_liquidate(&self, who: Address) -> anyhow::Result<bool> {
        self.eligibility_checks
            .lock()
            .push((tokio::time::Instant::now(), who));
        let delay = *self.eligibility_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(match self.eligible.lock().as_ref() {
            Some(set) => set.contains(&who),
            None => true,
        })
    }

    async fn query_events(
        &self,
        kind: EventKind,
        from: BlockRef,
        to: BlockRef,
    ) -> anyhow::Result<Vec<OrderedEvent>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            anyhow::bail!("eth_getLogs timed out");
        }
        let (from, to) = (bound(from), bound(to));
        Ok(self
            .events
            .lock()
            .iter()
            .filter(|e| e.event.kind() == Some(kind))
            .filter(|e| e.block_number >= from && e.block_number <= to)
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, number: u64) -> anyhow::Result<u64> {
        self.timestamps
            .lock()
            .get(&number)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("block {number} not found"))
    }

    async fn latest_block(&self) -> anyhow::Result<u64> {
        Ok(self.latest.load(Ordering::SeqCst))
    }
}

/// How a [`MockSigner`] answers `liquidate_position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignerMode {
    Mined,
    Reverted,
    NonceExpired,
    RpcError,
}

/// Scriptable [`LiquidationSigner`].
pub(crate) struct MockSigner {
    pub address: Address,
    pub mode: Mutex<SignerMode>,
    pub submitted: Mutex<Vec<Address>>,
    pub refreshes: AtomicUsize,
    nonce: AtomicU64,
}

impl MockSigner {
    pub fn new(byte: u8) -> Self {
        Self {
            address: Address::repeat_byte(byte),
            mode: Mutex::new(SignerMode::Mined),
            submitted: Mutex::new(Vec::new()),
            refreshes: AtomicUsize::new(0),
            nonce: AtomicU64::new(0),
        }
    }

    pub fn with_mode(byte: u8, mode: SignerMode) -> Self {
        let signer = Self::new(byte);
        *signer.mode.lock() = mode;
        signer
    }
}

#[async_trait]
impl LiquidationSigner for MockSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn liquidate_position(
        &self,
        _market: Address,
        who: Address,
    ) -> Result<Submission, SubmitError> {
        let mode = *self.mode.lock();
        match mode {
            SignerMode::NonceExpired => {
                return Err(SubmitError::NonceExpired("nonce too low".to_string()))
            }
            SignerMode::RpcError => {
                return Err(SubmitError::Rpc(anyhow::anyhow!("connection reset")))
            }
            SignerMode::Mined | SignerMode::Reverted => {}
        }
        self.submitted.lock().push(who);
        Ok(Submission {
            tx_hash: B256::repeat_byte(0x11),
            block_number: Some(1),
            success: mode == SignerMode::Mined,
            gas_used: 21_000,
            nonce: self.nonce.fetch_add(1, Ordering::SeqCst),
            signer: self.address,
        })
    }

    async fn refresh_nonce(&self) -> anyhow::Result<u64> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(self.nonce.load(Ordering::SeqCst))
    }
}
