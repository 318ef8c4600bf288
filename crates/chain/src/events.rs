//! Market event decoding and canonical ordering.
//!
//! Logs arrive from several `eth_getLogs` queries (one per event kind), so
//! their relative order is not meaningful. Every decoded event carries its
//! `(block, tx index, log index)` position, and that tuple is the only order
//! the keeper trusts.

use alloy::primitives::{Address, B256, I256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use std::fmt;
use tracing::warn;

use crate::contracts::IFuturesMarket;

/// Event kinds the keeper queries for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PositionModified,
    PositionLiquidated,
    FundingRecomputed,
}

impl EventKind {
    /// All kinds of interest, in query order.
    pub const ALL: [EventKind; 3] = [
        EventKind::PositionModified,
        EventKind::PositionLiquidated,
        EventKind::FundingRecomputed,
    ];

    /// Solidity event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PositionModified => "PositionModified",
            Self::PositionLiquidated => "PositionLiquidated",
            Self::FundingRecomputed => "FundingRecomputed",
        }
    }

    /// Topic0 used to filter logs of this kind.
    pub fn signature(&self) -> B256 {
        match self {
            Self::PositionModified => IFuturesMarket::PositionModified::SIGNATURE_HASH,
            Self::PositionLiquidated => IFuturesMarket::PositionLiquidated::SIGNATURE_HASH,
            Self::FundingRecomputed => IFuturesMarket::FundingRecomputed::SIGNATURE_HASH,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Decoded market event. Fixed-point fields keep their on-chain 18-decimal
/// representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    PositionModified {
        id: U256,
        account: Address,
        margin: U256,
        size: I256,
        trade_size: I256,
        last_price: U256,
        funding_index: U256,
        fee: U256,
    },
    PositionLiquidated {
        id: U256,
        account: Address,
        liquidator: Address,
        size: I256,
        price: U256,
        fee: U256,
    },
    FundingRecomputed {
        funding: I256,
        index: U256,
        timestamp: u64,
    },
    /// A log from the market contract with a topic0 we have no handler for.
    Unknown { signature: B256 },
}

impl MarketEvent {
    /// Event name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PositionModified { .. } => "PositionModified",
            Self::PositionLiquidated { .. } => "PositionLiquidated",
            Self::FundingRecomputed { .. } => "FundingRecomputed",
            Self::Unknown { .. } => "Unknown",
        }
    }

    /// Kind of this event, `None` for unknown logs.
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Self::PositionModified { .. } => Some(EventKind::PositionModified),
            Self::PositionLiquidated { .. } => Some(EventKind::PositionLiquidated),
            Self::FundingRecomputed { .. } => Some(EventKind::FundingRecomputed),
            Self::Unknown { .. } => None,
        }
    }
}

/// An event together with its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedEvent {
    pub event: MarketEvent,
    pub block_number: u64,
    pub tx_index: u64,
    pub log_index: u64,
    pub tx_hash: B256,
}

impl OrderedEvent {
    pub fn new(event: MarketEvent, block_number: u64, tx_index: u64, log_index: u64) -> Self {
        Self {
            event,
            block_number,
            tx_index,
            log_index,
            tx_hash: B256::ZERO,
        }
    }

    /// Total order key: `(block_number, tx_index, log_index)`.
    #[inline]
    pub fn order_key(&self) -> (u64, u64, u64) {
        (self.block_number, self.tx_index, self.log_index)
    }

    /// Decode an RPC log. Returns `None` for pending logs (no position yet)
    /// and for logs whose payload does not match their signature.
    pub fn from_log(log: &Log) -> Option<Self> {
        let (Some(block_number), Some(tx_index), Some(log_index)) =
            (log.block_number, log.transaction_index, log.log_index)
        else {
            warn!(address = %log.address(), "Skipping log without chain position");
            return None;
        };

        let sig = *log.topics().first()?;
        let event = match decode_event(log, sig) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    block = block_number,
                    log_index = log_index,
                    signature = %sig,
                    error = %e,
                    "Skipping malformed market log"
                );
                return None;
            }
        };

        Some(Self {
            event,
            block_number,
            tx_index,
            log_index,
            tx_hash: log.transaction_hash.unwrap_or_default(),
        })
    }
}

/// Sort events into the canonical chain order.
pub fn sort_canonical(events: &mut [OrderedEvent]) {
    events.sort_by_key(OrderedEvent::order_key);
}

fn decode_event(log: &Log, sig: B256) -> alloy::sol_types::Result<MarketEvent> {
    if sig == IFuturesMarket::PositionModified::SIGNATURE_HASH {
        let e = log.log_decode::<IFuturesMarket::PositionModified>()?.inner.data;
        Ok(MarketEvent::PositionModified {
            id: e.id,
            account: e.account,
            margin: e.margin,
            size: e.size,
            trade_size: e.tradeSize,
            last_price: e.lastPrice,
            funding_index: e.fundingIndex,
            fee: e.fee,
        })
    } else if sig == IFuturesMarket::PositionLiquidated::SIGNATURE_HASH {
        let e = log.log_decode::<IFuturesMarket::PositionLiquidated>()?.inner.data;
        Ok(MarketEvent::PositionLiquidated {
            id: e.id,
            account: e.account,
            liquidator: e.liquidator,
            size: e.size,
            price: e.price,
            fee: e.fee,
        })
    } else if sig == IFuturesMarket::FundingRecomputed::SIGNATURE_HASH {
        let e = log.log_decode::<IFuturesMarket::FundingRecomputed>()?.inner.data;
        Ok(MarketEvent::FundingRecomputed {
            funding: e.funding,
            index: e.index,
            timestamp: e.timestamp.saturating_to::<u64>(),
        })
    } else {
        Ok(MarketEvent::Unknown { signature: sig })
    }
}
