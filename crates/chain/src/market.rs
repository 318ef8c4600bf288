//! Read-side access to a futures market contract.
//!
//! [`MarketClient`] is the seam the keeper engine talks through; the
//! [`RpcMarketClient`] implementation issues typed Alloy calls.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::rpc::types::Filter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::contracts::{parse_bytes32_string, IFuturesMarket};
use crate::events::{EventKind, OrderedEvent};

/// A block bound for log queries: a concrete number or the chain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRef {
    Number(u64),
    Latest,
}

impl From<u64> for BlockRef {
    fn from(number: u64) -> Self {
        Self::Number(number)
    }
}

impl From<BlockRef> for BlockNumberOrTag {
    fn from(block: BlockRef) -> Self {
        match block {
            BlockRef::Number(n) => BlockNumberOrTag::Number(n),
            BlockRef::Latest => BlockNumberOrTag::Latest,
        }
    }
}

impl FromStr for BlockRef {
    type Err = std::num::ParseIntError;

    /// Parses `latest` or a decimal block number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("latest") {
            Ok(Self::Latest)
        } else {
            s.parse().map(Self::Number)
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Latest => f.write_str("latest"),
        }
    }
}

/// Chain reads the keeper needs for one market.
#[async_trait]
pub trait MarketClient: Send + Sync {
    /// Market contract address.
    fn address(&self) -> Address;

    /// Base asset key of the market (e.g. `sETH`).
    async fn base_asset(&self) -> Result<String>;

    /// Current asset price (18 decimals).
    async fn asset_price(&self) -> Result<U256>;

    /// On-chain liquidation eligibility for an account.
    async fn can_liquidate(&self, account: Address) -> Result<bool>;

    /// All events of one kind in the inclusive block range, in no particular order.
    async fn query_events(
        &self,
        kind: EventKind,
        from: BlockRef,
        to: BlockRef,
    ) -> Result<Vec<OrderedEvent>>;

    /// Timestamp of a mined block.
    async fn block_timestamp(&self, number: u64) -> Result<u64>;

    /// Current chain head.
    async fn latest_block(&self) -> Result<u64>;
}

/// [`MarketClient`] backed by an Alloy provider.
#[derive(Clone)]
pub struct RpcMarketClient<P> {
    provider: P,
    address: Address,
}

impl<P> RpcMarketClient<P> {
    pub fn new(provider: P, address: Address) -> Self {
        Self { provider, address }
    }
}

impl<P> fmt::Debug for RpcMarketClient<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcMarketClient")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<P> MarketClient for RpcMarketClient<P>
where
    P: Provider + Clone + 'static,
{
    fn address(&self) -> Address {
        self.address
    }

    async fn base_asset(&self) -> Result<String> {
        let market = IFuturesMarket::new(self.address, &self.provider);
        let key = market.baseAsset().call().await?.key;
        Ok(parse_bytes32_string(&key.0))
    }

    async fn asset_price(&self) -> Result<U256> {
        let market = IFuturesMarket::new(self.address, &self.provider);
        let result = market.assetPrice().call().await?;
        if result.invalid {
            debug!(market = %self.address, "Asset price flagged invalid");
        }
        Ok(result.price)
    }

    async fn can_liquidate(&self, account: Address) -> Result<bool> {
        let market = IFuturesMarket::new(self.address, &self.provider);
        Ok(market.canLiquidate(account).call().await?._0)
    }

    async fn query_events(
        &self,
        kind: EventKind,
        from: BlockRef,
        to: BlockRef,
    ) -> Result<Vec<OrderedEvent>> {
        let filter = Filter::new()
            .address(self.address)
            .event_signature(kind.signature())
            .from_block(BlockNumberOrTag::from(from))
            .to_block(BlockNumberOrTag::from(to));

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .with_context(|| format!("eth_getLogs {kind} {from}..{to}"))?;

        Ok(logs.iter().filter_map(OrderedEvent::from_log).collect())
    }

    async fn block_timestamp(&self, number: u64) -> Result<u64> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number))
            .await?
            .with_context(|| format!("block {number} not found"))?;
        Ok(block.header.timestamp)
    }

    async fn latest_block(&self) -> Result<u64> {
        Ok(self.provider.get_block_number().await?)
    }
}
