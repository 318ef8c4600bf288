//! Applies ordered market events to the position index and volume window.

use chrono::{DateTime, Utc};
use keeper_chain::{MarketClient, MarketEvent, OrderedEvent};
use tracing::{debug, warn};

use crate::fixed_point::{leverage, notional, signed_wad_to_decimal, wad_to_decimal};
use crate::position::{Position, PositionIndex};
use crate::telemetry::{decimal_to_f64, Counter, Gauge, Telemetry};
use crate::volume::{VolumeSample, VolumeWindow};

/// Latest processed block and the chain time the keeper has observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockTip {
    pub number: u64,
    /// Unix seconds
    pub timestamp: u64,
}

impl BlockTip {
    /// Chain time of the tip, `None` until a timestamp has been observed.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        if self.timestamp == 0 {
            return None;
        }
        DateTime::from_timestamp(self.timestamp as i64, 0)
    }
}

/// Counts from one applied batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplySummary {
    pub upserted: usize,
    pub closed: usize,
    pub liquidated: usize,
    pub ignored: usize,
}

/// Market state rebuilt from the event log.
#[derive(Debug, Clone)]
pub struct MarketState {
    pub positions: PositionIndex,
    pub volume: VolumeWindow,
    pub tip: BlockTip,
}

impl MarketState {
    pub fn new(volume: VolumeWindow) -> Self {
        Self {
            positions: PositionIndex::new(),
            volume,
            tip: BlockTip::default(),
        }
    }

    /// Apply one batch of events in the order given, then refresh the volume
    /// window and publish recent volume.
    ///
    /// `events` must already be in canonical order.
    pub fn apply_events(&mut self, events: &[OrderedEvent], telemetry: &dyn Telemetry) -> ApplySummary {
        let mut summary = ApplySummary::default();

        for ordered in events {
            let block = ordered.block_number;
            match &ordered.event {
                MarketEvent::FundingRecomputed { timestamp, .. } => {
                    self.tip.timestamp = self.tip.timestamp.max(*timestamp);
                }
                MarketEvent::PositionModified {
                    id,
                    account,
                    margin,
                    size,
                    trade_size,
                    last_price,
                    ..
                } => {
                    debug!(
                        event = ordered.event.name(),
                        id = %id,
                        account = %account,
                        block = block,
                        "Applying event"
                    );

                    let Some(lev) = leverage(*size, *last_price, *margin).filter(|_| !size.is_zero())
                    else {
                        if self.positions.remove(account).is_some() {
                            summary.closed += 1;
                        }
                        continue;
                    };

                    self.positions.upsert(Position {
                        id: *id,
                        account: *account,
                        size: signed_wad_to_decimal(*size),
                        leverage: lev,
                    });
                    self.volume.push(VolumeSample {
                        notional_usd: notional(*trade_size, *last_price),
                        timestamp: self.tip.timestamp,
                    });
                    summary.upserted += 1;
                }
                MarketEvent::PositionLiquidated {
                    id,
                    account,
                    liquidator,
                    ..
                } => {
                    debug!(
                        event = ordered.event.name(),
                        id = %id,
                        account = %account,
                        liquidator = %liquidator,
                        block = block,
                        "Applying event"
                    );
                    telemetry.increment(Counter::LiquidationsTotal);
                    self.positions.remove(account);
                    summary.liquidated += 1;
                }
                MarketEvent::Unknown { signature } => {
                    debug!(signature = %signature, block = block, "No handler for event");
                    summary.ignored += 1;
                }
            }
        }

        let recent = self.volume.refresh(self.tip.timestamp);
        telemetry.set_gauge(Gauge::RecentVolume, decimal_to_f64(recent));

        summary
    }

    /// Recompute open interest at the current asset price and publish it.
    ///
    /// A failed price read leaves the gauges untouched.
    pub async fn publish_open_interest(&self, market: &dyn MarketClient, telemetry: &dyn Telemetry) {
        let price = match market.asset_price().await {
            Ok(price) => wad_to_decimal(price),
            Err(e) => {
                warn!(market = %market.address(), error = %e, "Failed to read asset price");
                return;
            }
        };

        let oi = self.positions.open_interest(price);
        telemetry.set_gauge(Gauge::MarketSize, decimal_to_f64(oi.market_size));
        telemetry.set_gauge(Gauge::MarketSkew, decimal_to_f64(oi.market_skew));
    }
}
