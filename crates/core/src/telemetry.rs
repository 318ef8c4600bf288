//! Keeper telemetry.
//!
//! The engine reports through the [`Telemetry`] trait; [`MetricsTelemetry`]
//! forwards to the `metrics` facade with `market`/`network` labels, leaving
//! exporter installation to the binary.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gauge {
    OpenPositions,
    MarketSize,
    MarketSkew,
    RecentVolume,
}

impl Gauge {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenPositions => "keeper_open_positions",
            Self::MarketSize => "keeper_market_size",
            Self::MarketSkew => "keeper_market_skew",
            Self::RecentVolume => "keeper_recent_volume",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Liquidations observed on-chain, by anyone
    LiquidationsTotal,
    /// Liquidation transactions mined by this keeper
    LiquidationsSubmitted,
    KeeperErrors,
}

impl Counter {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LiquidationsTotal => "keeper_liquidations_total",
            Self::LiquidationsSubmitted => "keeper_liquidations_submitted",
            Self::KeeperErrors => "keeper_errors",
        }
    }
}

/// Sink for keeper gauges and counters of one market.
pub trait Telemetry: Send + Sync {
    fn set_gauge(&self, gauge: Gauge, value: f64);
    fn increment(&self, counter: Counter);
}

/// Lossy conversion for gauge values.
pub fn decimal_to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// [`Telemetry`] backed by the global `metrics` recorder.
#[derive(Debug, Clone)]
pub struct MetricsTelemetry {
    market: String,
    network: String,
}

impl MetricsTelemetry {
    pub fn new(market: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            market: market.into(),
            network: network.into(),
        }
    }
}

impl Telemetry for MetricsTelemetry {
    fn set_gauge(&self, gauge: Gauge, value: f64) {
        metrics::gauge!(
            gauge.name(),
            "market" => self.market.clone(),
            "network" => self.network.clone()
        )
        .set(value);
    }

    fn increment(&self, counter: Counter) {
        metrics::counter!(
            counter.name(),
            "market" => self.market.clone(),
            "network" => self.network.clone()
        )
        .increment(1);
    }
}

/// In-memory [`Telemetry`] that keeps the last gauge values and counter totals.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    gauges: parking_lot::Mutex<std::collections::HashMap<Gauge, f64>>,
    counters: parking_lot::Mutex<std::collections::HashMap<Counter, u64>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gauge(&self, gauge: Gauge) -> Option<f64> {
        self.gauges.lock().get(&gauge).copied()
    }

    pub fn count(&self, counter: Counter) -> u64 {
        self.counters.lock().get(&counter).copied().unwrap_or(0)
    }
}

impl Telemetry for RecordingTelemetry {
    fn set_gauge(&self, gauge: Gauge, value: f64) {
        self.gauges.lock().insert(gauge, value);
    }

    fn increment(&self, counter: Counter) {
        *self.counters.lock().entry(counter).or_insert(0) += 1;
    }
}
