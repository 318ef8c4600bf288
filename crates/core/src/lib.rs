//! Keeper core logic.
//!
//! This crate provides the per-market keeper:
//! - Position index and sliding-window volume rebuilt from market events
//! - Leverage-prioritized, paced liquidation passes with per-position dedup
//! - Liquidation execution through a shared signer pool
//! - The single-consumer block pipeline and the engine that ties it together
//!
//! Chain access goes through the `keeper-chain` traits so every component can
//! run against in-memory doubles.

pub mod config;
mod engine;
mod error;
mod fetcher;
pub mod fixed_point;
mod indexer;
mod liquidator;
mod pipeline;
mod position;
mod scheduler;
mod tasks;
mod telemetry;
mod volume;

#[cfg(test)]
mod testing;

pub use config::{IndexerConfig, KeeperConfig, PipelineConfig, SchedulerConfig, SignerConfig};
pub use engine::KeeperEngine;
pub use error::{FetchError, KeeperError};
pub use fetcher::EventFetcher;
pub use indexer::{ApplySummary, BlockTip, MarketState};
pub use liquidator::{LiquidationExecutor, LiquidationOutcome};
pub use pipeline::{
    block_queue, consume_blocks, forward_blocks, BlockHandler, BlockReceiver, BlockSender,
};
pub use position::{OpenInterest, Position, PositionIndex};
pub use scheduler::{KeeperScheduler, PassSummary};
pub use tasks::{ActiveTasks, TaskOutcome};
pub use telemetry::{
    decimal_to_f64, Counter, Gauge, MetricsTelemetry, RecordingTelemetry, Telemetry,
};
pub use volume::{VolumeSample, VolumeWindow, DEFAULT_VOLUME_WINDOW};
