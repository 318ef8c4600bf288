//! Configuration management with profile support.
//!
//! Provides the keeper's tunables with support for different profiles
//! (testing, production) and TOML overrides.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure containing all keeper parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Liquidation pass batching
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Event indexing and volume tracking
    #[serde(default)]
    pub indexer: IndexerConfig,

    /// Block pipeline retry and reconnect behaviour
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Transaction submission parameters
    #[serde(default)]
    pub signer: SignerConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Liquidation pass batching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Positions attempted concurrently per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches (milliseconds)
    #[serde(default = "default_batch_pacing")]
    pub batch_pacing_ms: u64,
}

fn default_batch_size() -> usize {
    500
}
fn default_batch_pacing() -> u64 {
    2000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_pacing_ms: default_batch_pacing(),
        }
    }
}

impl SchedulerConfig {
    pub fn batch_pacing(&self) -> Duration {
        Duration::from_millis(self.batch_pacing_ms)
    }
}

/// Event indexing and volume tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Trailing window for recent volume (seconds)
    #[serde(default = "default_volume_window")]
    pub volume_window_secs: u64,

    /// Warn when a single event query returns more than this many logs
    #[serde(default = "default_fetch_warn_threshold")]
    pub fetch_warn_threshold: usize,
}

fn default_volume_window() -> u64 {
    24 * 60 * 60
}
fn default_fetch_warn_threshold() -> usize {
    1000
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            volume_window_secs: default_volume_window(),
            fetch_warn_threshold: default_fetch_warn_threshold(),
        }
    }
}

impl IndexerConfig {
    pub fn volume_window(&self) -> Duration {
        Duration::from_secs(self.volume_window_secs)
    }
}

/// Block pipeline retry and reconnect behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Attempts per block before it is skipped
    #[serde(default = "default_block_retry_limit")]
    pub block_retry_limit: u32,

    /// Base delay between attempts, doubled each retry (milliseconds)
    #[serde(default = "default_block_retry_backoff")]
    pub block_retry_backoff_ms: u64,

    /// Delay before resubscribing after the head stream ends (seconds)
    #[serde(default = "default_resubscribe_delay")]
    pub resubscribe_delay_secs: u64,
}

fn default_block_retry_limit() -> u32 {
    5
}
fn default_block_retry_backoff() -> u64 {
    500
}
fn default_resubscribe_delay() -> u64 {
    5
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            block_retry_limit: default_block_retry_limit(),
            block_retry_backoff_ms: default_block_retry_backoff(),
            resubscribe_delay_secs: default_resubscribe_delay(),
        }
    }
}

impl PipelineConfig {
    /// Backoff before retry number `attempt` (1-based), capped at 32x the base.
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(5);
        Duration::from_millis(self.block_retry_backoff_ms.saturating_mul(factor))
    }

    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_secs(self.resubscribe_delay_secs)
    }
}

/// Transaction submission parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Gas limit for `liquidatePosition`
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Multiplier applied to the node's gas price
    #[serde(default = "default_gas_multiplier")]
    pub gas_price_multiplier: f64,
}

fn default_gas_limit() -> u64 {
    1_500_000
}
fn default_gas_multiplier() -> f64 {
    1.0
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            gas_limit: default_gas_limit(),
            gas_price_multiplier: default_gas_multiplier(),
        }
    }
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            scheduler: SchedulerConfig::default(),
            indexer: IndexerConfig::default(),
            pipeline: PipelineConfig::default(),
            signer: SignerConfig::default(),
        }
    }
}

impl KeeperConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Create a testing profile: small batches, short pauses.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            scheduler: SchedulerConfig {
                batch_size: 50,
                batch_pacing_ms: 200,
            },
            indexer: IndexerConfig {
                volume_window_secs: 60 * 60,
                fetch_warn_threshold: 100,
            },
            pipeline: PipelineConfig {
                block_retry_limit: 2,
                block_retry_backoff_ms: 100,
                resubscribe_delay_secs: 1,
            },
            signer: SignerConfig::default(),
        }
    }

    /// Create a production profile with conservative settings.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            scheduler: SchedulerConfig::default(),
            indexer: IndexerConfig::default(),
            pipeline: PipelineConfig {
                block_retry_limit: 8,
                block_retry_backoff_ms: 1000,
                resubscribe_delay_secs: 5,
            },
            signer: SignerConfig {
                gas_limit: 2_000_000,
                gas_price_multiplier: 1.1, // Outbid other keepers slightly
            },
        }
    }

    /// Load from `KEEPER_CONFIG` (TOML path) if set, otherwise pick the
    /// profile named by `KEEPER_PROFILE`.
    /// Supported profiles: testing, production
    pub fn from_env() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var("KEEPER_CONFIG") {
            return Self::from_file(&path);
        }
        let profile = std::env::var("KEEPER_PROFILE").unwrap_or_else(|_| "default".to_string());
        Ok(Self::from_profile(&profile))
    }

    pub fn from_profile(profile: &str) -> Self {
        match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            _ => Self::default(),
        }
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Keeper configuration loaded");
        tracing::info!(
            batch_size = self.scheduler.batch_size,
            batch_pacing_ms = self.scheduler.batch_pacing_ms,
            "Scheduler"
        );
        tracing::info!(
            volume_window_secs = self.indexer.volume_window_secs,
            fetch_warn_threshold = self.indexer.fetch_warn_threshold,
            "Indexer"
        );
        tracing::info!(
            retry_limit = self.pipeline.block_retry_limit,
            retry_backoff_ms = self.pipeline.block_retry_backoff_ms,
            resubscribe_delay_secs = self.pipeline.resubscribe_delay_secs,
            "Pipeline"
        );
        tracing::info!(
            gas_limit = self.signer.gas_limit,
            gas_multiplier = self.signer.gas_price_multiplier,
            "Signer"
        );
    }
}
