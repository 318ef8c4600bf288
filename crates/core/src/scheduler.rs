//! Leverage-prioritized liquidation passes.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::config::SchedulerConfig;
use crate::liquidator::LiquidationExecutor;
use crate::position::PositionIndex;
use crate::tasks::{ActiveTasks, TaskOutcome};
use crate::telemetry::{Gauge, Telemetry};

/// Counts from one keeper pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassSummary {
    pub positions: usize,
    pub batches: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Runs the executor over every indexed position, highest leverage first,
/// in paced batches.
pub struct KeeperScheduler {
    executor: LiquidationExecutor,
    tasks: ActiveTasks,
    telemetry: Arc<dyn Telemetry>,
    batch_size: usize,
    batch_pacing: Duration,
}

impl KeeperScheduler {
    pub fn new(
        executor: LiquidationExecutor,
        telemetry: Arc<dyn Telemetry>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            executor,
            tasks: ActiveTasks::new(),
            telemetry,
            batch_size: config.batch_size.max(1),
            batch_pacing: config.batch_pacing(),
        }
    }

    /// In-flight task ids.
    pub fn active_tasks(&self) -> &ActiveTasks {
        &self.tasks
    }

    /// One pass over `positions`.
    ///
    /// Each batch settles completely before the next starts; the pacing delay
    /// is applied between batches, not after the last one.
    #[instrument(skip_all, fields(positions = positions.len()))]
    pub async fn run_keepers(&self, positions: &PositionIndex) -> PassSummary {
        self.telemetry
            .set_gauge(Gauge::OpenPositions, positions.len() as f64);
        info!(count = positions.len(), "Positions to keep");

        let ordered = positions.by_leverage_desc();
        let mut summary = PassSummary {
            positions: ordered.len(),
            ..Default::default()
        };

        for (i, batch) in ordered.chunks(self.batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.batch_pacing).await;
            }
            info!(batch = i, size = batch.len(), "Running keeper batch");

            let attempts = batch.iter().map(|p| {
                self.tasks.run_keeper_task(
                    p.id,
                    "liquidation",
                    self.telemetry.as_ref(),
                    self.executor.liquidate(p.id, p.account),
                )
            });
            for outcome in join_all(attempts).await {
                match outcome {
                    TaskOutcome::Completed => summary.completed += 1,
                    TaskOutcome::Skipped => summary.skipped += 1,
                    TaskOutcome::Failed => summary.failed += 1,
                }
            }
            summary.batches += 1;
        }

        if summary.failed > 0 {
            info!(
                completed = summary.completed,
                failed = summary.failed,
                skipped = summary.skipped,
                "Keeper pass finished with failures"
            );
        }
        summary
    }
}
