//! Block ingestion pipeline.
//!
//! New-head notifications are pushed into an unbounded FIFO; each engine is the
//! only consumer of its queue and processes one block at a time in arrival
//! order.

use async_trait::async_trait;
use futures::StreamExt;
use keeper_chain::BlockStream;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::error::KeeperError;

pub type BlockSender = mpsc::UnboundedSender<u64>;
pub type BlockReceiver = mpsc::UnboundedReceiver<u64>;

pub fn block_queue() -> (BlockSender, BlockReceiver) {
    mpsc::unbounded_channel()
}

/// Consumer side of the pipeline.
///
/// Both operations index every block after the tip up to and including
/// `number`, so a block that was skipped or never announced is picked up by
/// the next one that succeeds. On error the tip is left where it was.
#[async_trait]
pub trait BlockHandler: Send {
    /// Number of the last indexed block.
    fn tip(&self) -> u64;

    /// Index up to `number` without a liquidation pass.
    async fn catch_up(&mut self, number: u64) -> Result<(), KeeperError>;

    /// Liquidation pass, then index up to `number`.
    async fn process_block(&mut self, number: u64) -> Result<(), KeeperError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    CatchUp,
    Process,
}

/// Drain `queue` into `handler` until every sender is gone.
///
/// The first notification is a liveness marker: it runs no liquidation pass,
/// only indexes whatever lies between the backfilled tip and the head it
/// names. Later notifications at or below the tip are dropped. A block that
/// keeps failing is given up after `block_retry_limit` attempts; its events
/// are indexed by the next block that succeeds.
pub async fn consume_blocks<H: BlockHandler>(
    mut queue: BlockReceiver,
    handler: &mut H,
    config: &PipelineConfig,
) {
    let mut first = true;
    while let Some(number) = queue.recv().await {
        if first {
            first = false;
            if number > handler.tip() {
                run_with_retry(handler, number, Step::CatchUp, config).await;
            }
            info!(block = number, tip = handler.tip(), "First head received, pipeline live");
            continue;
        }
        if number <= handler.tip() {
            debug!(block = number, tip = handler.tip(), "Dropping stale block notification");
            continue;
        }
        run_with_retry(handler, number, Step::Process, config).await;
    }
    info!("Block queue closed");
}

async fn run_with_retry<H: BlockHandler>(
    handler: &mut H,
    number: u64,
    step: Step,
    config: &PipelineConfig,
) -> bool {
    let attempts = config.block_retry_limit.max(1);
    for attempt in 1..=attempts {
        let result = match step {
            Step::CatchUp => handler.catch_up(number).await,
            Step::Process => handler.process_block(number).await,
        };
        match result {
            Ok(()) => return true,
            Err(e) if attempt < attempts => {
                let backoff = config.retry_backoff(attempt);
                warn!(
                    block = number,
                    step = ?step,
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Block processing failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                error!(
                    block = number,
                    step = ?step,
                    attempts = attempts,
                    tip = handler.tip(),
                    error = %e,
                    "Block processing failed, deferring to next block"
                );
            }
        }
    }
    false
}

/// Forward head notifications to every queue, resubscribing when the stream
/// ends or cannot be opened. Returns once all queues are closed.
pub async fn forward_blocks<S, Fut>(mut subscribe: S, mut queues: Vec<BlockSender>, resubscribe_delay: Duration)
where
    S: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<BlockStream>>,
{
    loop {
        match subscribe().await {
            Ok(mut stream) => {
                while let Some(number) = stream.next().await {
                    queues.retain(|queue| queue.send(number).is_ok());
                    if queues.is_empty() {
                        info!("All block queues closed, stopping forwarder");
                        return;
                    }
                }
                warn!(delay_secs = resubscribe_delay.as_secs(), "Head stream ended, resubscribing");
            }
            Err(e) => {
                error!(error = %e, delay_secs = resubscribe_delay.as_secs(), "Head subscription failed, retrying");
            }
        }

        queues.retain(|queue| !queue.is_closed());
        if queues.is_empty() {
            return;
        }
        tokio::time::sleep(resubscribe_delay).await;
    }
}
