//! Per-market keeper engine.
//!
//! Owns the position index, volume window and block tip for one market and
//! drives them from the block pipeline. All mutation happens on the engine's
//! own task; liquidation passes borrow the index immutably.

use anyhow::Context;
use async_trait::async_trait;
use keeper_chain::{BlockRef, MarketClient, MarketEvent, OrderedEvent, SignerPool};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::{KeeperConfig, PipelineConfig};
use crate::error::KeeperError;
use crate::fetcher::EventFetcher;
use crate::indexer::{ApplySummary, MarketState};
use crate::liquidator::LiquidationExecutor;
use crate::pipeline::{consume_blocks, BlockHandler, BlockReceiver};
use crate::scheduler::{KeeperScheduler, PassSummary};
use crate::telemetry::Telemetry;
use crate::volume::VolumeWindow;

pub struct KeeperEngine {
    market: Arc<dyn MarketClient>,
    base_asset: String,
    network: String,
    fetcher: EventFetcher,
    scheduler: KeeperScheduler,
    telemetry: Arc<dyn Telemetry>,
    state: MarketState,
    pipeline: PipelineConfig,
}

impl KeeperEngine {
    pub fn new(
        config: &KeeperConfig,
        network: impl Into<String>,
        base_asset: impl Into<String>,
        market: Arc<dyn MarketClient>,
        signers: Arc<SignerPool>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let executor = LiquidationExecutor::new(market.clone(), signers, telemetry.clone());
        Self {
            fetcher: EventFetcher::new(market.clone(), config.indexer.fetch_warn_threshold),
            scheduler: KeeperScheduler::new(executor, telemetry.clone(), &config.scheduler),
            state: MarketState::new(VolumeWindow::new(config.indexer.volume_window())),
            pipeline: config.pipeline.clone(),
            base_asset: base_asset.into(),
            network: network.into(),
            market,
            telemetry,
        }
    }

    pub fn base_asset(&self) -> &str {
        &self.base_asset
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn state(&self) -> &MarketState {
        &self.state
    }

    /// Rebuild the index from `from` to the current head, then run one
    /// liquidation pass.
    #[instrument(skip(self), fields(asset = %self.base_asset))]
    pub async fn bootstrap(&mut self, from: BlockRef) -> anyhow::Result<PassSummary> {
        let latest = self.market.latest_block().await.context("eth_blockNumber")?;
        let start = match from {
            BlockRef::Number(n) => n,
            BlockRef::Latest => latest,
        };
        let events = if start > latest {
            warn!(from = start, latest = latest, "Start block is ahead of chain head, nothing to backfill");
            Vec::new()
        } else {
            info!(from = start, to = latest, "Backfilling market events");
            self.fetcher
                .fetch(BlockRef::Number(start), BlockRef::Number(latest))
                .await?
        };
        let summary = self.apply(&events).await;
        self.state.tip.number = self.state.tip.number.max(latest);
        info!(
            events = events.len(),
            positions = self.state.positions.len(),
            liquidated = summary.liquidated,
            tip = self.state.tip.number,
            chain_time = ?self.state.tip.time(),
            "Backfill complete"
        );

        Ok(self.scheduler.run_keepers(&self.state.positions).await)
    }

    /// Bootstrap, then process blocks from `queue` until it closes.
    pub async fn run(mut self, from: BlockRef, queue: BlockReceiver) -> anyhow::Result<()> {
        self.bootstrap(from).await?;
        let pipeline = self.pipeline.clone();
        consume_blocks(queue, &mut self, &pipeline).await;
        warn!(asset = %self.base_asset, "Keeper engine stopped");
        Ok(())
    }

    async fn apply(&mut self, events: &[OrderedEvent]) -> ApplySummary {
        let summary = self.state.apply_events(events, self.telemetry.as_ref());
        self.state
            .publish_open_interest(self.market.as_ref(), self.telemetry.as_ref())
            .await;
        summary
    }

    /// Fetch and apply every block after the tip up to and including
    /// `number`. Nothing is mutated until every read has succeeded, so a
    /// failed range can be retried as is.
    async fn index_through(&mut self, number: u64) -> Result<(), KeeperError> {
        let from = self.state.tip.number.saturating_add(1).min(number);
        let events = self
            .fetcher
            .fetch(BlockRef::Number(from), BlockRef::Number(number))
            .await?;

        let has_funding = events
            .iter()
            .any(|e| matches!(e.event, MarketEvent::FundingRecomputed { .. }));
        if !has_funding {
            let timestamp = self
                .market
                .block_timestamp(number)
                .await
                .map_err(|source| KeeperError::BlockTimestamp { block: number, source })?;
            self.state.tip.timestamp = self.state.tip.timestamp.max(timestamp);
        }

        let summary = self.apply(&events).await;
        self.state.tip.number = number;
        debug!(
            from = from,
            to = number,
            events = events.len(),
            upserted = summary.upserted,
            closed = summary.closed,
            liquidated = summary.liquidated,
            chain_time = ?self.state.tip.time(),
            "Blocks indexed"
        );
        Ok(())
    }
}

#[async_trait]
impl BlockHandler for KeeperEngine {
    fn tip(&self) -> u64 {
        self.state.tip.number
    }

    #[instrument(skip(self), fields(asset = %self.base_asset))]
    async fn catch_up(&mut self, number: u64) -> Result<(), KeeperError> {
        if number > self.state.tip.number {
            info!(from = self.state.tip.number + 1, to = number, "Indexing blocks past backfill");
            self.index_through(number).await?;
        }
        Ok(())
    }

    /// Liquidation pass first, then index the block.
    #[instrument(skip(self), fields(asset = %self.base_asset))]
    async fn process_block(&mut self, number: u64) -> Result<(), KeeperError> {
        self.scheduler.run_keepers(&self.state.positions).await;
        self.index_through(number).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_point::units;
    use crate::pipeline::block_queue;
    use crate::telemetry::{Counter, Gauge, RecordingTelemetry};
    use crate::testing::{account, funding, liquidated, modified, MockMarket, MockSigner};
    use keeper_chain::LiquidationSigner;
    use rust_decimal::Decimal;
    use std::sync::atomic::Ordering;

    struct Harness {
        market: Arc<MockMarket>,
        signer: Arc<MockSigner>,
        telemetry: Arc<RecordingTelemetry>,
        engine: KeeperEngine,
    }

    async fn harness(events: Vec<OrderedEvent>, latest: u64) -> Harness {
        let market = Arc::new(MockMarket::with_events(events));
        market.set_latest(latest);
        market.set_price(Some(units(2)));
        let signer = Arc::new(MockSigner::new(0x51));
        let telemetry = Arc::new(RecordingTelemetry::new());
        let signers: Vec<Arc<dyn LiquidationSigner>> = vec![signer.clone()];

        let base_asset = market.base_asset().await.unwrap();
        let engine = KeeperEngine::new(
            &KeeperConfig::default(),
            "goerli-ovm",
            base_asset,
            market.clone(),
            Arc::new(SignerPool::new(signers)),
            telemetry.clone(),
        );

        Harness {
            market,
            signer,
            telemetry,
            engine,
        }
    }

    #[tokio::test]
    async fn test_engine_labels() {
        let h = harness(Vec::new(), 1).await;
        assert_eq!(h.engine.base_asset(), "sETH");
        assert_eq!(h.engine.network(), "goerli-ovm");
    }

    #[tokio::test]
    async fn test_bootstrap_backfills_and_keeps() {
        let mut h = harness(
            vec![
                funding(1_000, (5, 0, 0)),
                modified(1, 10, 1, 2, (5, 1, 0)),
                modified(2, -3, 1, 2, (6, 0, 0)),
                liquidated(2, (7, 0, 0)),
            ],
            8,
        )
        .await;
        h.market.make_eligible(account(1));

        let pass = h.engine.bootstrap(BlockRef::Number(1)).await.unwrap();

        let state = h.engine.state();
        assert_eq!(state.tip.number, 8);
        assert_eq!(state.positions.len(), 1);
        assert_eq!(state.positions.get(&account(1)).unwrap().leverage, Decimal::from(20));
        assert_eq!(pass.positions, 1);
        assert_eq!(*h.signer.submitted.lock(), vec![account(1)]);
        assert_eq!(h.telemetry.count(Counter::LiquidationsTotal), 1);
        assert_eq!(h.telemetry.gauge(Gauge::MarketSize), Some(20.0));
    }

    #[tokio::test]
    async fn test_bootstrap_from_latest() {
        let mut h = harness(vec![modified(1, 1, 1, 1, (3, 0, 0))], 9).await;

        h.engine.bootstrap(BlockRef::Latest).await.unwrap();
        assert!(h.engine.state().positions.is_empty());
        assert_eq!(h.engine.tip(), 9);
    }

    #[tokio::test]
    async fn test_process_block_uses_block_timestamp_without_funding() {
        let mut h = harness(vec![modified(1, 4, 1, 2, (11, 0, 0))], 10).await;
        h.market.set_timestamp(11, 5_000);
        h.engine.bootstrap(BlockRef::Number(1)).await.unwrap();

        h.engine.process_block(11).await.unwrap();

        let state = h.engine.state();
        assert_eq!(state.tip, crate::indexer::BlockTip { number: 11, timestamp: 5_000 });
        assert_eq!(state.volume.samples().next().unwrap().timestamp, 5_000);
        assert_eq!(h.telemetry.gauge(Gauge::RecentVolume), Some(8.0));
    }

    #[tokio::test]
    async fn test_process_block_prefers_funding_timestamp() {
        let mut h = harness(
            vec![funding(7_000, (11, 0, 0)), modified(1, 4, 1, 2, (11, 0, 1))],
            10,
        )
        .await;
        h.engine.bootstrap(BlockRef::Number(1)).await.unwrap();

        // no block timestamp configured: a getBlock call would fail
        h.engine.process_block(11).await.unwrap();
        assert_eq!(h.engine.state().tip.timestamp, 7_000);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_state_untouched() {
        let mut h = harness(vec![modified(1, 4, 1, 2, (11, 0, 0))], 10).await;
        h.market.set_timestamp(11, 5_000);
        h.engine.bootstrap(BlockRef::Number(1)).await.unwrap();
        h.market.failing_queries.store(1, Ordering::SeqCst);

        assert!(h.engine.process_block(11).await.is_err());
        assert_eq!(h.engine.tip(), 10);
        assert!(h.engine.state().positions.is_empty());

        h.engine.process_block(11).await.unwrap();
        assert_eq!(h.engine.state().positions.len(), 1);
    }

    #[tokio::test]
    async fn test_first_head_past_backfill_is_indexed() {
        let mut h = harness(vec![modified(1, 4, 1, 2, (11, 0, 0))], 10).await;
        h.market.set_timestamp(11, 110);
        h.market.set_timestamp(12, 120);
        h.engine.bootstrap(BlockRef::Number(1)).await.unwrap();
        assert!(h.engine.state().positions.is_empty());

        let (tx, rx) = block_queue();
        tx.send(11).unwrap();
        tx.send(12).unwrap();
        drop(tx);
        consume_blocks(rx, &mut h.engine, &PipelineConfig::default()).await;

        assert_eq!(h.engine.tip(), 12);
        assert!(h.engine.state().positions.contains(&account(1)));
    }

    #[tokio::test]
    async fn test_catch_up_at_tip_is_noop() {
        let mut h = harness(Vec::new(), 10).await;
        h.engine.bootstrap(BlockRef::Number(1)).await.unwrap();
        let queries = h.market.query_calls.load(Ordering::SeqCst);

        h.engine.catch_up(10).await.unwrap();
        assert_eq!(h.market.query_calls.load(Ordering::SeqCst), queries);
        assert_eq!(h.engine.tip(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_given_up_block_is_indexed_by_next_block() {
        let mut h = harness(vec![modified(1, 4, 1, 2, (12, 0, 0))], 11).await;
        h.market.set_timestamp(12, 120);
        h.market.set_timestamp(13, 130);
        h.engine.bootstrap(BlockRef::Number(1)).await.unwrap();
        // every eth_getLogs for block 12 fails
        h.market.failing_queries.store(u32::MAX, Ordering::SeqCst);

        let (tx, rx) = block_queue();
        tx.send(11).unwrap();
        tx.send(12).unwrap();
        drop(tx);
        consume_blocks(rx, &mut h.engine, &PipelineConfig::default()).await;
        assert_eq!(h.engine.tip(), 11);
        assert!(h.engine.state().positions.is_empty());

        h.market.failing_queries.store(0, Ordering::SeqCst);
        h.engine.process_block(13).await.unwrap();

        assert_eq!(h.engine.tip(), 13);
        assert!(h.engine.state().positions.contains(&account(1)));
        assert_eq!(h.engine.state().tip.timestamp, 130);
    }

    #[tokio::test]
    async fn test_bootstrap_fails_on_fetch_error() {
        let mut h = harness(Vec::new(), 4).await;
        h.market.failing_queries.store(1, Ordering::SeqCst);

        assert!(h.engine.bootstrap(BlockRef::Number(1)).await.is_err());
        assert_eq!(h.engine.tip(), 0);
    }

    #[tokio::test]
    async fn test_run_processes_queue() {
        let h = harness(
            vec![
                modified(1, 4, 1, 2, (12, 0, 0)),
                modified(2, 6, 1, 2, (13, 0, 0)),
            ],
            10,
        )
        .await;
        h.market.set_timestamp(11, 90);
        h.market.set_timestamp(12, 100);
        h.market.set_timestamp(13, 112);

        let (tx, rx) = block_queue();
        // 11 is the liveness marker, 10 is stale
        for block in [11, 10, 12, 13] {
            tx.send(block).unwrap();
        }
        drop(tx);

        h.engine.run(BlockRef::Number(1), rx).await.unwrap();
        assert_eq!(h.telemetry.gauge(Gauge::OpenPositions), Some(1.0));
        assert_eq!(h.telemetry.gauge(Gauge::MarketSize), Some(20.0));
    }
}
