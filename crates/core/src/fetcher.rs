//! Event fetching over a block range.

use futures::future::try_join_all;
use keeper_chain::{sort_canonical, BlockRef, EventKind, MarketClient, OrderedEvent};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Queries every [`EventKind`] over one range and merges the results into
/// canonical order.
#[derive(Clone)]
pub struct EventFetcher {
    market: Arc<dyn MarketClient>,
    warn_threshold: usize,
}

impl EventFetcher {
    pub fn new(market: Arc<dyn MarketClient>, warn_threshold: usize) -> Self {
        Self {
            market,
            warn_threshold,
        }
    }

    /// Fetch all events of interest in `from..=to`.
    ///
    /// The per-kind queries run concurrently; the first failure aborts the
    /// fetch.
    pub async fn fetch(&self, from: BlockRef, to: BlockRef) -> Result<Vec<OrderedEvent>, FetchError> {
        let queries = EventKind::ALL
            .into_iter()
            .map(|kind| self.fetch_kind(kind, from, to));
        let batches = try_join_all(queries).await?;

        let mut events: Vec<OrderedEvent> = batches.into_iter().flatten().collect();
        sort_canonical(&mut events);

        debug!(from = %from, to = %to, count = events.len(), "Fetched market events");
        Ok(events)
    }

    async fn fetch_kind(
        &self,
        kind: EventKind,
        from: BlockRef,
        to: BlockRef,
    ) -> Result<Vec<OrderedEvent>, FetchError> {
        let events = self
            .market
            .query_events(kind, from, to)
            .await
            .map_err(|source| FetchError { kind, source })?;

        // Providers commonly cap eth_getLogs results; a large page may be truncated.
        if events.len() > self.warn_threshold {
            warn!(
                kind = %kind,
                count = events.len(),
                threshold = self.warn_threshold,
                from = %from,
                to = %to,
                "Event query returned more logs than expected, results may be incomplete"
            );
        }
        Ok(events)
    }
}
