//! Provider management for HTTP and WebSocket connections.
//! Uses Alloy providers for type-safe RPC interactions.

use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use anyhow::Result;
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use tracing::{debug, info};

/// Stream of new block numbers from a head subscription.
pub type BlockStream = Pin<Box<dyn Stream<Item = u64> + Send>>;

/// Connection endpoints for one chain.
#[derive(Debug, Clone)]
pub struct ProviderManager {
    /// HTTP URL for reads, log queries and transaction submission
    http_url: String,
    /// WebSocket URL for head subscriptions
    ws_url: String,
}

impl ProviderManager {
    /// Create a provider manager and verify the HTTP endpoint answers.
    pub async fn new(http_url: &str, ws_url: &str) -> Result<Self> {
        info!(http = http_url, ws = ws_url, "Initializing provider manager");

        let manager = Self {
            http_url: http_url.to_string(),
            ws_url: ws_url.to_string(),
        };

        let block = manager.http()?.get_block_number().await?;
        let chain_id = manager.http()?.get_chain_id().await?;
        info!(block = block, chain_id = chain_id, "Provider connection verified");

        Ok(manager)
    }

    /// Build an HTTP provider.
    pub fn http(&self) -> Result<impl Provider + Clone + 'static> {
        Ok(ProviderBuilder::new().on_http(self.http_url.parse()?))
    }

    /// Subscribe to new block headers.
    /// Returns a stream of block numbers.
    pub async fn subscribe_new_heads(&self) -> Result<BlockStream> {
        info!(ws_url = %self.ws_url, "Subscribing to new block headers");

        let ws = WsConnect::new(&self.ws_url);
        let provider = ProviderBuilder::new().on_ws(ws).await?;
        info!("WebSocket connected for new block headers");

        let sub = provider.subscribe_blocks().await?;
        let inner_stream = sub.into_stream();

        // The provider must live in the stream state or the socket closes.
        let block_stream = futures::stream::unfold(
            (provider, inner_stream),
            |(provider, mut stream)| async move {
                let header = stream.next().await?;
                debug!(block = header.number, "New head");
                Some((header.number, (provider, stream)))
            },
        );

        Ok(Box::pin(block_stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires network
    async fn test_provider_creation() {
        let provider =
            ProviderManager::new("https://mainnet.optimism.io", "wss://optimism.publicnode.com")
                .await;

        assert!(provider.unwrap().http().is_ok());
    }
}
