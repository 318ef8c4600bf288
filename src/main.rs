//! Futures Liquidation Keeper
//!
//! Keeper bot for perpetual futures markets on an EVM chain.
//! Features:
//! - Position index rebuilt from market events on every start
//! - Event-driven block pipeline via WebSocket new-head subscriptions
//! - Leverage-prioritized, paced liquidation passes
//! - Shared HD-wallet signer pool across markets
//! - Volume and open-interest telemetry per market

use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keeper_chain::{
    BlockRef, LiquidationSigner, MarketClient, ProviderManager, RpcMarketClient, SignerPool,
    WalletSignerBuilder,
};
use keeper_core::{block_queue, forward_blocks, KeeperConfig, KeeperEngine, MetricsTelemetry};

/// Environment variable names.
mod env {
    pub const PROVIDER_URL: &str = "PROVIDER_URL";
    pub const WS_URL: &str = "WS_URL";
    pub const MNEMONIC: &str = "ETH_HDWALLET_MNEMONIC";
    pub const NUM_ACCOUNTS: &str = "NUM_ACCOUNTS";
    pub const NETWORK: &str = "NETWORK";
    pub const FROM_BLOCK: &str = "FROM_BLOCK";
    pub const MARKETS: &str = "MARKETS";
}

#[tokio::main]
async fn main() -> Result<()> {
    // Print startup banner
    print_banner();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,keeper_core=debug,keeper_chain=debug")),
        )
        .init();

    // KEEPER_CONFIG (TOML path) or KEEPER_PROFILE: testing, production
    let keeper_config = KeeperConfig::from_env()?;
    keeper_config.log_config();

    let config = load_config()?;
    info!(
        network = %config.network,
        markets = config.markets.len(),
        from_block = %config.from_block,
        "Starting futures keeper"
    );

    let provider = ProviderManager::new(&config.http_url, &config.ws_url).await?;
    let signers = build_signer_pool(&config, &keeper_config).await?;

    // One engine per market, all fed from a single head subscription
    let mut engines = JoinSet::new();
    let mut queues = Vec::with_capacity(config.markets.len());
    for address in &config.markets {
        let market: Arc<dyn MarketClient> = Arc::new(RpcMarketClient::new(provider.http()?, *address));
        let base_asset = market
            .base_asset()
            .await
            .with_context(|| format!("baseAsset() on market {address}"))?;
        let telemetry = Arc::new(MetricsTelemetry::new(base_asset.as_str(), config.network.as_str()));

        let engine = KeeperEngine::new(
            &keeper_config,
            config.network.as_str(),
            base_asset.as_str(),
            market,
            signers.clone(),
            telemetry,
        );
        info!(market = %address, asset = %base_asset, "Keeper engine configured");

        let (tx, rx) = block_queue();
        queues.push(tx);
        engines.spawn(engine.run(config.from_block, rx));
    }

    let heads = provider.clone();
    let forwarder = tokio::spawn(forward_blocks(
        move || {
            let heads = heads.clone();
            async move { heads.subscribe_new_heads().await }
        },
        queues,
        keeper_config.pipeline.resubscribe_delay(),
    ));

    let result = tokio::select! {
        result = supervise(&mut engines) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    forwarder.abort();
    engines.shutdown().await;
    result
}

/// Wait for engines; the first engine error is fatal.
async fn supervise(engines: &mut JoinSet<Result<()>>) -> Result<()> {
    while let Some(joined) = engines.join_next().await {
        match joined {
            Ok(Ok(())) => warn!("Keeper engine exited"),
            Ok(Err(e)) => {
                error!(error = %e, "Keeper engine failed");
                return Err(e);
            }
            Err(e) => return Err(anyhow::anyhow!("keeper engine task panicked: {e}")),
        }
    }
    Ok(())
}

/// Configuration loaded from environment.
struct Config {
    http_url: String,
    ws_url: String,
    mnemonic: String,
    num_accounts: u32,
    network: String,
    from_block: BlockRef,
    markets: Vec<Address>,
}

fn load_config() -> Result<Config> {
    let get_env = |name: &str| -> Result<String> {
        std::env::var(name).map_err(|_| anyhow::anyhow!("Missing env var: {}", name))
    };

    let num_accounts = match std::env::var(env::NUM_ACCOUNTS) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", env::NUM_ACCOUNTS, e))?,
        Err(_) => 1,
    };
    let from_block = match std::env::var(env::FROM_BLOCK) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid {}: {}", env::FROM_BLOCK, e))?,
        Err(_) => BlockRef::Number(1),
    };

    let http_url = get_env(env::PROVIDER_URL)?;
    let ws_url = get_env(env::WS_URL).unwrap_or_else(|_| http_url.replacen("http", "ws", 1));

    Ok(Config {
        mnemonic: get_env(env::MNEMONIC)?,
        network: get_env(env::NETWORK).unwrap_or_else(|_| "goerli-ovm".to_string()),
        markets: parse_markets(&get_env(env::MARKETS)?)?,
        http_url,
        ws_url,
        num_accounts,
        from_block,
    })
}

fn parse_markets(raw: &str) -> Result<Vec<Address>> {
    let markets = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Address>()
                .map_err(|e| anyhow::anyhow!("Invalid market address {}: {}", s, e))
        })
        .collect::<Result<Vec<_>>>()?;
    anyhow::ensure!(!markets.is_empty(), "{} lists no markets", env::MARKETS);
    Ok(markets)
}

async fn build_signer_pool(config: &Config, keeper_config: &KeeperConfig) -> Result<Arc<SignerPool>> {
    anyhow::ensure!(config.num_accounts > 0, "{} must be at least 1", env::NUM_ACCOUNTS);

    let signers = WalletSignerBuilder::new(config.http_url.as_str())
        .gas_limit(keeper_config.signer.gas_limit)
        .gas_price_multiplier(keeper_config.signer.gas_price_multiplier)
        .build_from_mnemonic(&config.mnemonic, config.num_accounts)
        .await
        .context("failed to derive keeper accounts")?;

    let signers: Vec<Arc<dyn LiquidationSigner>> = signers
        .into_iter()
        .map(|s| Arc::new(s) as Arc<dyn LiquidationSigner>)
        .collect();
    let pool = SignerPool::new(signers);
    info!(accounts = ?pool.addresses(), "Signer pool ready");

    Ok(Arc::new(pool))
}

/// Print startup banner.
fn print_banner() {
    println!(r#"
    ╔═╗┬ ┬┌┬┐┬ ┬┬─┐┌─┐┌─┐  ╦╔═┌─┐┌─┐┌─┐┌─┐┬─┐
    ╠╣ │ │ │ │ │├┬┘├┤ └─┐  ╠╩╗├┤ ├┤ ├─┘├┤ ├┬┘
    ╚  └─┘ ┴ └─┘┴└─└─┘└─┘  ╩ ╩└─┘└─┘┴  └─┘┴└─
    Liquidation Keeper v0.1.0
    "#);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_markets() {
        let markets = parse_markets(
            "0x0000000000000000000000000000000000000001, 0x0000000000000000000000000000000000000002,",
        )
        .unwrap();
        assert_eq!(markets.len(), 2);

        assert!(parse_markets("").is_err());
        assert!(parse_markets("not-an-address").is_err());
    }
}
