//! Transaction signing for liquidations.
//! Uses Alloy providers for type-safe RPC interactions.
//!
//! - [`NonceManager`]: locally tracked nonce, no RPC call per transaction
//! - [`WalletSigner`]: one local key submitting `liquidatePosition`
//! - [`SignerPool`]: exclusive leases over a set of signers, so two
//!   concurrent liquidations never race on the same nonce

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info};

use crate::contracts::IFuturesMarket;

/// Node error fragments that mean the nonce we used is already spent.
const NONCE_EXPIRED_MESSAGES: &[&str] = &[
    "nonce too low",
    "nonce has already been used",
    "nonce expired",
];

/// Default gas limit for `liquidatePosition`.
const DEFAULT_LIQUIDATION_GAS_LIMIT: u64 = 1_500_000;

/// Errors from the signer pool itself.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("signer pool has no signers")]
    Empty,
    #[error("signer pool closed")]
    Closed,
}

/// Liquidation submission failure.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The node rejected the transaction because its nonce is already used.
    #[error("nonce expired: {0}")]
    NonceExpired(String),
    #[error(transparent)]
    Rpc(#[from] anyhow::Error),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl SubmitError {
    pub fn is_nonce_expired(&self) -> bool {
        matches!(self, Self::NonceExpired(_))
    }
}

/// Classify a transaction send failure.
pub fn classify_send_error<E>(err: E) -> SubmitError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = err.to_string();
    let lower = message.to_lowercase();
    if NONCE_EXPIRED_MESSAGES.iter().any(|m| lower.contains(m)) {
        SubmitError::NonceExpired(message)
    } else {
        SubmitError::Rpc(err.into())
    }
}

/// Outcome of a mined liquidation transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub tx_hash: B256,
    pub block_number: Option<u64>,
    /// Receipt status; `false` means the transaction reverted.
    pub success: bool,
    pub gas_used: u64,
    pub nonce: u64,
    pub signer: Address,
}

/// A key that can submit liquidations.
#[async_trait]
pub trait LiquidationSigner: Send + Sync {
    /// Signer address.
    fn address(&self) -> Address;

    /// Submit `liquidatePosition(account)` to `market` and wait for one confirmation.
    async fn liquidate_position(
        &self,
        market: Address,
        account: Address,
    ) -> Result<Submission, SubmitError>;

    /// Reload the tracked nonce from the chain's latest transaction count.
    async fn refresh_nonce(&self) -> anyhow::Result<u64>;
}

/// Cached nonce manager for fast transaction submission.
/// Avoids RPC calls by tracking nonce locally with atomic operations.
pub struct NonceManager {
    /// Next nonce to hand out (atomically incremented)
    current: AtomicU64,
}

impl NonceManager {
    /// Create new nonce manager with initial value from chain.
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_nonce),
        }
    }

    /// Get next nonce and increment counter.
    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    /// Get current nonce without incrementing.
    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Hand back a nonce that was reserved but never broadcast.
    /// Only the most recent reservation can be released.
    pub fn release(&self, nonce: u64) -> bool {
        self.current
            .compare_exchange(nonce + 1, nonce, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Reset nonce to chain value.
    pub fn reset(&self, chain_nonce: u64) {
        self.current.store(chain_nonce, Ordering::SeqCst);
    }
}

/// Local-key liquidation signer.
pub struct WalletSigner {
    /// RPC URL for sending transactions
    rpc_url: String,
    /// Signer wallet
    wallet: EthereumWallet,
    /// Signer address
    address: Address,
    /// Chain ID
    chain_id: u64,
    /// Cached nonce manager
    nonce_manager: NonceManager,
    /// Gas limit for liquidations
    gas_limit: u64,
    /// Multiplier applied to the node's gas price
    gas_price_multiplier: f64,
}

/// Builder for [`WalletSigner`].
pub struct WalletSignerBuilder {
    rpc_url: String,
    gas_limit: u64,
    gas_price_multiplier: f64,
}

impl WalletSignerBuilder {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            gas_limit: DEFAULT_LIQUIDATION_GAS_LIMIT,
            gas_price_multiplier: 1.0,
        }
    }

    /// Set a custom gas limit.
    pub fn gas_limit(mut self, limit: u64) -> Self {
        self.gas_limit = limit;
        self
    }

    /// Scale the node-reported gas price.
    pub fn gas_price_multiplier(mut self, multiplier: f64) -> Self {
        self.gas_price_multiplier = multiplier;
        self
    }

    /// Build a signer for one key, fetching chain id and starting nonce.
    pub async fn build(&self, signer: PrivateKeySigner) -> anyhow::Result<WalletSigner> {
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let provider = ProviderBuilder::new().on_http(self.rpc_url.parse()?);
        let chain_id = provider.get_chain_id().await?;
        let initial_nonce = provider.get_transaction_count(address).await?;

        info!(
            address = %address,
            chain_id = chain_id,
            initial_nonce = initial_nonce,
            "Wallet signer initialized"
        );

        Ok(WalletSigner {
            rpc_url: self.rpc_url.clone(),
            wallet,
            address,
            chain_id,
            nonce_manager: NonceManager::new(initial_nonce),
            gas_limit: self.gas_limit,
            gas_price_multiplier: self.gas_price_multiplier,
        })
    }

    /// Build `count` signers from consecutive HD wallet indices of a mnemonic.
    pub async fn build_from_mnemonic(
        &self,
        phrase: &str,
        count: u32,
    ) -> anyhow::Result<Vec<WalletSigner>> {
        let mut signers = Vec::with_capacity(count as usize);
        for index in 0..count {
            let key = MnemonicBuilder::<English>::default()
                .phrase(phrase)
                .index(index)?
                .build()?;
            signers.push(self.build(key).await?);
        }
        Ok(signers)
    }
}

impl WalletSigner {
    fn provider(&self) -> anyhow::Result<impl Provider> {
        Ok(ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(self.rpc_url.parse()?))
    }

    async fn gas_price(&self, provider: &impl Provider) -> anyhow::Result<u128> {
        let base = provider.get_gas_price().await?;
        Ok((base as f64 * self.gas_price_multiplier) as u128)
    }
}

#[async_trait]
impl LiquidationSigner for WalletSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn liquidate_position(
        &self,
        market: Address,
        account: Address,
    ) -> Result<Submission, SubmitError> {
        let start = Instant::now();
        let provider = self.provider()?;
        let gas_price = self.gas_price(&provider).await?;

        let calldata = IFuturesMarket::liquidatePositionCall { account }.abi_encode();
        let nonce = self.nonce_manager.next();

        let tx = TransactionRequest::default()
            .with_to(market)
            .with_input(calldata)
            .with_nonce(nonce)
            .with_gas_limit(self.gas_limit)
            .with_gas_price(gas_price)
            .with_chain_id(self.chain_id);

        let pending = match provider.send_transaction(tx).await {
            Ok(pending) => pending,
            Err(e) => {
                let err = classify_send_error(e);
                // Nothing was broadcast, so the reserved nonce is still free.
                if !err.is_nonce_expired() && self.nonce_manager.release(nonce) {
                    debug!(signer = %self.address, nonce = nonce, "Released unused nonce");
                }
                return Err(err);
            }
        };
        let tx_hash = *pending.tx_hash();

        debug!(
            signer = %self.address,
            tx_hash = %tx_hash,
            nonce = nonce,
            submit_ms = start.elapsed().as_millis(),
            "Submitted liquidatePosition, waiting for confirmation"
        );

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| SubmitError::Rpc(e.into()))?;

        Ok(Submission {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            success: receipt.status(),
            gas_used: receipt.gas_used as u64,
            nonce,
            signer: self.address,
        })
    }

    async fn refresh_nonce(&self) -> anyhow::Result<u64> {
        let chain_nonce = self.provider()?.get_transaction_count(self.address).await?;
        let previous = self.nonce_manager.current();
        self.nonce_manager.reset(chain_nonce);
        info!(
            signer = %self.address,
            previous = previous,
            nonce = chain_nonce,
            "Nonce refreshed from chain"
        );
        Ok(chain_nonce)
    }
}

impl std::fmt::Debug for WalletSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSigner")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .finish_non_exhaustive()
    }
}

/// Pool of signers handed out one at a time.
///
/// A signer is leased to exactly one caller for the duration of
/// [`SignerPool::with_signer`] and returned when the closure's future settles
/// or is dropped. Signers rotate round-robin.
pub struct SignerPool {
    idle: Mutex<VecDeque<Arc<dyn LiquidationSigner>>>,
    permits: Semaphore,
    addresses: Vec<Address>,
}

impl SignerPool {
    pub fn new(signers: Vec<Arc<dyn LiquidationSigner>>) -> Self {
        let addresses = signers.iter().map(|s| s.address()).collect();
        Self {
            permits: Semaphore::new(signers.len()),
            idle: Mutex::new(signers.into()),
            addresses,
        }
    }

    /// Total number of signers.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Signers not currently leased.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Addresses of all signers, including leased ones.
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// Borrow one signer exclusively for the duration of `f`.
    pub async fn with_signer<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(Arc<dyn LiquidationSigner>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<PoolError>,
    {
        let lease = self.acquire().await?;
        f(lease.signer.clone()).await
    }

    async fn acquire(&self) -> Result<Lease<'_>, PoolError> {
        if self.is_empty() {
            return Err(PoolError::Empty);
        }
        let permit = self.permits.acquire().await.map_err(|_| PoolError::Closed)?;
        let signer = self.idle.lock().pop_front().ok_or(PoolError::Empty)?;
        Ok(Lease {
            pool: self,
            signer,
            _permit: permit,
        })
    }
}

/// Returns its signer to the pool before the permit is released.
struct Lease<'a> {
    pool: &'a SignerPool,
    signer: Arc<dyn LiquidationSigner>,
    _permit: SemaphorePermit<'a>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.pool.idle.lock().push_back(self.signer.clone());
    }
}
