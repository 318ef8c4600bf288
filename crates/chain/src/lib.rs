//! Keeper chain interaction layer.
//!
//! This crate provides:
//! - Contract bindings for the futures market
//! - Event decoding and canonical `(block, tx, log)` ordering
//! - The `MarketClient` read seam and its Alloy implementation
//! - Provider management and new-head subscriptions
//! - Transaction signing, nonce tracking and the signer pool

pub mod contracts;
mod events;
mod market;
mod provider;
mod signer;

pub use contracts::{parse_bytes32_string, IFuturesMarket};
pub use events::{sort_canonical, EventKind, MarketEvent, OrderedEvent};
pub use market::{BlockRef, MarketClient, RpcMarketClient};
pub use provider::{BlockStream, ProviderManager};
pub use signer::{
    classify_send_error, LiquidationSigner, NonceManager, PoolError, SignerPool, Submission,
    SubmitError, WalletSigner, WalletSignerBuilder,
};
