//! Liquidation execution.
//!
//! Eligibility is decided entirely on-chain by `canLiquidate`; the executor
//! only submits when it answers true.

use alloy::primitives::{Address, U256};
use keeper_chain::{MarketClient, SignerPool, Submission};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

use crate::error::KeeperError;
use crate::telemetry::{Counter, Telemetry};

/// Result of one liquidation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiquidationOutcome {
    /// `canLiquidate` returned false.
    Ineligible,
    /// A `liquidatePosition` transaction was mined (possibly reverted).
    Submitted(Submission),
}

/// Submits liquidations for one market through the shared signer pool.
#[derive(Clone)]
pub struct LiquidationExecutor {
    market: Arc<dyn MarketClient>,
    signers: Arc<SignerPool>,
    telemetry: Arc<dyn Telemetry>,
}

impl LiquidationExecutor {
    pub fn new(
        market: Arc<dyn MarketClient>,
        signers: Arc<SignerPool>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            market,
            signers,
            telemetry,
        }
    }

    /// Liquidate `account` if the market reports it eligible.
    ///
    /// A nonce-expired rejection resyncs the signer's nonce from chain state
    /// and is still returned as an error; the position is retried on the next
    /// keeper pass.
    #[instrument(skip(self), fields(id = %id, account = %account))]
    pub async fn liquidate(&self, id: U256, account: Address) -> Result<LiquidationOutcome, KeeperError> {
        let eligible = self
            .market
            .can_liquidate(account)
            .await
            .map_err(KeeperError::Eligibility)?;
        if !eligible {
            debug!("Position not liquidatable");
            return Ok(LiquidationOutcome::Ineligible);
        }

        info!("Position liquidatable, submitting");
        let market = self.market.address();
        let submission = self
            .signers
            .with_signer(|signer| async move {
                match signer.liquidate_position(market, account).await {
                    Err(e) if e.is_nonce_expired() => {
                        match signer.refresh_nonce().await {
                            Ok(nonce) => warn!(
                                signer = %signer.address(),
                                nonce = nonce,
                                "Nonce expired, resynced from chain"
                            ),
                            Err(refresh) => error!(
                                signer = %signer.address(),
                                error = %refresh,
                                "Nonce expired and resync failed"
                            ),
                        }
                        Err(KeeperError::Submit(e))
                    }
                    other => other.map_err(KeeperError::from),
                }
            })
            .await?;

        self.telemetry.increment(Counter::LiquidationsSubmitted);
        info!(
            block = ?submission.block_number,
            success = submission.success,
            tx_hash = %submission.tx_hash,
            gas_used = submission.gas_used,
            signer = %submission.signer,
            nonce = submission.nonce,
            "Liquidation transaction mined"
        );

        Ok(LiquidationOutcome::Submitted(submission))
    }
}
