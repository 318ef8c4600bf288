//! Keeper error types.

use keeper_chain::{EventKind, SubmitError};

/// A log query for one event kind failed.
#[derive(Debug, thiserror::Error)]
#[error("failed to fetch {kind} events")]
pub struct FetchError {
    pub kind: EventKind,
    #[source]
    pub source: anyhow::Error,
}

/// Errors from processing one block or one liquidation attempt.
#[derive(Debug, thiserror::Error)]
pub enum KeeperError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("canLiquidate call failed: {0}")]
    Eligibility(#[source] anyhow::Error),
    #[error("liquidation submission failed: {0}")]
    Submit(#[from] SubmitError),
    #[error("block {block} timestamp unavailable: {source}")]
    BlockTimestamp {
        block: u64,
        #[source]
        source: anyhow::Error,
    },
}

impl From<keeper_chain::PoolError> for KeeperError {
    fn from(err: keeper_chain::PoolError) -> Self {
        Self::Submit(SubmitError::Pool(err))
    }
}
