//! Contract bindings for the futures market.
//!
//! Only the subset of the market ABI the keeper touches: the read-only
//! views used for pricing and eligibility, the liquidation entry point,
//! and the three events the index is rebuilt from.

use alloy::sol;

sol! {
    /// Futures market interface (subset used by the keeper).
    #[sol(rpc)]
    #[derive(Debug)]
    interface IFuturesMarket {
        event PositionModified(
            uint256 indexed id,
            address indexed account,
            uint256 margin,
            int256 size,
            int256 tradeSize,
            uint256 lastPrice,
            uint256 fundingIndex,
            uint256 fee
        );

        event PositionLiquidated(
            uint256 indexed id,
            address indexed account,
            address indexed liquidator,
            int256 size,
            uint256 price,
            uint256 fee
        );

        event FundingRecomputed(int256 funding, uint256 index, uint256 timestamp);

        function baseAsset() external view returns (bytes32 key);

        function assetPrice() external view returns (uint256 price, bool invalid);

        function canLiquidate(address account) external view returns (bool);

        function liquidatePosition(address account) external;
    }
}

/// Decode a `bytes32` asset key (e.g. `sETH`) into a string, dropping the
/// zero padding.
pub fn parse_bytes32_string(key: &[u8; 32]) -> String {
    let end = key.iter().position(|b| *b == 0).unwrap_or(key.len());
    String::from_utf8_lossy(&key[..end]).into_owned()
}
