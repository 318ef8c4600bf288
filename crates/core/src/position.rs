//! Open-position index for one futures market.

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// An open position as of the last applied `PositionModified`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// On-chain position id
    pub id: U256,
    pub account: Address,
    /// Signed size in base-asset units (negative = short)
    pub size: Decimal,
    /// `|size| * last_price / margin`
    pub leverage: Decimal,
}

/// Aggregate open interest at a given price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenInterest {
    /// `Σ|size| * price`
    pub market_size: Decimal,
    /// `Σsize * price`
    pub market_skew: Decimal,
}

/// Positions keyed by account.
///
/// Backed by a `BTreeMap` so iteration (and therefore scheduling order among
/// equal-leverage positions) is deterministic.
#[derive(Debug, Clone, Default)]
pub struct PositionIndex {
    positions: BTreeMap<Address, Position>,
}

impl PositionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the position for `position.account`.
    pub fn upsert(&mut self, position: Position) {
        self.positions.insert(position.account, position);
    }

    pub fn remove(&mut self, account: &Address) -> Option<Position> {
        self.positions.remove(account)
    }

    pub fn get(&self, account: &Address) -> Option<&Position> {
        self.positions.get(account)
    }

    pub fn contains(&self, account: &Address) -> bool {
        self.positions.contains_key(account)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Positions ordered by leverage, highest first.
    ///
    /// Ties keep account order.
    pub fn by_leverage_desc(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| b.leverage.cmp(&a.leverage));
        positions
    }

    /// Open interest of all indexed positions at `price`.
    pub fn open_interest(&self, price: Decimal) -> OpenInterest {
        let (abs_sum, signed_sum) = self
            .positions
            .values()
            .fold((Decimal::ZERO, Decimal::ZERO), |(abs, signed), p| {
                (abs + p.size.abs(), signed + p.size)
            });
        OpenInterest {
            market_size: abs_sum * price,
            market_skew: signed_sum * price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(byte: u8, size: i64, leverage: i64) -> Position {
        Position {
            id: U256::from(byte),
            account: Address::repeat_byte(byte),
            size: Decimal::from(size),
            leverage: Decimal::from(leverage),
        }
    }

    #[test]
    fn test_upsert_replaces() {
        let mut index = PositionIndex::new();
        index.upsert(position(1, 5, 2));
        index.upsert(position(1, 8, 3));

        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&Address::repeat_byte(1)).unwrap().size, Decimal::from(8));
    }

    #[test]
    fn test_remove_missing_is_none() {
        let mut index = PositionIndex::new();
        assert!(index.remove(&Address::repeat_byte(9)).is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_by_leverage_desc_is_stable() {
        let mut index = PositionIndex::new();
        index.upsert(position(3, 1, 5));
        index.upsert(position(1, 1, 5));
        index.upsert(position(2, 1, 20));
        index.upsert(position(4, 1, 1));

        let order: Vec<u8> = index
            .by_leverage_desc()
            .iter()
            .map(|p| p.account.0[0])
            .collect();
        assert_eq!(order, vec![2, 1, 3, 4]);
    }

    #[test]
    fn test_open_interest() {
        let mut index = PositionIndex::new();
        index.upsert(position(1, 10, 2));
        index.upsert(position(2, -4, 2));

        let oi = index.open_interest(Decimal::from(3));
        assert_eq!(oi.market_size, Decimal::from(42));
        assert_eq!(oi.market_skew, Decimal::from(18));
    }
}
