// src/models/snapshot.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Pairing of on-chain pool reserves with the off-chain short position
/// at a single point in time. One snapshot is produced per monitor tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Stablecoin reserve (token0), human units.
    pub reserve0: Decimal,
    /// Volatile-asset reserve (token1), human units.
    pub reserve1: Decimal,
    /// Absolute size of the venue short; zero when no short is open.
    pub short_size: Decimal,
    pub timestamp: DateTime<Utc>,
    pub block_number: Option<u64>,
    pub pool_address: String,
}

impl PositionSnapshot {
    /// Signed exposure in units of token1. Positive means under-hedged
    /// (more short needed), negative means over-hedged.
    pub fn delta(&self) -> Decimal {
        self.reserve1 - self.short_size
    }

    pub fn is_delta_neutral(&self, threshold: Decimal) -> bool {
        self.delta().abs() <= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(reserve1: Decimal, short: Decimal) -> PositionSnapshot {
        PositionSnapshot {
            reserve0: dec!(10000),
            reserve1,
            short_size: short,
            timestamp: Utc::now(),
            block_number: Some(19_000_000),
            pool_address: "0x55dcf9455eee8fd3f5eed17606291272cde428a8".into(),
        }
    }

    #[test]
    fn delta_is_exact_decimal_difference() {
        let snap = snapshot(dec!(6.123456789012345678), dec!(5.000000000000000001));
        assert_eq!(snap.delta(), dec!(1.123456789012345677));
    }

    #[test]
    fn delta_neutral_within_threshold() {
        let snap = snapshot(dec!(5.004), dec!(5.0));
        assert!(snap.is_delta_neutral(dec!(0.005)));
        assert!(!snap.is_delta_neutral(dec!(0.003)));
    }

    #[test]
    fn serde_round_trip_preserves_values() {
        let snap = snapshot(dec!(6.0), dec!(5.0));
        let json = serde_json::to_string(&snap).unwrap();
        let back: PositionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.timestamp.timestamp_micros(), snap.timestamp.timestamp_micros());
    }
}
