// src/pool/params.rs

use anyhow::{anyhow, Result};
use rust_decimal::Decimal;
use serde::Serialize;

/// On-chain pool state flag. Only an unlocked pool may drive hedging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    Unactivated,
    Unlocked,
    Locked,
}

impl PoolStatus {
    pub fn from_raw(raw: u64) -> Result<Self> {
        match raw {
            0 => Ok(PoolStatus::Unactivated),
            1 => Ok(PoolStatus::Unlocked),
            2 => Ok(PoolStatus::Locked),
            other => Err(anyhow!("Unknown pool status value: {}", other)),
        }
    }
}

/// Curve parameters of the pool, immutable for a pool epoch. Reserves
/// and prices are kept in human units; fees and concentrations are
/// fractions in [0, 1].
#[derive(Debug, Clone, Serialize)]
pub struct PoolParams {
    pub vault0: String,
    pub vault1: String,
    pub account: String,

    pub equilibrium_reserve0: Decimal,
    pub equilibrium_reserve1: Decimal,
    pub price_x: Decimal,
    pub price_y: Decimal,
    pub concentration_x: Decimal,
    pub concentration_y: Decimal,

    pub fee: Decimal,
    pub protocol_fee: Decimal,
    pub protocol_fee_recipient: String,

    pub token0_address: String,
    pub token1_address: String,
    pub token0_decimals: u32,
    pub token1_decimals: u32,
}

impl PoolParams {
    /// Price at the equilibrium point, token1 quoted in token0.
    pub fn equilibrium_price(&self) -> Decimal {
        self.price_x / self.price_y
    }

    pub fn is_concentrated(&self) -> bool {
        self.concentration_x > Decimal::ZERO || self.concentration_y > Decimal::ZERO
    }

    /// Theoretical upper bound on a single swap, per side.
    pub fn max_swap_size_token0(&self) -> Decimal {
        self.equilibrium_reserve0
    }

    pub fn max_swap_size_token1(&self) -> Decimal {
        self.equilibrium_reserve1
    }

    /// True when either live reserve deviates from its equilibrium by
    /// more than `threshold_percent`. A desynchronized pool is a warning
    /// condition, not a hedging blocker.
    pub fn is_desynchronized(
        &self,
        reserves: (Decimal, Decimal),
        threshold_percent: Decimal,
    ) -> bool {
        let percent0 = if self.equilibrium_reserve0 > Decimal::ZERO {
            (reserves.0 - self.equilibrium_reserve0).abs() / self.equilibrium_reserve0
                * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        let percent1 = if self.equilibrium_reserve1 > Decimal::ZERO {
            (reserves.1 - self.equilibrium_reserve1).abs() / self.equilibrium_reserve1
                * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        percent0 > threshold_percent || percent1 > threshold_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    pub(crate) fn test_params() -> PoolParams {
        PoolParams {
            vault0: "0x313603fa690301b0caeef8069c065862f9162162".into(),
            vault1: "0xd8b27cf359b7d15710a5be299af6e7bf904984c2".into(),
            account: "0x0000000000000000000000000000000000000001".into(),
            equilibrium_reserve0: dec!(10000),
            equilibrium_reserve1: dec!(5),
            price_x: dec!(2000),
            price_y: dec!(1),
            concentration_x: dec!(0.85),
            concentration_y: dec!(0.85),
            fee: dec!(0.003),
            protocol_fee: dec!(0.0005),
            protocol_fee_recipient: "0x0000000000000000000000000000000000000002".into(),
            token0_address: "0xdac17f958d2ee523a2206206994597c13d831ec7".into(),
            token1_address: "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2".into(),
            token0_decimals: 6,
            token1_decimals: 18,
        }
    }

    #[test]
    fn equilibrium_price_is_ratio() {
        assert_eq!(test_params().equilibrium_price(), dec!(2000));
    }

    #[test]
    fn detects_desynchronized_reserves() {
        let params = test_params();
        // 10% deviation on token0, 20% on token1, against a 5% threshold.
        assert!(params.is_desynchronized((dec!(11000), dec!(4)), dec!(5)));
    }

    #[test]
    fn reserves_near_equilibrium_are_in_sync() {
        let params = test_params();
        assert!(!params.is_desynchronized((dec!(10100), dec!(4.95)), dec!(5)));
        // Exactly at threshold is still in sync.
        assert!(!params.is_desynchronized((dec!(10500), dec!(5)), dec!(5)));
    }

    #[test]
    fn status_from_raw() {
        assert_eq!(PoolStatus::from_raw(0).unwrap(), PoolStatus::Unactivated);
        assert_eq!(PoolStatus::from_raw(1).unwrap(), PoolStatus::Unlocked);
        assert_eq!(PoolStatus::from_raw(2).unwrap(), PoolStatus::Locked);
        assert!(PoolStatus::from_raw(3).is_err());
    }
}
