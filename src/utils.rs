// src/utils.rs

use anyhow::{anyhow, Result};
use rust_decimal::prelude::*;
use web3::types::{Address, U256};

/// Convert a raw on-chain integer into human units with `decimals`
/// fractional digits.
pub fn scale_down(raw: U256, decimals: u32) -> Result<Decimal> {
    if raw > U256::from(u128::MAX) {
        return Err(anyhow!("Raw amount {} does not fit into u128", raw));
    }
    Decimal::try_from_i128_with_scale(raw.as_u128() as i128, decimals)
        .map_err(|e| anyhow!("Raw amount {} overflows decimal range: {}", raw, e))
}

/// Convert a human-unit amount back into a raw on-chain integer,
/// truncating anything below the token's precision.
pub fn scale_up(amount: Decimal, decimals: u32) -> Result<U256> {
    if amount.is_sign_negative() {
        return Err(anyhow!("Cannot scale negative amount {}", amount));
    }
    let factor = Decimal::from_i128_with_scale(10i128.pow(decimals), 0);
    let raw = (amount * factor).trunc();
    raw.to_u128()
        .map(U256::from)
        .ok_or_else(|| anyhow!("Scaled amount {} does not fit into u128", raw))
}

/// Parse a 0x-prefixed hex address.
pub fn parse_address(s: &str) -> Result<Address> {
    let hex_part = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(hex_part).map_err(|e| anyhow!("Invalid address {}: {}", s, e))?;
    if bytes.len() != 20 {
        return Err(anyhow!("Invalid address length for {}", s));
    }
    Ok(Address::from_slice(&bytes))
}
