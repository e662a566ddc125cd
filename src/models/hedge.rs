// src/models/hedge.rs

use anyhow::{anyhow, Error};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of adjustment applied to the venue short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HedgeAction {
    OpenShort,
    CloseShort,
    AdjustShort,
}

impl fmt::Display for HedgeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HedgeAction::OpenShort => "open_short",
            HedgeAction::CloseShort => "close_short",
            HedgeAction::AdjustShort => "adjust_short",
        };
        f.write_str(s)
    }
}

impl FromStr for HedgeAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open_short" => Ok(HedgeAction::OpenShort),
            "close_short" => Ok(HedgeAction::CloseShort),
            "adjust_short" => Ok(HedgeAction::AdjustShort),
            other => Err(anyhow!("Unknown hedge action: {}", other)),
        }
    }
}

/// Outcome of one hedge attempt, successful or not. Failed attempts carry
/// `price = 0`, `delta_after = delta_before` and an error message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HedgeRecord {
    pub action: HedgeAction,
    /// Unsigned hedge size in token1 units.
    pub size: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub delta_before: Decimal,
    pub delta_after: Decimal,
    pub leverage: Decimal,
    pub venue: String,
    pub order_id: Option<String>,
    pub gas_cost: Option<Decimal>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl HedgeRecord {
    /// How much absolute exposure this hedge removed.
    pub fn delta_reduction(&self) -> Decimal {
        self.delta_before.abs() - self.delta_after.abs()
    }

    pub fn notional(&self) -> Decimal {
        self.size * self.price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record() -> HedgeRecord {
        HedgeRecord {
            action: HedgeAction::OpenShort,
            size: dec!(1.0),
            price: dec!(2000),
            timestamp: Utc::now(),
            delta_before: dec!(1.0),
            delta_after: dec!(0.0),
            leverage: dec!(1),
            venue: "binance".into(),
            order_id: Some("123456".into()),
            gas_cost: None,
            success: true,
            error_message: None,
        }
    }

    #[test]
    fn delta_reduction_and_notional() {
        let rec = record();
        assert_eq!(rec.delta_reduction(), dec!(1.0));
        assert_eq!(rec.notional(), dec!(2000.0));
    }

    #[test]
    fn reduction_is_nonnegative_for_partial_close() {
        let mut rec = record();
        rec.action = HedgeAction::CloseShort;
        rec.delta_before = dec!(-0.5);
        rec.delta_after = dec!(-0.1);
        assert_eq!(rec.delta_reduction(), dec!(0.4));
    }

    #[test]
    fn action_round_trips_through_text() {
        for action in [
            HedgeAction::OpenShort,
            HedgeAction::CloseShort,
            HedgeAction::AdjustShort,
        ] {
            assert_eq!(action.to_string().parse::<HedgeAction>().unwrap(), action);
        }
        assert!("short_squeeze".parse::<HedgeAction>().is_err());
    }

    #[test]
    fn serde_round_trip() {
        let rec = record();
        let json = serde_json::to_string(&rec).unwrap();
        let back: HedgeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }
}
