// src/exchange/types.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{OrderSide, OrderStatus, OrderType};

/// Direction of an open perpetual position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    None,
    Long,
    Short,
}

/// Perpetual position as reported by the venue. `size` is always the
/// absolute contract size; the direction lives in `side`.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub size: Decimal,
    pub side: PositionSide,
    pub entry_price: Option<Decimal>,
    pub mark_price: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub margin: Decimal,
    pub leverage: Decimal,
}

impl Position {
    pub fn flat(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            size: Decimal::ZERO,
            side: PositionSide::None,
            entry_price: None,
            mark_price: None,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            margin: Decimal::ZERO,
            leverage: Decimal::ONE,
        }
    }

    /// Short size as the core consumes it: zero unless actually short.
    pub fn short_size(&self) -> Decimal {
        if self.side == PositionSide::Short {
            self.size
        } else {
            Decimal::ZERO
        }
    }
}

/// Point-in-time view of one order.
#[derive(Debug, Clone)]
pub struct OrderInfo {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub size: Decimal,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub timestamp: DateTime<Utc>,
}

/// Public venue trade, informational only.
#[derive(Debug, Clone)]
pub struct MarketTrade {
    pub id: u64,
    pub price: Decimal,
    pub size: Decimal,
    pub timestamp: DateTime<Utc>,
    pub buyer_is_maker: bool,
}
