// src/exchange/mod.rs

pub mod binance;
pub mod types;

pub use binance::Binance;
pub use types::{MarketTrade, OrderBook, OrderInfo, Position, PositionSide};

use crate::models::Trade;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Capability set of a perpetual-futures venue. One implementation per
/// venue; the core only ever talks through this trait.
///
/// Every method except `connect` fails with a not-connected error until
/// `connect` has succeeded. Sizes must be positive and leverage within
/// the configured bounds; implementations reject anything else before
/// touching the wire.
#[async_trait]
pub trait Exchange {
    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    /// Venue mark price for the perpetual contract.
    async fn mark_price(&self, symbol: &str) -> Result<Decimal>;

    /// Current funding rate per funding interval.
    async fn funding_rate(&self, symbol: &str) -> Result<Decimal>;

    /// Free balance for a currency (e.g. "USDT").
    async fn balance(&self, currency: &str) -> Result<Decimal>;

    /// Current perpetual position; zero-sized with side `None` when flat.
    async fn position(&self, symbol: &str) -> Result<Position>;

    /// Set leverage for a symbol; false when the venue refused.
    async fn set_leverage(&self, symbol: &str, leverage: Decimal) -> Result<bool>;

    /// Open or increase a short via market sell.
    async fn open_short(&self, symbol: &str, size: Decimal, leverage: Decimal) -> Result<Trade>;

    /// Close or reduce a short via market buy.
    async fn close_short(&self, symbol: &str, size: Decimal) -> Result<Trade>;

    async fn order_status(&self, order_id: &str, symbol: &str) -> Result<OrderInfo>;

    /// Cancel an open order; false when it could not be cancelled.
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<bool>;

    /// Order book levels, informational.
    async fn order_book(&self, symbol: &str, depth: u32) -> Result<OrderBook>;

    /// Recent public trades, informational.
    async fn recent_trades(&self, symbol: &str, limit: u32) -> Result<Vec<MarketTrade>>;
}
