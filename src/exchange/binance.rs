// src/exchange/binance.rs

use super::types::{MarketTrade, OrderBook, OrderInfo, Position, PositionSide};
use super::Exchange;
use crate::models::{OrderSide, OrderStatus, OrderType, Trade};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

type HmacSha256 = Hmac<Sha256>;

pub const MAINNET_BASE_URL: &str = "https://fapi.binance.com";
pub const TESTNET_BASE_URL: &str = "https://testnet.binancefuture.com";

const VENUE_NAME: &str = "binance";

// --- Response structures for the USDT-M futures API ---

#[derive(Deserialize, Debug)]
struct ServerTimeResult {
    #[serde(rename = "serverTime")]
    server_time: i64,
}

#[derive(Deserialize, Debug)]
struct PremiumIndexResult {
    #[serde(rename = "markPrice")]
    mark_price: String,
    #[serde(rename = "lastFundingRate")]
    last_funding_rate: String,
}

#[derive(Deserialize, Debug)]
struct BalanceEntry {
    #[serde(rename = "asset")]
    asset: String,
    #[serde(rename = "availableBalance")]
    available: String,
}

#[derive(Deserialize, Debug)]
struct PositionRiskEntry {
    #[serde(rename = "symbol")]
    symbol: String,
    #[serde(rename = "positionAmt")]
    position_amt: String,
    #[serde(rename = "entryPrice")]
    entry_price: String,
    #[serde(rename = "markPrice")]
    mark_price: String,
    #[serde(rename = "unRealizedProfit")]
    unrealized_pnl: String,
    #[serde(rename = "isolatedMargin", default)]
    isolated_margin: String,
    #[serde(rename = "leverage")]
    leverage: String,
}

#[derive(Deserialize, Debug)]
struct LeverageResult {
    #[serde(rename = "leverage")]
    leverage: i64,
    #[serde(rename = "symbol")]
    _symbol: String,
}

#[derive(Deserialize, Debug)]
struct OrderResult {
    #[serde(rename = "orderId")]
    order_id: u64,
    #[serde(rename = "status")]
    status: String,
    #[serde(rename = "side")]
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    #[serde(rename = "price", default)]
    price: String,
    #[serde(rename = "avgPrice", default)]
    avg_price: String,
    #[serde(rename = "origQty")]
    orig_qty: String,
    #[serde(rename = "executedQty")]
    executed_qty: String,
    #[serde(rename = "updateTime")]
    update_time: i64,
}

#[derive(Deserialize, Debug)]
struct DepthResult {
    #[serde(rename = "bids")]
    bids: Vec<(String, String)>,
    #[serde(rename = "asks")]
    asks: Vec<(String, String)>,
}

#[derive(Deserialize, Debug)]
struct PublicTradeEntry {
    #[serde(rename = "id")]
    id: u64,
    #[serde(rename = "price")]
    price: String,
    #[serde(rename = "qty")]
    qty: String,
    #[serde(rename = "time")]
    time: i64,
    #[serde(rename = "isBuyerMaker")]
    is_buyer_maker: bool,
}

/// Binance USDT-M perpetual futures client. All signed calls use the
/// venue-synchronized clock; sizes and prices stay in decimals.
#[derive(Debug, Clone)]
pub struct Binance {
    api_key: String,
    api_secret: String,
    client: Client,
    base_url: String,
    recv_window: u64,
    max_leverage: Decimal,
    time_offset_ms: Arc<Mutex<Option<i64>>>,
    connected: Arc<AtomicBool>,
}

impl Binance {
    pub fn new(key: &str, secret: &str, base_url: &str, max_leverage: Decimal) -> Result<Self> {
        info!(base_url, "Initializing Binance futures client...");
        if !base_url.starts_with("http") {
            return Err(anyhow!("Invalid base URL: {}", base_url));
        }
        if max_leverage < Decimal::ONE {
            return Err(anyhow!("Max leverage must be at least 1"));
        }
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            api_key: key.into(),
            api_secret: secret.into(),
            client,
            base_url: base_url.trim_end_matches('/').into(),
            recv_window: 5_000,
            max_leverage,
            time_offset_ms: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Venue-internal symbol: "ETH/USDT:USDT" -> "ETHUSDT". The colon
    /// form never leaves this module.
    fn normalize_symbol(symbol: &str) -> String {
        symbol
            .split(':')
            .next()
            .unwrap_or(symbol)
            .replace('/', "")
            .to_uppercase()
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(anyhow!("Exchange not connected. Call connect() first."));
        }
        Ok(())
    }

    async fn sync_time(&self) -> Result<()> {
        let result: ServerTimeResult = self
            .call_api(Method::GET, "/fapi/v1/time", &[], false)
            .await?;

        let local_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| anyhow!("System time error: {}", e))?
            .as_millis() as i64;

        let offset = result.server_time - local_ms;
        info!(offset_ms = offset, "Server time synced.");

        let mut guard = self.time_offset_ms.lock().await;
        *guard = Some(offset);
        Ok(())
    }

    async fn timestamp_ms(&self) -> Result<i64> {
        let local_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| anyhow!("System time error: {}", e))?
            .as_millis() as i64;

        let guard = self.time_offset_ms.lock().await;
        let offset = (*guard).ok_or_else(|| anyhow!("Time not synchronized with server"))?;
        Ok(local_ms + offset)
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Single entry point for every REST call. Signed requests get the
    /// timestamp, recvWindow and HMAC signature appended to the query
    /// string exactly as it is sent.
    async fn call_api<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<T> {
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        if signed {
            let ts = self.timestamp_ms().await?;
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!("timestamp={}&recvWindow={}", ts, self.recv_window));
            let signature = self.sign(&query);
            query.push_str(&format!("&signature={}", signature));
        }

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}{}?{}", self.base_url, endpoint, query)
        };
        debug!(%endpoint, method = %method, signed, "Binance API call ->");

        let mut req = self.client.request(method, &url);
        if signed || !self.api_key.is_empty() {
            req = req.header("X-MBX-APIKEY", self.api_key.clone());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| anyhow!("Request failed to {}: {}", endpoint, e))?;
        let status = resp.status();
        let raw_body = resp
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;
        trace!(%endpoint, %status, body = %raw_body, "Binance API response <-");

        if !status.is_success() {
            let (code, msg) = match serde_json::from_str::<Value>(&raw_body) {
                Ok(v) => (
                    v.get("code").and_then(Value::as_i64).unwrap_or(-1),
                    v.get("msg")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown error")
                        .to_string(),
                ),
                Err(_) => (-1, raw_body.clone()),
            };
            error!(%endpoint, %status, code, msg = %msg, "Binance API error");
            return Err(anyhow!("Binance API error ({}): {}", code, msg));
        }

        serde_json::from_str(&raw_body).map_err(|e| {
            error!(%endpoint, error = %e, body = %raw_body, "Failed to parse Binance response");
            anyhow!("Failed to parse Binance response from {}: {}", endpoint, e)
        })
    }

    async fn premium_index(&self, symbol: &str) -> Result<PremiumIndexResult> {
        let pair = Self::normalize_symbol(symbol);
        self.call_api(
            Method::GET,
            "/fapi/v1/premiumIndex",
            &[("symbol", pair)],
            false,
        )
        .await
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        size: Decimal,
    ) -> Result<Trade> {
        if size <= Decimal::ZERO {
            bail!("Order size must be positive, got {}", size);
        }

        let pair = Self::normalize_symbol(symbol);
        let side_str = match side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        let client_order_id = uuid::Uuid::new_v4().to_string();

        info!(symbol = %pair, side = side_str, %size, "Placing futures MARKET order");
        let result: OrderResult = self
            .call_api(
                Method::POST,
                "/fapi/v1/order",
                &[
                    ("symbol", pair.clone()),
                    ("side", side_str.to_string()),
                    ("type", "MARKET".to_string()),
                    ("quantity", size.normalize().to_string()),
                    ("newClientOrderId", client_order_id),
                    ("newOrderRespType", "RESULT".to_string()),
                ],
                true,
            )
            .await?;

        let executed = parse_decimal(&result.executed_qty, "executedQty")?;
        let filled_size = if executed > Decimal::ZERO { executed } else { size };

        let mut price = parse_decimal(&result.avg_price, "avgPrice")?;
        if price == Decimal::ZERO {
            // RESULT responses for market orders normally carry avgPrice;
            // fall back to the mark when the venue left it blank.
            price = parse_decimal(&self.premium_index(symbol).await?.mark_price, "markPrice")?;
        }

        let timestamp = DateTime::<Utc>::from_timestamp_millis(result.update_time)
            .ok_or_else(|| anyhow!("Invalid order timestamp: {}", result.update_time))?;

        info!(order_id = result.order_id, %price, %filled_size, status = %result.status, "Futures MARKET order placed");
        Ok(Trade {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            size: filled_size,
            price,
            timestamp,
            order_id: result.order_id.to_string(),
            status: map_order_status(&result.status),
            fee: None,
            fee_currency: None,
            venue: VENUE_NAME.to_string(),
        })
    }
}

fn parse_decimal(s: &str, what: &str) -> Result<Decimal> {
    if s.is_empty() {
        return Ok(Decimal::ZERO);
    }
    Decimal::from_str(s).map_err(|e| anyhow!("Failed to parse {} '{}': {}", what, s, e))
}

fn map_order_status(raw: &str) -> OrderStatus {
    match raw {
        "NEW" | "PARTIALLY_FILLED" => OrderStatus::Open,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Cancelled,
        "REJECTED" | "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Failed,
        _ => OrderStatus::Pending,
    }
}

fn map_order_side(raw: &str) -> Result<OrderSide> {
    match raw {
        "BUY" => Ok(OrderSide::Buy),
        "SELL" => Ok(OrderSide::Sell),
        other => Err(anyhow!("Unknown order side from venue: {}", other)),
    }
}

fn map_order_type(raw: &str) -> OrderType {
    match raw {
        "LIMIT" => OrderType::Limit,
        "STOP" | "STOP_MARKET" => OrderType::Stop,
        "STOP_LIMIT" | "TAKE_PROFIT" => OrderType::StopLimit,
        _ => OrderType::Market,
    }
}

#[async_trait]
impl Exchange for Binance {
    async fn connect(&mut self) -> Result<()> {
        info!("Connecting to Binance futures...");
        self.sync_time().await?;

        // Credentials check: a signed balance read must succeed.
        let _: Vec<BalanceEntry> = self
            .call_api(Method::GET, "/fapi/v2/balance", &[], true)
            .await?;

        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to Binance futures.");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        info!("Disconnected from Binance futures.");
        Ok(())
    }

    async fn mark_price(&self, symbol: &str) -> Result<Decimal> {
        self.ensure_connected()?;
        let index = self.premium_index(symbol).await?;
        let mark = parse_decimal(&index.mark_price, "markPrice")?;
        debug!(%symbol, %mark, "Mark price");
        Ok(mark)
    }

    async fn funding_rate(&self, symbol: &str) -> Result<Decimal> {
        self.ensure_connected()?;
        let index = self.premium_index(symbol).await?;
        let rate = parse_decimal(&index.last_funding_rate, "lastFundingRate")?;
        debug!(%symbol, %rate, "Funding rate");
        Ok(rate)
    }

    async fn balance(&self, currency: &str) -> Result<Decimal> {
        self.ensure_connected()?;
        let entries: Vec<BalanceEntry> = self
            .call_api(Method::GET, "/fapi/v2/balance", &[], true)
            .await?;

        let free = entries
            .into_iter()
            .find(|e| e.asset.eq_ignore_ascii_case(currency))
            .map(|e| parse_decimal(&e.available, "availableBalance"))
            .transpose()?
            .unwrap_or(Decimal::ZERO);
        debug!(%currency, %free, "Free balance");
        Ok(free)
    }

    async fn position(&self, symbol: &str) -> Result<Position> {
        self.ensure_connected()?;
        let pair = Self::normalize_symbol(symbol);
        let entries: Vec<PositionRiskEntry> = self
            .call_api(
                Method::GET,
                "/fapi/v2/positionRisk",
                &[("symbol", pair.clone())],
                true,
            )
            .await?;

        let entry = match entries.into_iter().find(|p| p.symbol == pair) {
            Some(e) => e,
            None => return Ok(Position::flat(symbol)),
        };

        let amount = parse_decimal(&entry.position_amt, "positionAmt")?;
        let side = if amount > Decimal::ZERO {
            PositionSide::Long
        } else if amount < Decimal::ZERO {
            PositionSide::Short
        } else {
            PositionSide::None
        };
        let entry_price = parse_decimal(&entry.entry_price, "entryPrice")?;
        let mark_price = parse_decimal(&entry.mark_price, "markPrice")?;

        Ok(Position {
            symbol: symbol.to_string(),
            size: amount.abs(),
            side,
            entry_price: (entry_price > Decimal::ZERO).then_some(entry_price),
            mark_price: (mark_price > Decimal::ZERO).then_some(mark_price),
            unrealized_pnl: parse_decimal(&entry.unrealized_pnl, "unRealizedProfit")?,
            // The position endpoint does not expose realized PnL.
            realized_pnl: Decimal::ZERO,
            margin: parse_decimal(&entry.isolated_margin, "isolatedMargin")?,
            leverage: parse_decimal(&entry.leverage, "leverage")?.max(Decimal::ONE),
        })
    }

    async fn set_leverage(&self, symbol: &str, leverage: Decimal) -> Result<bool> {
        self.ensure_connected()?;
        if leverage < Decimal::ONE || leverage > self.max_leverage {
            bail!(
                "Leverage {} outside allowed range [1, {}]",
                leverage,
                self.max_leverage
            );
        }

        let pair = Self::normalize_symbol(symbol);
        let whole = leverage
            .trunc()
            .to_i64()
            .ok_or_else(|| anyhow!("Invalid leverage value {}", leverage))?
            .max(1);

        let result: Result<LeverageResult> = self
            .call_api(
                Method::POST,
                "/fapi/v1/leverage",
                &[("symbol", pair.clone()), ("leverage", whole.to_string())],
                true,
            )
            .await;

        match result {
            Ok(r) => {
                info!(symbol = %pair, leverage = r.leverage, "Leverage set");
                Ok(true)
            }
            Err(e) => {
                warn!(symbol = %pair, %leverage, error = %e, "Failed to set leverage");
                Ok(false)
            }
        }
    }

    async fn open_short(&self, symbol: &str, size: Decimal, leverage: Decimal) -> Result<Trade> {
        self.ensure_connected()?;
        if !self.set_leverage(symbol, leverage).await? {
            warn!(%symbol, %leverage, "Proceeding with venue-side leverage unchanged");
        }
        self.place_market_order(symbol, OrderSide::Sell, size).await
    }

    async fn close_short(&self, symbol: &str, size: Decimal) -> Result<Trade> {
        self.ensure_connected()?;
        self.place_market_order(symbol, OrderSide::Buy, size).await
    }

    async fn order_status(&self, order_id: &str, symbol: &str) -> Result<OrderInfo> {
        self.ensure_connected()?;
        let pair = Self::normalize_symbol(symbol);
        let result: OrderResult = self
            .call_api(
                Method::GET,
                "/fapi/v1/order",
                &[("symbol", pair), ("orderId", order_id.to_string())],
                true,
            )
            .await?;

        let size = parse_decimal(&result.orig_qty, "origQty")?;
        let filled = parse_decimal(&result.executed_qty, "executedQty")?;
        let price = parse_decimal(&result.price, "price")?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(result.update_time)
            .ok_or_else(|| anyhow!("Invalid order timestamp: {}", result.update_time))?;

        Ok(OrderInfo {
            order_id: result.order_id.to_string(),
            symbol: symbol.to_string(),
            side: map_order_side(&result.side)?,
            order_type: map_order_type(&result.order_type),
            price: (price > Decimal::ZERO).then_some(price),
            size,
            filled,
            remaining: size - filled,
            status: map_order_status(&result.status),
            timestamp,
        })
    }

    async fn cancel_order(&self, order_id: &str, symbol: &str) -> Result<bool> {
        self.ensure_connected()?;
        let pair = Self::normalize_symbol(symbol);
        let result: Result<OrderResult> = self
            .call_api(
                Method::DELETE,
                "/fapi/v1/order",
                &[("symbol", pair), ("orderId", order_id.to_string())],
                true,
            )
            .await;

        match result {
            Ok(r) => Ok(r.status == "CANCELED"),
            Err(e) => {
                warn!(order_id, error = %e, "Failed to cancel order");
                Ok(false)
            }
        }
    }

    async fn order_book(&self, symbol: &str, depth: u32) -> Result<OrderBook> {
        self.ensure_connected()?;
        let pair = Self::normalize_symbol(symbol);
        let result: DepthResult = self
            .call_api(
                Method::GET,
                "/fapi/v1/depth",
                &[("symbol", pair), ("limit", depth.to_string())],
                false,
            )
            .await?;

        let parse_levels = |levels: Vec<(String, String)>| -> Result<Vec<(Decimal, Decimal)>> {
            levels
                .into_iter()
                .map(|(p, q)| Ok((parse_decimal(&p, "price")?, parse_decimal(&q, "qty")?)))
                .collect()
        };

        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids: parse_levels(result.bids)?,
            asks: parse_levels(result.asks)?,
            timestamp: Utc::now(),
        })
    }

    async fn recent_trades(&self, symbol: &str, limit: u32) -> Result<Vec<MarketTrade>> {
        self.ensure_connected()?;
        let pair = Self::normalize_symbol(symbol);
        let entries: Vec<PublicTradeEntry> = self
            .call_api(
                Method::GET,
                "/fapi/v1/trades",
                &[("symbol", pair), ("limit", limit.to_string())],
                false,
            )
            .await?;

        entries
            .into_iter()
            .map(|t| {
                Ok(MarketTrade {
                    id: t.id,
                    price: parse_decimal(&t.price, "price")?,
                    size: parse_decimal(&t.qty, "qty")?,
                    timestamp: DateTime::<Utc>::from_timestamp_millis(t.time)
                        .ok_or_else(|| anyhow!("Invalid trade timestamp: {}", t.time))?,
                    buyer_is_maker: t.is_buyer_maker,
                })
            })
            .collect()
    }
}
