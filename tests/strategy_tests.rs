// tests/strategy_tests.rs

//! End-to-end strategy scenarios against a scripted venue.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};

use lphedger::config::Config;
use lphedger::exchange::{Exchange, MarketTrade, OrderBook, OrderInfo, Position, PositionSide};
use lphedger::models::{HedgeAction, OrderSide, OrderStatus, OrderType, PositionSnapshot, Trade};
use lphedger::risk::{RiskCore, RiskLimits};
use lphedger::storage::{self, Ledger};
use lphedger::strategy::StrategyCore;

#[derive(Debug, Default)]
struct MockState {
    mark_price: Decimal,
    balance: Decimal,
    position: Option<Position>,
    fail_orders: bool,
    opened: Vec<(Decimal, Decimal)>,
    closed: Vec<Decimal>,
    next_order_id: u64,
}

#[derive(Debug, Clone)]
struct MockExchange {
    state: Arc<Mutex<MockState>>,
}

impl MockExchange {
    fn new(mark_price: Decimal, balance: Decimal) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                mark_price,
                balance,
                next_order_id: 1000,
                ..MockState::default()
            })),
        }
    }

    fn with_position(self, position: Position) -> Self {
        self.state.lock().unwrap().position = Some(position);
        self
    }

    fn failing_orders(self) -> Self {
        self.state.lock().unwrap().fail_orders = true;
        self
    }

    fn set_mark_price(&self, price: Decimal) {
        self.state.lock().unwrap().mark_price = price;
    }

    fn opened(&self) -> Vec<(Decimal, Decimal)> {
        self.state.lock().unwrap().opened.clone()
    }

    fn closed(&self) -> Vec<Decimal> {
        self.state.lock().unwrap().closed.clone()
    }

    fn fill(&self, symbol: &str, side: OrderSide, size: Decimal) -> Result<Trade> {
        let mut state = self.state.lock().unwrap();
        if state.fail_orders {
            return Err(anyhow!("Margin is insufficient."));
        }
        state.next_order_id += 1;
        Ok(Trade {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            size,
            price: state.mark_price,
            timestamp: Utc::now(),
            order_id: state.next_order_id.to_string(),
            status: OrderStatus::Filled,
            fee: None,
            fee_currency: None,
            venue: "binance".into(),
        })
    }
}

#[async_trait]
impl Exchange for MockExchange {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn mark_price(&self, _symbol: &str) -> Result<Decimal> {
        Ok(self.state.lock().unwrap().mark_price)
    }

    async fn funding_rate(&self, _symbol: &str) -> Result<Decimal> {
        Ok(dec!(0.0001))
    }

    async fn balance(&self, _currency: &str) -> Result<Decimal> {
        Ok(self.state.lock().unwrap().balance)
    }

    async fn position(&self, symbol: &str) -> Result<Position> {
        let state = self.state.lock().unwrap();
        Ok(state
            .position
            .clone()
            .unwrap_or_else(|| Position::flat(symbol)))
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: Decimal) -> Result<bool> {
        Ok(true)
    }

    async fn open_short(&self, symbol: &str, size: Decimal, leverage: Decimal) -> Result<Trade> {
        let trade = self.fill(symbol, OrderSide::Sell, size)?;
        self.state.lock().unwrap().opened.push((size, leverage));
        Ok(trade)
    }

    async fn close_short(&self, symbol: &str, size: Decimal) -> Result<Trade> {
        let trade = self.fill(symbol, OrderSide::Buy, size)?;
        self.state.lock().unwrap().closed.push(size);
        Ok(trade)
    }

    async fn order_status(&self, _order_id: &str, _symbol: &str) -> Result<OrderInfo> {
        Err(anyhow!("order_status is not scripted"))
    }

    async fn cancel_order(&self, _order_id: &str, _symbol: &str) -> Result<bool> {
        Ok(false)
    }

    async fn order_book(&self, _symbol: &str, _depth: u32) -> Result<OrderBook> {
        Err(anyhow!("order_book is not scripted"))
    }

    async fn recent_trades(&self, _symbol: &str, _limit: u32) -> Result<Vec<MarketTrade>> {
        Ok(Vec::new())
    }
}

fn test_config() -> Config {
    Config {
        rpc_url: "http://localhost:8545".into(),
        pool_address: "0x55dcf9455eee8fd3f5eed17606291272cde428a8".into(),
        venue_api_key: "key".into(),
        venue_api_secret: "secret".into(),
        venue_testnet: false,
        min_hedge_size: dec!(0.005),
        hedge_threshold: dec!(0.01),
        max_slippage_percent: dec!(0.5),
        default_leverage: dec!(2),
        poll_interval_seconds: 5,
        max_retries: 3,
        retry_delay_seconds: 2,
        database_url: "sqlite://lphedger.db".into(),
        log_level: "INFO".into(),
        log_file: None,
        symbol_perpetual: "ETH/USDT:USDT".into(),
    }
}

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

fn strategy(
    exchange: MockExchange,
    ledger: Option<Ledger>,
) -> StrategyCore<MockExchange> {
    let cfg = test_config();
    let risk = RiskCore::new(&cfg, RiskLimits::default());
    StrategyCore::new(cfg, exchange, risk, ledger)
}

async fn temp_ledger() -> Ledger {
    let path = std::env::temp_dir().join(format!("lphedger-test-{}.db", uuid::Uuid::new_v4()));
    storage::connect(&format!("sqlite://{}", path.display()))
        .await
        .unwrap()
}

#[tokio::test]
async fn no_hedge_when_delta_is_zero() {
    let exchange = MockExchange::new(dec!(2000), dec!(10000));
    let strat = strategy(exchange.clone(), None);
    strat.clear_hedge_gate().await;

    let result = strat
        .process_snapshot(&snapshot(dec!(5.0), dec!(5.0)))
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(exchange.opened().is_empty());

    let stats = strat.stats().await;
    assert_eq!(stats.total_hedges, 0);
}

#[tokio::test]
async fn opens_short_when_under_hedged() {
    let exchange = MockExchange::new(dec!(2000), dec!(10000));
    let ledger = temp_ledger().await;
    let strat = strategy(exchange.clone(), Some(ledger.clone()));
    strat.clear_hedge_gate().await;

    let record = strat
        .process_snapshot(&snapshot(dec!(6.0), dec!(5.0)))
        .await
        .unwrap()
        .expect("hedge should execute");

    assert_eq!(record.action, HedgeAction::OpenShort);
    assert_eq!(record.size, dec!(1.0));
    assert_eq!(record.price, dec!(2000));
    assert_eq!(record.delta_before, dec!(1.0));
    assert_eq!(record.delta_after, dec!(0.0));
    // Raw 1*2000/10000 = 0.2x, clamped up to 1.
    assert_eq!(record.leverage, dec!(1));
    assert!(record.success);
    assert_eq!(exchange.opened(), vec![(dec!(1.0), dec!(1))]);

    // Hedge and its fill landed in the same ledger transaction.
    let hedges = ledger.hedges_in_range(None, None, 10).await.unwrap();
    assert_eq!(hedges.len(), 1);
    assert_eq!(hedges[0].order_id, record.order_id);
    let trades = ledger.recent_trades(24, 10).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(Some(trades[0].order_id.clone()), record.order_id);

    let stats = strat.stats().await;
    assert_eq!(stats.total_hedges, 1);
    assert_eq!(stats.successful_hedges, 1);
    assert_eq!(stats.failed_hedges, 0);
}

#[tokio::test]
async fn closes_short_when_over_hedged() {
    let exchange = MockExchange::new(dec!(2000), dec!(10000));
    let strat = strategy(exchange.clone(), None);
    strat.clear_hedge_gate().await;

    let record = strat
        .process_snapshot(&snapshot(dec!(4.5), dec!(5.0)))
        .await
        .unwrap()
        .expect("hedge should execute");

    assert_eq!(record.action, HedgeAction::CloseShort);
    assert_eq!(record.size, dec!(0.5));
    assert_eq!(record.delta_before, dec!(-0.5));
    assert_eq!(record.delta_after, dec!(0.0));
    assert!(record.success);
    assert_eq!(exchange.closed(), vec![dec!(0.5)]);
}

#[tokio::test]
async fn skips_hedge_below_minimum_size() {
    let exchange = MockExchange::new(dec!(2000), dec!(10000));
    let strat = strategy(exchange.clone(), None);
    strat.clear_hedge_gate().await;

    let result = strat
        .process_snapshot(&snapshot(dec!(5.003), dec!(5.0)))
        .await
        .unwrap();
    assert!(result.is_none());
    assert!(exchange.opened().is_empty());

    let stats = strat.stats().await;
    assert_eq!(stats.total_hedges, 0);
}

#[tokio::test]
async fn venue_failure_yields_failed_record() {
    let exchange = MockExchange::new(dec!(2000), dec!(10000)).failing_orders();
    let ledger = temp_ledger().await;
    let strat = strategy(exchange.clone(), Some(ledger.clone()));
    strat.clear_hedge_gate().await;
    let gate_before = strat.stats().await.last_hedge_time;

    let record = strat
        .process_snapshot(&snapshot(dec!(6.0), dec!(5.0)))
        .await
        .unwrap()
        .expect("a failed record is still produced");

    assert!(!record.success);
    assert_eq!(record.price, Decimal::ZERO);
    assert_eq!(record.delta_after, record.delta_before);
    assert!(record
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("Margin is insufficient"));
    assert!(record.order_id.is_none());

    let stats = strat.stats().await;
    assert_eq!(stats.total_hedges, 1);
    assert_eq!(stats.successful_hedges, 0);
    assert_eq!(stats.failed_hedges, 1);
    assert_eq!(stats.last_hedge_time, gate_before);

    // Failed hedge persisted without any trade row.
    let hedges = ledger.hedges_in_range(None, None, 10).await.unwrap();
    assert_eq!(hedges.len(), 1);
    assert!(!hedges[0].success);
    assert!(ledger.recent_trades(24, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn anti_chattering_gate_blocks_back_to_back_hedges() {
    let exchange = MockExchange::new(dec!(2000), dec!(10000));
    let strat = strategy(exchange.clone(), None);
    strat.clear_hedge_gate().await;

    let first = strat
        .process_snapshot(&snapshot(dec!(6.0), dec!(5.0)))
        .await
        .unwrap();
    assert!(first.is_some());

    // Second hedge-worthy snapshot right away is gated.
    let second = strat
        .process_snapshot(&snapshot(dec!(7.0), dec!(5.0)))
        .await
        .unwrap();
    assert!(second.is_none());
    assert_eq!(exchange.opened().len(), 1);
}

#[tokio::test]
async fn slippage_reject_skips_then_anchor_advances() {
    let exchange = MockExchange::new(dec!(2000), dec!(10000));
    let strat = strategy(exchange.clone(), None);
    strat.clear_hedge_gate().await;

    // First hedge executes and anchors the expected price at 2000.
    let first = strat
        .process_snapshot(&snapshot(dec!(6.0), dec!(5.0)))
        .await
        .unwrap();
    assert!(first.is_some());

    // Price gaps 5%; the next attempt fails the slippage guard and no
    // order reaches the venue.
    exchange.set_mark_price(dec!(2100));
    strat.clear_hedge_gate().await;
    let rejected = strat
        .process_snapshot(&snapshot(dec!(7.0), dec!(6.0)))
        .await
        .unwrap();
    assert!(rejected.is_none());
    assert_eq!(exchange.opened().len(), 1);

    // The anchor advanced to the observed mark, so the retry goes through.
    strat.clear_hedge_gate().await;
    let retried = strat
        .process_snapshot(&snapshot(dec!(7.0), dec!(6.0)))
        .await
        .unwrap();
    assert!(retried.is_some());
    assert_eq!(exchange.opened().len(), 2);

    let stats = strat.stats().await;
    assert_eq!(stats.total_hedges, 3);
    assert_eq!(stats.successful_hedges, 2);
    assert_eq!(stats.failed_hedges, 1);
}

#[tokio::test]
async fn emergency_close_flattens_the_short() {
    let mut position = Position::flat("ETH/USDT:USDT");
    position.side = PositionSide::Short;
    position.size = dec!(5.0);
    let exchange = MockExchange::new(dec!(2000), dec!(10000)).with_position(position);
    let strat = strategy(exchange.clone(), None);

    assert!(strat.emergency_close_all().await);
    assert_eq!(exchange.closed(), vec![dec!(5.0)]);
}

#[tokio::test]
async fn emergency_close_with_flat_position_is_a_no_op() {
    let exchange = MockExchange::new(dec!(2000), dec!(10000));
    let strat = strategy(exchange.clone(), None);

    assert!(strat.emergency_close_all().await);
    assert!(exchange.closed().is_empty());
}

#[tokio::test]
async fn emergency_stop_triggers_after_heavy_loss() {
    // Position reports a paper loss beyond the default 1000 stop.
    let mut position = Position::flat("ETH/USDT:USDT");
    position.side = PositionSide::Short;
    position.size = dec!(2.0);
    position.unrealized_pnl = dec!(-2500);
    let exchange = MockExchange::new(dec!(2000), dec!(10000)).with_position(position);
    let strat = strategy(exchange.clone(), None);
    strat.clear_hedge_gate().await;

    // Snapshot forces a hedge; the post-hedge PnL refresh must fire the
    // emergency close of the full reported short.
    let record = strat
        .process_snapshot(&snapshot(dec!(8.0), dec!(5.0)))
        .await
        .unwrap();
    assert!(record.is_some());
    assert_eq!(exchange.closed(), vec![dec!(2.0)]);

    let stats = strat.stats().await;
    assert_eq!(stats.cumulative_loss, dec!(2500));
}
