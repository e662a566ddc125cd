// src/strategy/mod.rs

mod executor;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::Level;

use crate::config::Config;
use crate::exchange::{Exchange, PositionSide};
use crate::logger::{self, LogTag};
use crate::models::{HedgeRecord, PositionSnapshot};
use crate::risk::RiskCore;
use crate::storage::Ledger;

pub const DEFAULT_MIN_HEDGE_INTERVAL_SECS: i64 = 30;

struct StrategyState {
    risk: RiskCore,
    last_hedge_time: DateTime<Utc>,
    min_hedge_interval_secs: i64,
    total_hedges: u64,
    successful_hedges: u64,
    failed_hedges: u64,
    cumulative_loss: Decimal,
    /// Mark price observed on the previous executed hedge; slippage
    /// anchor for the next one.
    last_mark: Option<Decimal>,
}

/// Consumes snapshots, decides with the risk core whether to hedge, and
/// drives the executor. All mutable state sits behind one async mutex,
/// which also guarantees an emergency close can never interleave with an
/// in-flight hedge.
pub struct StrategyCore<E> {
    config: Config,
    exchange: E,
    ledger: Option<Ledger>,
    state: Mutex<StrategyState>,
}

#[derive(Debug, Clone)]
pub struct StrategyStats {
    pub total_hedges: u64,
    pub successful_hedges: u64,
    pub failed_hedges: u64,
    pub success_rate_percent: f64,
    pub last_hedge_time: DateTime<Utc>,
    pub min_hedge_interval_secs: i64,
    pub cumulative_loss: Decimal,
}

impl<E> StrategyCore<E>
where
    E: Exchange + Send + Sync,
{
    pub fn new(config: Config, exchange: E, risk: RiskCore, ledger: Option<Ledger>) -> Self {
        Self {
            config,
            exchange,
            ledger,
            state: Mutex::new(StrategyState {
                risk,
                last_hedge_time: Utc::now(),
                min_hedge_interval_secs: DEFAULT_MIN_HEDGE_INTERVAL_SECS,
                total_hedges: 0,
                successful_hedges: 0,
                failed_hedges: 0,
                cumulative_loss: Decimal::ZERO,
                last_mark: None,
            }),
        }
    }

    /// Handle one snapshot: risk decision, anti-chattering gate, then
    /// the executor. Returns the hedge record when one was attempted.
    pub async fn process_snapshot(
        &self,
        snapshot: &PositionSnapshot,
    ) -> Result<Option<HedgeRecord>> {
        let mut state = self.state.lock().await;

        logger::log(
            LogTag::Strategy,
            Level::INFO,
            format!("Processing snapshot - delta: {}", snapshot.delta()),
        );

        let (needed, signed_size) = state.risk.should_hedge(snapshot, false);
        if !needed {
            logger::log(
                LogTag::Strategy,
                Level::DEBUG,
                "No hedge required - within threshold".to_string(),
            );
            return Ok(None);
        }

        let since_last = (Utc::now() - state.last_hedge_time).num_seconds();
        if since_last < state.min_hedge_interval_secs {
            logger::log(
                LogTag::Strategy,
                Level::DEBUG,
                format!(
                    "Skipping hedge - too soon ({}s < {}s)",
                    since_last, state.min_hedge_interval_secs
                ),
            );
            return Ok(None);
        }

        let StrategyState {
            risk, last_mark, ..
        } = &mut *state;
        let outcome = executor::execute_hedge(
            &self.exchange,
            risk,
            last_mark,
            self.ledger.as_ref(),
            &self.config,
            snapshot,
            signed_size,
        )
        .await;

        state.total_hedges += 1;
        match &outcome {
            Some(record) if record.success => {
                state.successful_hedges += 1;
                state.last_hedge_time = Utc::now();
            }
            _ => state.failed_hedges += 1,
        }

        if outcome.as_ref().is_some_and(|r| r.success) {
            self.refresh_loss_and_check_emergency(&mut state).await;
        }

        Ok(outcome)
    }

    /// Close the whole short position immediately. Callable from any
    /// task; the state lock serializes it against in-flight hedges, and
    /// it ignores the min-hedge-interval gate.
    pub async fn emergency_close_all(&self) -> bool {
        let _state = self.state.lock().await;
        match self.close_all_inner().await {
            Ok(closed) => closed,
            Err(e) => {
                logger::log(
                    LogTag::Error,
                    Level::ERROR,
                    format!("Failed to emergency close positions: {}", e),
                );
                false
            }
        }
    }

    async fn close_all_inner(&self) -> Result<bool> {
        logger::log(
            LogTag::Strategy,
            Level::WARN,
            "EMERGENCY: closing all positions".to_string(),
        );

        let symbol = &self.config.symbol_perpetual;
        let position = self.exchange.position(symbol).await?;

        if position.side == PositionSide::Short && position.size > Decimal::ZERO {
            let trade = self.exchange.close_short(symbol, position.size).await?;

            if let Some(ledger) = &self.ledger {
                if let Err(e) = ledger.insert_trade(&trade).await {
                    logger::log(
                        LogTag::Database,
                        Level::ERROR,
                        format!("Failed to persist emergency close trade: {}", e),
                    );
                }
            }

            logger::log(
                LogTag::Strategy,
                Level::INFO,
                format!("Emergency closed {} short at {}", position.size, trade.price),
            );
        }

        Ok(true)
    }

    /// Refresh cumulative loss from the venue position PnL and trigger
    /// the emergency close when the stop threshold is reached. Called
    /// with the state lock held.
    async fn refresh_loss_and_check_emergency(&self, state: &mut StrategyState) {
        let position = match self.exchange.position(&self.config.symbol_perpetual).await {
            Ok(p) => p,
            Err(e) => {
                logger::log(
                    LogTag::Strategy,
                    Level::DEBUG,
                    format!("Could not refresh position PnL: {}", e),
                );
                return;
            }
        };

        let pnl = position.unrealized_pnl + position.realized_pnl;
        state.cumulative_loss = if pnl < Decimal::ZERO {
            -pnl
        } else {
            Decimal::ZERO
        };

        if state.risk.emergency_stop_check(state.cumulative_loss) {
            if let Err(e) = self.close_all_inner().await {
                logger::log(
                    LogTag::Error,
                    Level::ERROR,
                    format!("Failed to emergency close positions: {}", e),
                );
            }
        }
    }

    pub async fn stats(&self) -> StrategyStats {
        let state = self.state.lock().await;
        let success_rate = if state.total_hedges > 0 {
            state.successful_hedges as f64 / state.total_hedges as f64 * 100.0
        } else {
            0.0
        };
        StrategyStats {
            total_hedges: state.total_hedges,
            successful_hedges: state.successful_hedges,
            failed_hedges: state.failed_hedges,
            success_rate_percent: success_rate,
            last_hedge_time: state.last_hedge_time,
            min_hedge_interval_secs: state.min_hedge_interval_secs,
            cumulative_loss: state.cumulative_loss,
        }
    }

    pub async fn set_min_hedge_interval(&self, seconds: i64) {
        let mut state = self.state.lock().await;
        state.min_hedge_interval_secs = seconds;
        logger::log(
            LogTag::Strategy,
            Level::INFO,
            format!("Updated min hedge interval to {}s", seconds),
        );
    }

    /// Reset the anti-chattering gate so the next snapshot may hedge
    /// immediately. Used at startup and by tests.
    pub async fn clear_hedge_gate(&self) {
        let mut state = self.state.lock().await;
        state.last_hedge_time = Utc::now()
            - chrono::Duration::seconds(state.min_hedge_interval_secs + 1);
    }
}
