// src/strategy/executor.rs

//! Translation of a hedge decision into venue calls and a persisted
//! HedgeRecord. Venue business errors become failed records; a slippage
//! reject produces no record at all.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::Level;

use crate::config::Config;
use crate::exchange::Exchange;
use crate::logger::{self, LogTag};
use crate::models::{HedgeAction, HedgeRecord, PositionSnapshot, Trade};
use crate::risk::RiskCore;
use crate::storage::Ledger;

const DEFAULT_VENUE: &str = "binance";

enum ExecError {
    /// Mark price moved too far from the expected anchor; nothing was
    /// sent. Carries the observed mark so the anchor can advance.
    Slippage(Decimal),
    /// The venue rejected or failed the order flow.
    Venue(anyhow::Error),
}

struct Placed {
    trade: Trade,
    action: HedgeAction,
    leverage: Decimal,
    new_short: Decimal,
    mark: Decimal,
}

/// Run one hedge for `signed_size` (positive opens short, negative
/// closes). Returns the persisted record, or `None` when the slippage
/// guard rejected the attempt.
pub(crate) async fn execute_hedge<E>(
    exchange: &E,
    risk: &mut RiskCore,
    last_mark: &mut Option<Decimal>,
    ledger: Option<&Ledger>,
    config: &Config,
    snapshot: &PositionSnapshot,
    signed_size: Decimal,
) -> Option<HedgeRecord>
where
    E: Exchange + Send + Sync + ?Sized,
{
    let size = signed_size.abs();
    let delta_before = snapshot.delta();
    let action_label = if signed_size > Decimal::ZERO {
        "Open Short"
    } else {
        "Close Short"
    };
    logger::log(
        LogTag::CalculatedHedge,
        Level::INFO,
        format!("Delta: {}, action: {}", signed_size, action_label),
    );

    match place(exchange, risk, *last_mark, config, snapshot, signed_size).await {
        Ok(placed) => {
            let delta_after = snapshot.reserve1 - placed.new_short;
            let record = HedgeRecord {
                action: placed.action,
                size,
                price: placed.trade.price,
                timestamp: placed.trade.timestamp,
                delta_before,
                delta_after,
                leverage: placed.leverage,
                venue: placed.trade.venue.clone(),
                order_id: Some(placed.trade.order_id.clone()),
                gas_cost: None,
                success: true,
                error_message: None,
            };

            // Hedge and its fill land in one ledger transaction; a
            // persistence failure never undoes an executed hedge.
            if let Some(ledger) = ledger {
                if let Err(e) = ledger.insert_hedge(&record, Some(&placed.trade)).await {
                    logger::log(
                        LogTag::Database,
                        Level::ERROR,
                        format!("Failed to persist hedge: {}", e),
                    );
                }
            }

            risk.record_trade();
            *last_mark = Some(placed.mark);

            let tag = match placed.action {
                HedgeAction::OpenShort => LogTag::OpenShortPosition,
                HedgeAction::CloseShort => LogTag::CloseShortPosition,
                HedgeAction::AdjustShort => LogTag::AdjustShortPosition,
            };
            logger::log(
                tag,
                Level::INFO,
                format!("Size: {} @ {}", size, placed.trade.price),
            );

            Some(record)
        }
        Err(ExecError::Slippage(mark)) => {
            logger::log(
                LogTag::Risk,
                Level::WARN,
                "Slippage check failed, hedge not sent".to_string(),
            );
            // The anchor still advances to the observed mark, otherwise a
            // single large move would reject every later attempt.
            *last_mark = Some(mark);
            None
        }
        Err(ExecError::Venue(e)) => {
            logger::log(
                LogTag::Error,
                Level::ERROR,
                format!("Failed to execute hedge: {}", e),
            );

            let record = HedgeRecord {
                action: if signed_size > Decimal::ZERO {
                    HedgeAction::OpenShort
                } else {
                    HedgeAction::CloseShort
                },
                size,
                price: Decimal::ZERO,
                timestamp: Utc::now(),
                delta_before,
                delta_after: delta_before,
                leverage: Decimal::ONE,
                venue: DEFAULT_VENUE.to_string(),
                order_id: None,
                gas_cost: None,
                success: false,
                error_message: Some(e.to_string()),
            };

            if let Some(ledger) = ledger {
                if let Err(e) = ledger.insert_hedge(&record, None).await {
                    logger::log(
                        LogTag::Database,
                        Level::ERROR,
                        format!("Failed to persist failed hedge: {}", e),
                    );
                }
            }

            Some(record)
        }
    }
}

async fn place<E>(
    exchange: &E,
    risk: &RiskCore,
    last_mark: Option<Decimal>,
    config: &Config,
    snapshot: &PositionSnapshot,
    signed_size: Decimal,
) -> Result<Placed, ExecError>
where
    E: Exchange + Send + Sync + ?Sized,
{
    let size = signed_size.abs();
    let symbol = &config.symbol_perpetual;

    let mark = exchange
        .mark_price(symbol)
        .await
        .map_err(ExecError::Venue)?;

    // The expected-price anchor is the mark observed on the previous
    // executed hedge; the first hedge has nothing to compare against.
    let expected = last_mark.unwrap_or(mark);
    if !risk.check_slippage(expected, mark) {
        return Err(ExecError::Slippage(mark));
    }

    let balance = exchange
        .balance(config.quote_currency())
        .await
        .map_err(ExecError::Venue)?;
    let leverage = risk.calc_leverage(size, balance, mark);

    let (trade, action, new_short) = if signed_size > Decimal::ZERO {
        let trade = exchange
            .open_short(symbol, size, leverage)
            .await
            .map_err(ExecError::Venue)?;
        (trade, HedgeAction::OpenShort, snapshot.short_size + size)
    } else {
        let trade = exchange
            .close_short(symbol, size)
            .await
            .map_err(ExecError::Venue)?;
        (
            trade,
            HedgeAction::CloseShort,
            (snapshot.short_size - size).max(Decimal::ZERO),
        )
    };

    Ok(Placed {
        trade,
        action,
        leverage,
        new_short,
        mark,
    })
}
