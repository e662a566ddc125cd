// src/risk.rs

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::VecDeque;
use tracing::Level;

use crate::config::{Config, MainnetConfig};
use crate::logger::{self, LogTag};
use crate::models::PositionSnapshot;

pub const DEFAULT_MAX_TRADES_PER_HOUR: usize = 20;

/// Hard limits that gate every hedging decision. The defaults match the
/// conservative standalone profile; a mainnet profile overrides them.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    /// Largest tolerated hedge, in token1 units.
    pub max_position_size: Decimal,
    /// Floor on the quote-currency balance.
    pub min_balance: Decimal,
    /// Cumulative loss that triggers the emergency stop.
    pub emergency_stop_loss: Decimal,
    pub max_trades_per_hour: usize,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size: dec!(100),
            min_balance: dec!(100),
            emergency_stop_loss: dec!(1000),
            max_trades_per_hour: DEFAULT_MAX_TRADES_PER_HOUR,
        }
    }
}

impl RiskLimits {
    pub fn from_mainnet(cfg: &MainnetConfig) -> Self {
        Self {
            max_position_size: cfg.max_position_size,
            min_balance: cfg.min_balance,
            emergency_stop_loss: cfg.emergency_stop_loss,
            max_trades_per_hour: DEFAULT_MAX_TRADES_PER_HOUR,
        }
    }
}

/// Pure decision logic for hedging: thresholds, leverage sizing, the
/// slippage guard and the sliding-window rate limiter. No I/O happens
/// here; the executor reports trades back via `record_trade`.
pub struct RiskCore {
    min_hedge_size: Decimal,
    hedge_threshold: Decimal,
    max_slippage_percent: Decimal,
    default_leverage: Decimal,
    limits: RiskLimits,
    recent_trades: VecDeque<DateTime<Utc>>,
}

impl RiskCore {
    pub fn new(cfg: &Config, limits: RiskLimits) -> Self {
        Self {
            min_hedge_size: cfg.min_hedge_size,
            hedge_threshold: cfg.hedge_threshold,
            max_slippage_percent: cfg.max_slippage_percent,
            default_leverage: cfg.default_leverage,
            limits,
            recent_trades: VecDeque::new(),
        }
    }

    /// Decide whether a hedge is needed and how large. The sign of the
    /// returned size encodes direction: positive opens more short,
    /// negative closes some.
    pub fn should_hedge(&mut self, snapshot: &PositionSnapshot, force: bool) -> (bool, Decimal) {
        let delta = snapshot.delta();

        if !force && delta.abs() <= self.hedge_threshold {
            return (false, Decimal::ZERO);
        }

        if delta.abs() < self.min_hedge_size {
            logger::log(
                LogTag::Risk,
                Level::DEBUG,
                format!(
                    "Hedge size {} below minimum {}",
                    delta, self.min_hedge_size
                ),
            );
            return (false, Decimal::ZERO);
        }

        if delta.abs() > self.limits.max_position_size {
            logger::log(
                LogTag::Risk,
                Level::WARN,
                format!(
                    "Hedge size {} exceeds maximum {}",
                    delta, self.limits.max_position_size
                ),
            );
            return (false, Decimal::ZERO);
        }

        if !self.check_rate_limits() {
            return (false, Decimal::ZERO);
        }

        logger::log(
            LogTag::Risk,
            Level::INFO,
            format!("Hedge required: delta = {}", delta),
        );
        (true, delta)
    }

    /// Leverage for a position of `size` at `price` against the free
    /// balance, clamped to [1, default_leverage].
    pub fn calc_leverage(&self, size: Decimal, balance: Decimal, price: Decimal) -> Decimal {
        let leverage = if balance > Decimal::ZERO {
            let required = size * price / balance;
            required.min(self.default_leverage).max(Decimal::ONE)
        } else {
            Decimal::ONE
        };

        logger::log(
            LogTag::Leverage,
            Level::INFO,
            format!("Using leverage: {}x", leverage),
        );
        leverage
    }

    /// Pass iff the relative distance between expected and market price
    /// stays within the configured percentage. A zero expected price
    /// never passes.
    pub fn check_slippage(&self, expected: Decimal, market: Decimal) -> bool {
        if expected == Decimal::ZERO {
            return false;
        }

        let slippage = ((market - expected) / expected).abs() * Decimal::ONE_HUNDRED;
        if slippage > self.max_slippage_percent {
            logger::log(
                LogTag::Risk,
                Level::WARN,
                format!(
                    "Slippage {}% exceeds maximum {}%",
                    slippage.round_dp(4),
                    self.max_slippage_percent
                ),
            );
            return false;
        }
        true
    }

    /// Sliding one-hour window over executed hedges.
    pub fn check_rate_limits(&mut self) -> bool {
        let cutoff = Utc::now() - Duration::hours(1);
        while matches!(self.recent_trades.front(), Some(ts) if *ts <= cutoff) {
            self.recent_trades.pop_front();
        }

        if self.recent_trades.len() >= self.limits.max_trades_per_hour {
            logger::log(
                LogTag::Risk,
                Level::WARN,
                format!(
                    "Rate limit reached: {} trades in past hour",
                    self.recent_trades.len()
                ),
            );
            return false;
        }
        true
    }

    /// Record an executed hedge for rate limiting. Never persisted.
    pub fn record_trade(&mut self) {
        self.record_trade_at(Utc::now());
    }

    fn record_trade_at(&mut self, timestamp: DateTime<Utc>) {
        self.recent_trades.push_back(timestamp);
    }

    /// Warn-only gate on market conditions; extreme volatility blocks,
    /// a high funding rate only warns.
    pub fn validate_market_conditions(
        &self,
        volatility: Option<Decimal>,
        funding_rate: Option<Decimal>,
    ) -> bool {
        if let Some(vol) = volatility {
            if vol > Decimal::ONE_HUNDRED {
                logger::log(
                    LogTag::Risk,
                    Level::WARN,
                    format!("High volatility detected: {}%", vol),
                );
                return false;
            }
        }

        if let Some(rate) = funding_rate {
            if rate.abs() > dec!(0.01) {
                logger::log(
                    LogTag::Risk,
                    Level::WARN,
                    format!("High funding rate detected: {}%", rate * Decimal::ONE_HUNDRED),
                );
            }
        }
        true
    }

    /// Exposure metrics for one snapshot at the given mark price.
    pub fn position_risk(&self, snapshot: &PositionSnapshot, price: Decimal) -> PositionRisk {
        let long_exposure = snapshot.reserve1 * price;
        let short_exposure = snapshot.short_size * price;
        let delta = snapshot.delta();

        let reference = snapshot.reserve1.max(dec!(0.01));
        let risk_score = (delta.abs() / reference * Decimal::ONE_HUNDRED).min(Decimal::ONE_HUNDRED);

        PositionRisk {
            long_exposure,
            short_exposure,
            net_exposure: long_exposure - short_exposure,
            delta,
            delta_quote: delta * price,
            hedge_required: delta.abs() > self.hedge_threshold,
            risk_score,
        }
    }

    /// True when cumulative losses reach the emergency stop threshold.
    pub fn emergency_stop_check(&self, losses: Decimal) -> bool {
        if losses >= self.limits.emergency_stop_loss {
            logger::log(
                LogTag::Error,
                Level::ERROR,
                format!(
                    "EMERGENCY STOP: losses ({}) reached maximum ({})",
                    losses, self.limits.emergency_stop_loss
                ),
            );
            return true;
        }
        false
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn recent_trade_count(&self) -> usize {
        self.recent_trades.len()
    }
}

/// Exposure summary in token1 and quote units. Risk score is 0-100,
/// lower is better.
#[derive(Debug, Clone)]
pub struct PositionRisk {
    pub long_exposure: Decimal,
    pub short_exposure: Decimal,
    pub net_exposure: Decimal,
    pub delta: Decimal,
    pub delta_quote: Decimal,
    pub hedge_required: bool,
    pub risk_score: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;

    fn risk() -> RiskCore {
        RiskCore::new(&test_config(), RiskLimits::default())
    }

    fn snapshot(reserve1: Decimal, short: Decimal) -> PositionSnapshot {
        PositionSnapshot {
            reserve0: dec!(10000),
            reserve1,
            short_size: short,
            timestamp: Utc::now(),
            block_number: None,
            pool_address: "0x55dcf9455eee8fd3f5eed17606291272cde428a8".into(),
        }
    }

    #[test]
    fn no_hedge_within_threshold() {
        let mut r = risk();
        let (needed, size) = r.should_hedge(&snapshot(dec!(5.0), dec!(5.0)), false);
        assert!(!needed);
        assert_eq!(size, Decimal::ZERO);

        // Exactly at threshold still holds.
        let (needed, _) = r.should_hedge(&snapshot(dec!(5.01), dec!(5.0)), false);
        assert!(!needed);
    }

    #[test]
    fn hedge_size_carries_direction() {
        let mut r = risk();
        let (needed, size) = r.should_hedge(&snapshot(dec!(6.0), dec!(5.0)), false);
        assert!(needed);
        assert_eq!(size, dec!(1.0));

        let (needed, size) = r.should_hedge(&snapshot(dec!(4.5), dec!(5.0)), false);
        assert!(needed);
        assert_eq!(size, dec!(-0.5));
    }

    #[test]
    fn below_minimum_is_skipped_even_when_forced() {
        let mut r = risk();
        let (needed, _) = r.should_hedge(&snapshot(dec!(5.003), dec!(5.0)), false);
        assert!(!needed);
        let (needed, _) = r.should_hedge(&snapshot(dec!(5.003), dec!(5.0)), true);
        assert!(!needed);
    }

    #[test]
    fn force_overrides_threshold_only() {
        let mut r = risk();
        // |delta| = 0.008: above min size (0.005) but under threshold (0.01).
        let (needed, _) = r.should_hedge(&snapshot(dec!(5.008), dec!(5.0)), false);
        assert!(!needed);
        let (needed, size) = r.should_hedge(&snapshot(dec!(5.008), dec!(5.0)), true);
        assert!(needed);
        assert_eq!(size, dec!(0.008));
    }

    #[test]
    fn oversized_delta_is_rejected() {
        let mut r = risk();
        let (needed, _) = r.should_hedge(&snapshot(dec!(150), dec!(0)), false);
        assert!(!needed);
    }

    #[test]
    fn rate_limiter_fills_and_drains() {
        let mut r = risk();
        let snap = snapshot(dec!(6.0), dec!(5.0));

        for _ in 0..DEFAULT_MAX_TRADES_PER_HOUR {
            r.record_trade();
        }
        let (needed, _) = r.should_hedge(&snap, false);
        assert!(!needed, "window full: every hedge must be rejected");

        // Age the whole window past one hour and the gate reopens.
        let old = Utc::now() - Duration::minutes(61);
        r.recent_trades = (0..DEFAULT_MAX_TRADES_PER_HOUR).map(|_| old).collect();
        let (needed, size) = r.should_hedge(&snap, false);
        assert!(needed);
        assert_eq!(size, dec!(1.0));
        assert_eq!(r.recent_trade_count(), 0);
    }

    #[test]
    fn leverage_is_clamped_to_configured_range() {
        let mut cfg = test_config();
        cfg.default_leverage = dec!(2);
        let r = RiskCore::new(&cfg, RiskLimits::default());

        // Raw 0.2x clamps up to 1.
        assert_eq!(r.calc_leverage(dec!(1), dec!(10000), dec!(2000)), dec!(1));
        // Raw 4x clamps down to the cap.
        assert_eq!(r.calc_leverage(dec!(10), dec!(5000), dec!(2000)), dec!(2));
        // Zero balance falls back to 1.
        assert_eq!(r.calc_leverage(dec!(1), Decimal::ZERO, dec!(2000)), dec!(1));
        // In-range raw value passes through.
        assert_eq!(r.calc_leverage(dec!(1.5), dec!(2000), dec!(2000)), dec!(1.5));
    }

    #[test]
    fn slippage_guard_is_symmetric() {
        let r = risk();
        // 0.5% allowed by default.
        assert!(r.check_slippage(dec!(2000), dec!(2010)));
        assert!(r.check_slippage(dec!(2000), dec!(1990)));
        assert!(!r.check_slippage(dec!(2000), dec!(2011)));
        assert!(!r.check_slippage(dec!(2000), dec!(1989)));
        assert!(!r.check_slippage(Decimal::ZERO, dec!(2000)));
    }

    #[test]
    fn emergency_stop_threshold() {
        let r = risk();
        assert!(!r.emergency_stop_check(dec!(999)));
        assert!(r.emergency_stop_check(dec!(1000)));
        assert!(r.emergency_stop_check(dec!(5000)));
    }

    #[test]
    fn funding_rate_only_warns() {
        let r = risk();
        assert!(r.validate_market_conditions(None, Some(dec!(0.05))));
        assert!(!r.validate_market_conditions(Some(dec!(150)), None));
    }

    #[test]
    fn position_risk_metrics() {
        let r = risk();
        let metrics = r.position_risk(&snapshot(dec!(6.0), dec!(5.0)), dec!(2000));
        assert_eq!(metrics.long_exposure, dec!(12000));
        assert_eq!(metrics.short_exposure, dec!(10000));
        assert_eq!(metrics.net_exposure, dec!(2000));
        assert_eq!(metrics.delta_quote, dec!(2000));
        assert!(metrics.hedge_required);
    }
}
