// src/monitor.rs

//! Periodic aggregator: polls pool reserves and the venue position,
//! pairs them into snapshots and feeds the registered consumer. One tick
//! is in flight at a time; the consumer callback completes before the
//! next sleep begins.

use anyhow::Result;
use chrono::Utc;
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn, Level};

use crate::config::{Config, MainnetConfig};
use crate::exchange::Exchange;
use crate::logger::{self, LogTag};
use crate::models::PositionSnapshot;
use crate::pool::{PoolReader, PoolStatus};
use crate::storage::Ledger;

pub type SnapshotCallback =
    Box<dyn FnMut(PositionSnapshot) -> BoxFuture<'static, Result<()>> + Send>;

/// Tick-loop parameters, derived from the loaded configuration.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub symbol: String,
    pub quote_currency: String,
    pub poll_interval: Duration,
    pub desync_warning_percent: Decimal,
    /// Funding rate (percent per interval) above which a warning fires;
    /// `None` disables the periodic check.
    pub funding_rate_threshold_percent: Option<Decimal>,
    pub funding_check_interval: Duration,
}

impl MonitorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            symbol: cfg.symbol_perpetual.clone(),
            quote_currency: cfg.quote_currency().to_string(),
            poll_interval: Duration::from_secs(cfg.poll_interval_seconds),
            desync_warning_percent: dec!(5),
            funding_rate_threshold_percent: None,
            funding_check_interval: Duration::from_secs(28_800),
        }
    }

    pub fn from_mainnet(cfg: &MainnetConfig) -> Self {
        Self {
            symbol: cfg.base.symbol_perpetual.clone(),
            quote_currency: cfg.base.quote_currency().to_string(),
            poll_interval: Duration::from_secs(cfg.base.poll_interval_seconds),
            desync_warning_percent: cfg.desync_warning_percent,
            funding_rate_threshold_percent: Some(cfg.funding_rate_threshold),
            funding_check_interval: Duration::from_secs(cfg.funding_rate_check_interval_seconds),
        }
    }
}

pub struct SwapMonitor<E> {
    reader: PoolReader,
    exchange: E,
    ledger: Option<Ledger>,
    settings: MonitorSettings,
    callback: Option<SnapshotCallback>,
    last_snapshot: Arc<Mutex<Option<PositionSnapshot>>>,
    ledger_failures: Arc<AtomicU64>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl<E> SwapMonitor<E>
where
    E: Exchange + Clone + Send + Sync + 'static,
{
    pub fn new(
        reader: PoolReader,
        exchange: E,
        ledger: Option<Ledger>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            reader,
            exchange,
            ledger,
            settings,
            callback: None,
            last_snapshot: Arc::new(Mutex::new(None)),
            ledger_failures: Arc::new(AtomicU64::new(0)),
            stop_tx: None,
            task: None,
        }
    }

    /// Register the snapshot consumer. Must be called before `start`.
    pub fn set_snapshot_callback(&mut self, callback: SnapshotCallback) {
        self.callback = Some(callback);
    }

    /// Spawn the tick loop. A second call while running is a no-op.
    pub fn start(&mut self) {
        if self.task.is_some() {
            warn!("Monitoring already started");
            return;
        }

        logger::log(LogTag::Rpc, Level::INFO, "Starting swap monitoring".to_string());

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(monitor_loop(
            self.reader.clone(),
            self.exchange.clone(),
            self.ledger.clone(),
            self.settings.clone(),
            self.callback.take(),
            self.last_snapshot.clone(),
            self.ledger_failures.clone(),
            stop_rx,
        ));

        self.stop_tx = Some(stop_tx);
        self.task = Some(task);
    }

    /// Signal cancellation and wait for the loop to exit at its next
    /// await point. The in-flight call is allowed to complete.
    pub async fn stop(&mut self) {
        let Some(stop_tx) = self.stop_tx.take() else {
            return;
        };
        let _ = stop_tx.send(true);

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        logger::log(LogTag::Rpc, Level::INFO, "Stopped swap monitoring".to_string());
    }

    /// Run a single aggregation tick without the loop. Exposed for
    /// diagnostics and tests.
    pub async fn tick(&self) -> Result<(PositionSnapshot, PoolStatus)> {
        let result = run_tick(
            &self.reader,
            &self.exchange,
            self.ledger.as_ref(),
            &self.settings,
            &self.ledger_failures,
        )
        .await?;
        *self.last_snapshot.lock().await = Some(result.0.clone());
        Ok(result)
    }

    pub async fn last_snapshot(&self) -> Option<PositionSnapshot> {
        self.last_snapshot.lock().await.clone()
    }

    /// Snapshots persisted during the past `hours` hours.
    pub async fn historical_snapshots(&self, hours: i64, limit: i64) -> Result<Vec<PositionSnapshot>> {
        let Some(ledger) = &self.ledger else {
            return Ok(Vec::new());
        };
        let start = Utc::now() - chrono::Duration::hours(hours);
        ledger.snapshots_in_range(Some(start), None, limit).await
    }

    /// Health probe: chain head readable and venue balance reachable.
    pub async fn check_connection(&self) -> bool {
        if let Err(e) = self.reader.block_number().await {
            logger::log(
                LogTag::Rpc,
                Level::WARN,
                format!("RPC connection check failed: {}", e),
            );
            return false;
        }
        if let Err(e) = self.exchange.balance(&self.settings.quote_currency).await {
            logger::log(
                LogTag::Exchange,
                Level::WARN,
                format!("Venue connection check failed: {}", e),
            );
            return false;
        }
        true
    }

    /// Number of snapshot persistence failures since startup.
    pub fn ledger_failures(&self) -> u64 {
        self.ledger_failures.load(Ordering::Relaxed)
    }
}

#[allow(clippy::too_many_arguments)]
async fn monitor_loop<E>(
    reader: PoolReader,
    exchange: E,
    ledger: Option<Ledger>,
    settings: MonitorSettings,
    mut callback: Option<SnapshotCallback>,
    last_snapshot: Arc<Mutex<Option<PositionSnapshot>>>,
    ledger_failures: Arc<AtomicU64>,
    mut stop_rx: watch::Receiver<bool>,
) where
    E: Exchange + Send + Sync,
{
    let mut next_funding_check = Instant::now();

    loop {
        if *stop_rx.borrow() {
            break;
        }

        match run_tick(&reader, &exchange, ledger.as_ref(), &settings, &ledger_failures).await {
            Ok((snapshot, status)) => {
                *last_snapshot.lock().await = Some(snapshot.clone());

                // Only an unlocked pool drives hedging; the snapshot is
                // already recorded either way.
                if status == PoolStatus::Unlocked {
                    if let Some(cb) = callback.as_mut() {
                        if let Err(e) = cb(snapshot).await {
                            logger::log(
                                LogTag::Strategy,
                                Level::ERROR,
                                format!("Snapshot consumer failed: {}", e),
                            );
                        }
                    }
                }
            }
            Err(e) => {
                logger::log(LogTag::Rpc, Level::WARN, format!("Monitor tick failed: {}", e));
            }
        }

        if settings.funding_rate_threshold_percent.is_some()
            && Instant::now() >= next_funding_check
        {
            check_funding_rate(&exchange, &settings).await;
            next_funding_check = Instant::now() + settings.funding_check_interval;
        }

        tokio::select! {
            _ = tokio::time::sleep(settings.poll_interval) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    info!("Monitor loop exited.");
}

async fn run_tick<E>(
    reader: &PoolReader,
    exchange: &E,
    ledger: Option<&Ledger>,
    settings: &MonitorSettings,
    ledger_failures: &AtomicU64,
) -> Result<(PositionSnapshot, PoolStatus)>
where
    E: Exchange + Send + Sync,
{
    let (reserve0, reserve1, status) = reader.reserves().await?;
    match status {
        PoolStatus::Unactivated => {
            logger::log(LogTag::Rpc, Level::WARN, "Pool is not activated".to_string());
        }
        PoolStatus::Locked => {
            logger::log(LogTag::Rpc, Level::WARN, "Pool is locked (reentrancy)".to_string());
        }
        PoolStatus::Unlocked => {}
    }

    match reader.params().await {
        Ok(params) => {
            if params.is_desynchronized((reserve0, reserve1), settings.desync_warning_percent) {
                logger::log(
                    LogTag::Rpc,
                    Level::WARN,
                    "Reserves desynchronized from equilibrium".to_string(),
                );
            }
        }
        Err(e) => debug!("Pool params unavailable for desync check: {}", e),
    }

    let block_number = reader.block_number().await.ok();

    let position = exchange.position(&settings.symbol).await?;
    let short_size = position.short_size();

    let snapshot = PositionSnapshot {
        reserve0,
        reserve1,
        short_size,
        timestamp: Utc::now(),
        block_number,
        pool_address: reader.pool_address(),
    };

    logger::log(
        LogTag::PositionPolling,
        Level::INFO,
        format!(
            "token0: {}, token1: {}, short: {}, delta: {}",
            reserve0,
            reserve1,
            short_size,
            snapshot.delta()
        ),
    );

    // Persistence is best-effort; the control loop never stalls on it.
    if let Some(ledger) = ledger {
        if let Err(e) = ledger.insert_snapshot(&snapshot).await {
            ledger_failures.fetch_add(1, Ordering::Relaxed);
            logger::log(
                LogTag::Database,
                Level::ERROR,
                format!("Failed to persist snapshot: {}", e),
            );
        }
    }

    Ok((snapshot, status))
}

async fn check_funding_rate<E>(exchange: &E, settings: &MonitorSettings)
where
    E: Exchange + Send + Sync,
{
    let Some(threshold_percent) = settings.funding_rate_threshold_percent else {
        return;
    };

    match exchange.funding_rate(&settings.symbol).await {
        Ok(rate) => {
            debug!(%rate, "Funding rate check");
            if rate.abs() > threshold_percent / Decimal::ONE_HUNDRED {
                logger::log(
                    LogTag::Exchange,
                    Level::WARN,
                    format!(
                        "High funding rate detected: {}% per interval",
                        rate * Decimal::ONE_HUNDRED
                    ),
                );
            }
        }
        Err(e) => {
            logger::log(
                LogTag::Exchange,
                Level::WARN,
                format!("Funding rate check failed: {}", e),
            );
        }
    }
}
