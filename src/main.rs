// src/main.rs

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use lphedger::config::MainnetConfig;
use lphedger::exchange::{binance, Binance, Exchange};
use lphedger::logger;
use lphedger::monitor::{MonitorSettings, SwapMonitor};
use lphedger::pool::PoolReader;
use lphedger::risk::{RiskCore, RiskLimits};
use lphedger::storage;
use lphedger::strategy::StrategyCore;

#[tokio::main]
async fn main() -> Result<()> {
    // 1) Config and logging. Any failure here is fatal and exits nonzero.
    let cfg = MainnetConfig::load()?;
    logger::init(&cfg.base)?;
    info!(
        "Config loaded. Pool {}, symbol {}, poll interval {}s",
        cfg.base.pool_address, cfg.base.symbol_perpetual, cfg.base.poll_interval_seconds
    );

    // 2) Ledger, with the retention sweep applied at startup
    let ledger = storage::connect(&cfg.base.database_url).await?;
    info!("Connected to ledger: {}", cfg.base.database_url);
    match ledger.cleanup_old_data(storage::DEFAULT_RETENTION_DAYS).await {
        Ok(deleted) if deleted > 0 => info!("Retention sweep removed {} old rows", deleted),
        Ok(_) => {}
        Err(e) => tracing::warn!("Retention sweep failed: {}", e),
    }

    // 3) Venue client
    let base_url = if cfg.base.venue_testnet {
        binance::TESTNET_BASE_URL
    } else {
        binance::MAINNET_BASE_URL
    };
    info!("Using venue base URL: {}", base_url);

    let mut exchange = Binance::new(
        &cfg.base.venue_api_key,
        &cfg.base.venue_api_secret,
        base_url,
        cfg.base.default_leverage,
    )?;
    exchange.connect().await?;

    // 4) Pool reader
    let call_timeout = Duration::from_secs(cfg.base.retry_delay_seconds.max(1) * 5);
    let reader = PoolReader::new(
        &cfg.base.rpc_url,
        &cfg.base.pool_address,
        cfg.token0_decimals,
        cfg.token1_decimals,
        call_timeout,
    )?;

    // 5) Strategy with its risk core
    let risk = RiskCore::new(&cfg.base, RiskLimits::from_mainnet(&cfg));
    let strategy = Arc::new(StrategyCore::new(
        cfg.base.clone(),
        exchange.clone(),
        risk,
        Some(ledger.clone()),
    ));
    strategy.clear_hedge_gate().await;

    // 6) Monitor feeding the strategy
    let mut monitor = SwapMonitor::new(
        reader,
        exchange.clone(),
        Some(ledger.clone()),
        MonitorSettings::from_mainnet(&cfg),
    );
    {
        let strategy = strategy.clone();
        monitor.set_snapshot_callback(Box::new(move |snapshot| {
            let strategy = strategy.clone();
            Box::pin(async move {
                strategy.process_snapshot(&snapshot).await?;
                Ok(())
            })
        }));
    }

    if !monitor.check_connection().await {
        tracing::warn!("Connection probe failed; starting anyway, ticks will retry");
    }
    monitor.start();
    info!("Hedging loop started. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping...");

    monitor.stop().await;
    exchange.disconnect().await?;

    let stats = strategy.stats().await;
    info!(
        "Final stats: {} hedges total, {} successful, {} failed ({:.1}%)",
        stats.total_hedges,
        stats.successful_hedges,
        stats.failed_hedges,
        stats.success_rate_percent
    );

    Ok(())
}
