// src/storage/db.rs

//! Ledger operations. Every write runs in its own transactional scope;
//! on error the transaction rolls back and the error propagates to the
//! caller, which decides whether the failure is fatal.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use super::schema::apply_migrations;
use crate::models::{HedgeAction, HedgeRecord, OrderStatus, PositionSnapshot, Trade};

/// Handle to the append-only snapshot/hedge/trade store. Cheap to clone;
/// all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

/// Connect to the SQLite ledger, creating the file and schema on first use.
pub async fn connect(database_url: &str) -> Result<Ledger> {
    info!("Connecting to ledger: {}", database_url);
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to ledger at {}", database_url))?;

    apply_migrations(&pool).await?;

    info!("Ledger connection pool established.");
    Ok(Ledger { pool })
}

fn decimal_column(row: &SqliteRow, name: &str) -> Result<Decimal> {
    let raw: String = row.try_get(name)?;
    Decimal::from_str(&raw).map_err(|e| anyhow!("Corrupt decimal in column {}: {}", name, e))
}

fn opt_decimal_column(row: &SqliteRow, name: &str) -> Result<Option<Decimal>> {
    let raw: Option<String> = row.try_get(name)?;
    raw.map(|s| {
        Decimal::from_str(&s).map_err(|e| anyhow!("Corrupt decimal in column {}: {}", name, e))
    })
    .transpose()
}

fn timestamp_column(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>> {
    let micros: i64 = row.try_get(name)?;
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| anyhow!("Corrupt timestamp in column {}: {}", name, micros))
}

fn snapshot_from_row(row: &SqliteRow) -> Result<PositionSnapshot> {
    Ok(PositionSnapshot {
        reserve0: decimal_column(row, "reserve0")?,
        reserve1: decimal_column(row, "reserve1")?,
        short_size: decimal_column(row, "short_size")?,
        timestamp: timestamp_column(row, "timestamp_us")?,
        block_number: row
            .try_get::<Option<i64>, _>("block_number")?
            .map(|n| n as u64),
        pool_address: row.try_get("pool_address")?,
    })
}

fn hedge_from_row(row: &SqliteRow) -> Result<HedgeRecord> {
    let action: String = row.try_get("action")?;
    Ok(HedgeRecord {
        action: action.parse::<HedgeAction>()?,
        size: decimal_column(row, "size")?,
        price: decimal_column(row, "price")?,
        timestamp: timestamp_column(row, "timestamp_us")?,
        delta_before: decimal_column(row, "delta_before")?,
        delta_after: decimal_column(row, "delta_after")?,
        leverage: decimal_column(row, "leverage")?,
        venue: row.try_get("venue")?,
        order_id: row.try_get("order_id")?,
        gas_cost: opt_decimal_column(row, "gas_cost")?,
        success: row.try_get::<i64, _>("success")? != 0,
        error_message: row.try_get("error_message")?,
    })
}

fn trade_from_row(row: &SqliteRow) -> Result<Trade> {
    let side: String = row.try_get("side")?;
    let order_type: String = row.try_get("order_type")?;
    let status: String = row.try_get("status")?;
    Ok(Trade {
        symbol: row.try_get("symbol")?,
        side: side.parse()?,
        order_type: order_type.parse()?,
        size: decimal_column(row, "size")?,
        price: decimal_column(row, "price")?,
        timestamp: timestamp_column(row, "timestamp_us")?,
        order_id: row.try_get("order_id")?,
        status: status.parse()?,
        fee: opt_decimal_column(row, "fee")?,
        fee_currency: row.try_get("fee_currency")?,
        venue: row.try_get("venue")?,
    })
}

impl Ledger {
    /// Append a snapshot; returns its row id.
    pub async fn insert_snapshot(&self, snapshot: &PositionSnapshot) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO position_snapshots (
                reserve0, reserve1, short_size, delta,
                timestamp_us, block_number, pool_address
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.reserve0.to_string())
        .bind(snapshot.reserve1.to_string())
        .bind(snapshot.short_size.to_string())
        .bind(snapshot.delta().to_string())
        .bind(snapshot.timestamp.timestamp_micros())
        .bind(snapshot.block_number.map(|n| n as i64))
        .bind(&snapshot.pool_address)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn latest_snapshot(&self) -> Result<Option<PositionSnapshot>> {
        let row = sqlx::query(
            r#"
            SELECT reserve0, reserve1, short_size, timestamp_us, block_number, pool_address
            FROM position_snapshots
            ORDER BY timestamp_us DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(snapshot_from_row).transpose()
    }

    /// Snapshots inside [start, end], newest first.
    pub async fn snapshots_in_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<PositionSnapshot>> {
        let start_us = start.map(|t| t.timestamp_micros()).unwrap_or(i64::MIN);
        let end_us = end.map(|t| t.timestamp_micros()).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r#"
            SELECT reserve0, reserve1, short_size, timestamp_us, block_number, pool_address
            FROM position_snapshots
            WHERE timestamp_us >= ? AND timestamp_us <= ?
            ORDER BY timestamp_us DESC
            LIMIT ?
            "#,
        )
        .bind(start_us)
        .bind(end_us)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }

    /// Append a hedge record and, when present, its venue trade in one
    /// transaction. A hedge is never persisted without its fill.
    pub async fn insert_hedge(&self, hedge: &HedgeRecord, trade: Option<&Trade>) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO hedge_records (
                action, size, price, timestamp_us,
                delta_before, delta_after, leverage, venue,
                order_id, gas_cost, success, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(hedge.action.to_string())
        .bind(hedge.size.to_string())
        .bind(hedge.price.to_string())
        .bind(hedge.timestamp.timestamp_micros())
        .bind(hedge.delta_before.to_string())
        .bind(hedge.delta_after.to_string())
        .bind(hedge.leverage.to_string())
        .bind(&hedge.venue)
        .bind(hedge.order_id.as_deref())
        .bind(hedge.gas_cost.map(|g| g.to_string()))
        .bind(hedge.success as i64)
        .bind(hedge.error_message.as_deref())
        .execute(&mut *tx)
        .await?;

        if let Some(trade) = trade {
            sqlx::query(
                r#"
                INSERT INTO trades (
                    symbol, side, order_type, size, price,
                    timestamp_us, order_id, status, fee, fee_currency, venue
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&trade.symbol)
            .bind(trade.side.to_string())
            .bind(trade.order_type.to_string())
            .bind(trade.size.to_string())
            .bind(trade.price.to_string())
            .bind(trade.timestamp.timestamp_micros())
            .bind(&trade.order_id)
            .bind(trade.status.to_string())
            .bind(trade.fee.map(|f| f.to_string()))
            .bind(trade.fee_currency.as_deref())
            .bind(&trade.venue)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    /// Hedge records inside [start, end], newest first.
    pub async fn hedges_in_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<HedgeRecord>> {
        let start_us = start.map(|t| t.timestamp_micros()).unwrap_or(i64::MIN);
        let end_us = end.map(|t| t.timestamp_micros()).unwrap_or(i64::MAX);

        let rows = sqlx::query(
            r#"
            SELECT action, size, price, timestamp_us, delta_before, delta_after,
                   leverage, venue, order_id, gas_cost, success, error_message
            FROM hedge_records
            WHERE timestamp_us >= ? AND timestamp_us <= ?
            ORDER BY timestamp_us DESC
            LIMIT ?
            "#,
        )
        .bind(start_us)
        .bind(end_us)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(hedge_from_row).collect()
    }

    /// Append a standalone trade; returns its row id.
    pub async fn insert_trade(&self, trade: &Trade) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                symbol, side, order_type, size, price,
                timestamp_us, order_id, status, fee, fee_currency, venue
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.symbol)
        .bind(trade.side.to_string())
        .bind(trade.order_type.to_string())
        .bind(trade.size.to_string())
        .bind(trade.price.to_string())
        .bind(trade.timestamp.timestamp_micros())
        .bind(&trade.order_id)
        .bind(trade.status.to_string())
        .bind(trade.fee.map(|f| f.to_string()))
        .bind(trade.fee_currency.as_deref())
        .bind(&trade.venue)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Update a trade's status by venue order id; false when unknown.
    pub async fn update_trade_status(&self, order_id: &str, status: OrderStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE trades SET status = ? WHERE order_id = ?")
            .bind(status.to_string())
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Trades from the past `hours` hours, newest first.
    pub async fn recent_trades(&self, hours: i64, limit: i64) -> Result<Vec<Trade>> {
        let cutoff = (Utc::now() - Duration::hours(hours)).timestamp_micros();

        let rows = sqlx::query(
            r#"
            SELECT symbol, side, order_type, size, price, timestamp_us,
                   order_id, status, fee, fee_currency, venue
            FROM trades
            WHERE timestamp_us >= ?
            ORDER BY timestamp_us DESC
            LIMIT ?
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(trade_from_row).collect()
    }

    /// Retention sweep: drop rows older than `days` across all three
    /// relations. Returns the total number of deleted rows.
    pub async fn cleanup_old_data(&self, days: i64) -> Result<u64> {
        let cutoff = (Utc::now() - Duration::days(days)).timestamp_micros();
        let mut deleted = 0u64;

        let mut tx = self.pool.begin().await?;
        for table in ["position_snapshots", "hedge_records", "trades"] {
            let result = sqlx::query(&format!("DELETE FROM {} WHERE timestamp_us < ?", table))
                .bind(cutoff)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }
        tx.commit().await?;

        info!(deleted, days, "Cleaned up old ledger rows");
        Ok(deleted)
    }
}
