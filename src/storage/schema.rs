// src/storage/schema.rs

//! Ledger schema. Monetary columns are TEXT-encoded decimals, instants
//! are INTEGER microseconds since the Unix epoch, enums are TEXT with
//! CHECK constraints.

use sqlx::sqlite::SqlitePool;
use sqlx::Error;
use tracing::info;

pub async fn apply_migrations(pool: &SqlitePool) -> Result<(), Error> {
    info!("Applying ledger migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS position_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            reserve0 TEXT NOT NULL,
            reserve1 TEXT NOT NULL,
            short_size TEXT NOT NULL,
            delta TEXT NOT NULL,
            timestamp_us INTEGER NOT NULL,
            block_number INTEGER,
            pool_address TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_position_snapshots_timestamp
        ON position_snapshots (timestamp_us);
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hedge_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action TEXT NOT NULL CHECK(action IN ('open_short', 'close_short', 'adjust_short')),
            size TEXT NOT NULL,
            price TEXT NOT NULL,
            timestamp_us INTEGER NOT NULL,
            delta_before TEXT NOT NULL,
            delta_after TEXT NOT NULL,
            leverage TEXT NOT NULL,
            venue TEXT NOT NULL,
            order_id TEXT,
            gas_cost TEXT,
            success INTEGER NOT NULL,
            error_message TEXT
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_hedge_records_timestamp
        ON hedge_records (timestamp_us);
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('buy', 'sell')),
            order_type TEXT NOT NULL CHECK(order_type IN ('market', 'limit', 'stop', 'stop_limit')),
            size TEXT NOT NULL,
            price TEXT NOT NULL,
            timestamp_us INTEGER NOT NULL,
            order_id TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL CHECK(status IN ('pending', 'open', 'filled', 'cancelled', 'failed')),
            fee TEXT,
            fee_currency TEXT,
            venue TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_trades_timestamp
        ON trades (timestamp_us);
        "#,
    )
    .execute(pool)
    .await?;

    info!("Ledger migrations applied successfully.");
    Ok(())
}
