use crate::domain::market::types::Candle;
use crate::domain::repositories::{CandleRepository, retention_cutoff_ms};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;

const UPSERT_CANDLE: &str = r#"
    INSERT INTO market_candles (symbol, time, open, high, low, close, volume)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(symbol, time) DO UPDATE SET
        open = excluded.open,
        high = excluded.high,
        low = excluded.low,
        close = excluded.close,
        volume = excluded.volume
"#;

pub struct SqliteCandleRepository {
    pool: SqlitePool,
}

impl SqliteCandleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<Candle> {
        Ok(Candle {
            symbol: row.try_get("symbol")?,
            timestamp: row.try_get("time")?,
            open: decimal_column(row, "open")?,
            high: decimal_column(row, "high")?,
            low: decimal_column(row, "low")?,
            close: decimal_column(row, "close")?,
            volume: decimal_column(row, "volume")?,
        })
    }
}

fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).with_context(|| format!("Corrupt {} value '{}'", column, raw))
}

#[async_trait]
impl CandleRepository for SqliteCandleRepository {
    async fn upsert(&self, candle: &Candle) -> Result<()> {
        sqlx::query(UPSERT_CANDLE)
            .bind(&candle.symbol)
            .bind(candle.timestamp)
            .bind(candle.open.to_string())
            .bind(candle.high.to_string())
            .bind(candle.low.to_string())
            .bind(candle.close.to_string())
            .bind(candle.volume.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to upsert candle")?;

        Ok(())
    }

    async fn upsert_batch(&self, candles: &[Candle]) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for candle in candles {
            sqlx::query(UPSERT_CANDLE)
                .bind(&candle.symbol)
                .bind(candle.timestamp)
                .bind(candle.open.to_string())
                .bind(candle.high.to_string())
                .bind(candle.low.to_string())
                .bind(candle.close.to_string())
                .bind(candle.volume.to_string())
                .execute(&mut *tx)
                .await
                .context("Failed to upsert candle batch")?;
        }
        tx.commit().await.context("Failed to commit candle batch")?;

        debug!("Upserted {} candles", candles.len());
        Ok(candles.len())
    }

    async fn find_latest(&self, symbol: &str) -> Result<Option<Candle>> {
        let row = sqlx::query(
            "SELECT * FROM market_candles WHERE symbol = ? ORDER BY time DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn find_last(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            "SELECT * FROM market_candles WHERE symbol = ? ORDER BY time DESC LIMIT ?",
        )
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut candles = rows.iter().map(Self::map_row).collect::<Result<Vec<_>>>()?;
        candles.reverse();
        Ok(candles)
    }

    async fn get_range(&self, symbol: &str, start_ts: i64, end_ts: i64) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            "SELECT * FROM market_candles WHERE symbol = ? AND time >= ? AND time <= ? ORDER BY time ASC",
        )
        .bind(symbol)
        .bind(start_ts)
        .bind(end_ts)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn count(&self, symbol: &str) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM market_candles WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as usize)
    }

    async fn prune(&self, days_retention: i64) -> Result<u64> {
        let cutoff_ms = retention_cutoff_ms(Utc::now().timestamp_millis(), days_retention)?;

        let result = sqlx::query("DELETE FROM market_candles WHERE time < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
