//! Repository Pattern Abstractions
//!
//! Candle storage is keyed by `(symbol, timestamp)`; writes are upserts so a
//! forming bar can be stored repeatedly and the last write wins.

use crate::domain::market::types::Candle;
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::TimeDelta;

/// Open-time cutoff (ms) for keeping `days` of history before `now_ms`.
///
/// Retention must cover at least one day; a non-positive window would move
/// the cutoff to or past "now" and delete live data.
pub fn retention_cutoff_ms(now_ms: i64, days: i64) -> Result<i64> {
    if days < 1 {
        bail!("Retention must be at least 1 day, got {}", days);
    }
    let window = TimeDelta::try_days(days)
        .ok_or_else(|| anyhow!("Retention of {} days is out of range", days))?;
    now_ms
        .checked_sub(window.num_milliseconds())
        .ok_or_else(|| anyhow!("Retention of {} days is out of range", days))
}

#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Insert the candle, or replace OHLCV of the stored bar with the same identity.
    async fn upsert(&self, candle: &Candle) -> Result<()>;

    /// Upsert many candles; returns how many were written.
    async fn upsert_batch(&self, candles: &[Candle]) -> Result<usize>;

    /// Most recent stored bar for the symbol.
    async fn find_latest(&self, symbol: &str) -> Result<Option<Candle>>;

    /// The newest `limit` bars, returned oldest first.
    async fn find_last(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>>;

    /// Bars with `start_ts <= timestamp <= end_ts`, oldest first.
    async fn get_range(&self, symbol: &str, start_ts: i64, end_ts: i64) -> Result<Vec<Candle>>;

    async fn count(&self, symbol: &str) -> Result<usize>;

    /// Delete bars older than the retention window; returns rows removed.
    async fn prune(&self, days_retention: i64) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400_000;

    #[test]
    fn test_retention_cutoff() {
        let now = 1_704_067_200_000;
        assert_eq!(retention_cutoff_ms(now, 1).unwrap(), now - DAY);
        assert_eq!(retention_cutoff_ms(now, 30).unwrap(), now - 30 * DAY);
    }

    #[test]
    fn test_retention_rejects_non_positive_days() {
        assert!(retention_cutoff_ms(1_704_067_200_000, 0).is_err());
        assert!(retention_cutoff_ms(1_704_067_200_000, -1).is_err());
    }

    #[test]
    fn test_retention_rejects_overflowing_days() {
        assert!(retention_cutoff_ms(1_704_067_200_000, i64::MAX).is_err());
        assert!(retention_cutoff_ms(i64::MIN + 1, 2).is_err());
    }
}
