//! In-Memory Repository Implementations
//!
//! Thread-safe, in-memory implementation of `CandleRepository`, used by the
//! mock mode and the tests. Data is lost on restart.

use crate::domain::market::types::Candle;
use crate::domain::repositories::{CandleRepository, retention_cutoff_ms};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type Series = BTreeMap<i64, Candle>;

/// Candles per symbol, ordered by open time
pub struct InMemoryCandleRepository {
    candles: Arc<RwLock<HashMap<String, Series>>>,
}

impl InMemoryCandleRepository {
    pub fn new() -> Self {
        Self {
            candles: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCandleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn upsert(&self, candle: &Candle) -> Result<()> {
        self.candles
            .write()
            .await
            .entry(candle.symbol.clone())
            .or_default()
            .insert(candle.timestamp, candle.clone());
        Ok(())
    }

    async fn upsert_batch(&self, candles: &[Candle]) -> Result<usize> {
        let mut store = self.candles.write().await;
        for candle in candles {
            store
                .entry(candle.symbol.clone())
                .or_default()
                .insert(candle.timestamp, candle.clone());
        }
        Ok(candles.len())
    }

    async fn find_latest(&self, symbol: &str) -> Result<Option<Candle>> {
        let store = self.candles.read().await;
        Ok(store
            .get(symbol)
            .and_then(|series| series.values().next_back().cloned()))
    }

    async fn find_last(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>> {
        let store = self.candles.read().await;
        let Some(series) = store.get(symbol) else {
            return Ok(Vec::new());
        };
        let skip = series.len().saturating_sub(limit);
        Ok(series.values().skip(skip).cloned().collect())
    }

    async fn get_range(&self, symbol: &str, start_ts: i64, end_ts: i64) -> Result<Vec<Candle>> {
        if start_ts > end_ts {
            return Ok(Vec::new());
        }
        let store = self.candles.read().await;
        Ok(store
            .get(symbol)
            .map(|series| series.range(start_ts..=end_ts).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default())
    }

    async fn count(&self, symbol: &str) -> Result<usize> {
        Ok(self
            .candles
            .read()
            .await
            .get(symbol)
            .map(BTreeMap::len)
            .unwrap_or(0))
    }

    async fn prune(&self, days_retention: i64) -> Result<u64> {
        let cutoff_ms = retention_cutoff_ms(Utc::now().timestamp_millis(), days_retention)?;
        let mut removed = 0u64;
        for series in self.candles.write().await.values_mut() {
            let kept = series.split_off(&cutoff_ms);
            removed += series.len() as u64;
            *series = kept;
        }
        Ok(removed)
    }
}
