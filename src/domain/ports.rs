use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::{Candle, MarketEvent};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;

/// Source of candles: history on demand, live klines as a stream.
#[async_trait]
pub trait MarketDataService: Send + Sync {
    /// Open a live kline stream for one symbol and interval.
    async fn subscribe(&self, symbol: &str, timeframe: Timeframe) -> Result<Receiver<MarketEvent>>;

    /// Fetch up to `limit` klines, oldest first.
    ///
    /// Without `start_time` the most recent `limit` bars are returned; with it,
    /// bars whose open time is at or after `start_time` (ms).
    async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        start_time: Option<i64>,
    ) -> Result<Vec<Candle>>;
}
