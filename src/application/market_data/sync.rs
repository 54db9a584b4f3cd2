//! History synchronisation between the exchange and the candle store.
//!
//! An empty store is seeded with the most recent `history_seed_limit` bars.
//! Otherwise only the gap since the newest stored bar is fetched, starting at
//! that bar (inclusive) so a bar stored while still forming gets its final
//! values. A gap wider than `max_gap_pages` pages is not paged at all: the
//! newest bars are fetched instead, leaving the hole behind the analysis
//! window rather than in front of the live bar.

use crate::domain::market::timeframe::Timeframe;
use crate::domain::ports::MarketDataService;
use crate::domain::repositories::CandleRepository;
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Binance caps a klines page at 1000 bars.
const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    pub history_seed_limit: usize,
    pub max_gap_pages: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            history_seed_limit: 1000,
            max_gap_pages: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Seeded,
    GapFilled,
    /// Gap too wide to page; newest bars fetched instead
    Reseeded,
    UpToDate,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Seeded => "seeded",
            SyncMode::GapFilled => "gap_filled",
            SyncMode::Reseeded => "reseeded",
            SyncMode::UpToDate => "up_to_date",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: SyncMode,
    /// Candles returned by the exchange
    pub fetched: usize,
    /// Candles written to the repository
    pub stored: usize,
    pub pages: usize,
}

pub struct MarketDataSync {
    market_data: Arc<dyn MarketDataService>,
    repository: Arc<dyn CandleRepository>,
    config: SyncConfig,
    metrics: Option<Metrics>,
}

impl MarketDataSync {
    pub fn new(
        market_data: Arc<dyn MarketDataService>,
        repository: Arc<dyn CandleRepository>,
        config: SyncConfig,
    ) -> Self {
        Self {
            market_data,
            repository,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn seed_history(&self, symbol: &str, timeframe: Timeframe) -> Result<SyncReport> {
        self.seed_history_at(symbol, timeframe, Utc::now().timestamp_millis())
            .await
    }

    /// Same as [`seed_history`](Self::seed_history) with an explicit "now" (ms).
    pub async fn seed_history_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now_ms: i64,
    ) -> Result<SyncReport> {
        let latest = self
            .repository
            .find_latest(symbol)
            .await
            .context("Failed to read newest stored candle")?;

        let report = match latest {
            None => {
                info!("No stored history for {}", symbol);
                self.seed(symbol, timeframe, SyncMode::Seeded).await?
            }
            Some(last) => self.fill_gap(symbol, timeframe, last.timestamp, now_ms).await?,
        };

        if let Some(metrics) = &self.metrics {
            metrics.add_history_synced(symbol, report.mode.as_str(), report.stored);
        }
        Ok(report)
    }

    async fn seed(&self, symbol: &str, timeframe: Timeframe, mode: SyncMode) -> Result<SyncReport> {
        let limit = self.page_size();
        info!("Seeding last {} {} candles for {}", limit, timeframe, symbol);

        let candles = self
            .market_data
            .get_klines(symbol, timeframe, limit, None)
            .await
            .with_context(|| format!("Failed to fetch seed history for {}", symbol))?;
        let stored = self.repository.upsert_batch(&candles).await?;

        info!("Seeded {} candles for {}", stored, symbol);
        Ok(SyncReport {
            mode,
            fetched: candles.len(),
            stored,
            pages: 1,
        })
    }

    async fn fill_gap(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        last_stored: i64,
        now_ms: i64,
    ) -> Result<SyncReport> {
        if timeframe.bars_between(last_stored, now_ms) == 0 {
            debug!("{} history is up to date", symbol);
            return Ok(SyncReport {
                mode: SyncMode::UpToDate,
                fetched: 0,
                stored: 0,
                pages: 0,
            });
        }

        let page_size = self.page_size();
        // The first page starts at the stored bar itself
        let missing = timeframe.bars_between(last_stored, now_ms).saturating_add(1);
        let budget = self.config.max_gap_pages.saturating_mul(page_size);
        if usize::try_from(missing).unwrap_or(usize::MAX) > budget {
            warn!(
                "{} gap of {} {} bars exceeds {} pages of {}; fetching the newest bars instead",
                symbol, missing, timeframe, self.config.max_gap_pages, page_size
            );
            return self.seed(symbol, timeframe, SyncMode::Reseeded).await;
        }

        let current_bar = timeframe.period_start(now_ms);
        let mut report = SyncReport {
            mode: SyncMode::GapFilled,
            fetched: 0,
            stored: 0,
            pages: 0,
        };
        let mut cursor = last_stored;
        let mut complete = false;

        info!(
            "Filling {} gap of ~{} {} bars from {}",
            symbol,
            timeframe.bars_between(last_stored, now_ms),
            timeframe,
            last_stored
        );

        while report.pages < self.config.max_gap_pages {
            let page = self
                .market_data
                .get_klines(symbol, timeframe, page_size, Some(cursor))
                .await
                .with_context(|| format!("Failed to fetch {} klines from {}", symbol, cursor))?;
            report.pages += 1;
            report.fetched += page.len();

            let Some(newest) = page.last().map(|c| c.timestamp) else {
                complete = true;
                break;
            };
            report.stored += self.repository.upsert_batch(&page).await?;

            let next = newest + timeframe.to_millis();
            if page.len() < page_size || newest >= current_bar || next <= cursor {
                complete = true;
                break;
            }
            cursor = next;
        }

        if !complete {
            warn!(
                "Gap fill for {} stopped after {} pages; the newest bars may be missing",
                symbol, report.pages
            );
        }
        info!(
            "Gap fill for {}: {} candles stored in {} pages",
            symbol, report.stored, report.pages
        );
        Ok(report)
    }

    fn page_size(&self) -> usize {
        self.config.history_seed_limit.clamp(1, MAX_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::types::Candle;
    use crate::infrastructure::mock::MockMarketDataService;
    use crate::infrastructure::repositories::InMemoryCandleRepository;
    use rust_decimal::Decimal;

    // 2024-01-01 00:00:00 UTC
    const BASE: i64 = 1_704_067_200_000;
    const HOUR: i64 = 3_600_000;

    fn series(count: usize) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                let price = Decimal::from(100 + i as i64);
                Candle {
                    symbol: "BTCUSDT".to_string(),
                    open: price,
                    high: price + Decimal::ONE,
                    low: price - Decimal::ONE,
                    close: price,
                    volume: Decimal::TEN,
                    timestamp: BASE + i as i64 * HOUR,
                }
            })
            .collect()
    }

    async fn setup(
        exchange: Vec<Candle>,
        stored: &[Candle],
        config: SyncConfig,
    ) -> (MarketDataSync, Arc<MockMarketDataService>, Arc<InMemoryCandleRepository>) {
        let mock = Arc::new(MockMarketDataService::new_no_sim());
        mock.set_history(exchange).await;
        let repo = Arc::new(InMemoryCandleRepository::new());
        repo.upsert_batch(stored).await.unwrap();
        let sync = MarketDataSync::new(mock.clone(), repo.clone(), config);
        (sync, mock, repo)
    }

    #[tokio::test]
    async fn test_empty_store_is_seeded_with_latest_bars() {
        let all = series(300);
        let now = all[299].timestamp + HOUR / 2;
        let config = SyncConfig {
            history_seed_limit: 200,
            max_gap_pages: 50,
        };
        let (sync, mock, repo) = setup(all.clone(), &[], config).await;

        let report = sync.seed_history_at("BTCUSDT", Timeframe::OneHour, now).await.unwrap();

        assert_eq!(report.mode, SyncMode::Seeded);
        assert_eq!(report.stored, 200);
        assert_eq!(repo.count("BTCUSDT").await.unwrap(), 200);
        let latest = repo.find_latest("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(latest.timestamp, all[299].timestamp);

        let requests = mock.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].limit, 200);
        assert_eq!(requests[0].start_time, None);
    }

    #[tokio::test]
    async fn test_gap_fill_pages_from_last_stored_bar() {
        let all = series(250);
        let now = all[249].timestamp + HOUR / 2;
        let config = SyncConfig {
            history_seed_limit: 60,
            max_gap_pages: 50,
        };
        let (sync, mock, repo) = setup(all.clone(), &all[..100], config).await;

        let report = sync.seed_history_at("BTCUSDT", Timeframe::OneHour, now).await.unwrap();

        assert_eq!(report.mode, SyncMode::GapFilled);
        assert_eq!(repo.count("BTCUSDT").await.unwrap(), 250);

        // Pages of 60 from bar 99 (inclusive): 99..159, 159..219, 219..250 (short)
        let starts: Vec<Option<i64>> = mock.requests().await.iter().map(|r| r.start_time).collect();
        assert_eq!(
            starts,
            vec![
                Some(all[99].timestamp),
                Some(all[159].timestamp),
                Some(all[219].timestamp)
            ]
        );
        assert_eq!(report.pages, 3);
        assert_eq!(report.fetched, 60 + 60 + 31);
    }

    #[tokio::test]
    async fn test_gap_fill_refreshes_last_stored_bar() {
        let all = series(10);
        let mut stale = all[5].clone();
        stale.close = Decimal::ZERO;
        let mut stored = all[..5].to_vec();
        stored.push(stale);
        let now = all[9].timestamp + 1;
        let (sync, _mock, repo) = setup(all.clone(), &stored, SyncConfig::default()).await;

        sync.seed_history_at("BTCUSDT", Timeframe::OneHour, now).await.unwrap();

        let refreshed = repo
            .get_range("BTCUSDT", all[5].timestamp, all[5].timestamp)
            .await
            .unwrap();
        assert_eq!(refreshed[0].close, all[5].close);
    }

    #[tokio::test]
    async fn test_current_bar_stored_is_up_to_date() {
        let all = series(10);
        let now = all[9].timestamp + HOUR / 2;
        let (sync, mock, _repo) = setup(all.clone(), &all, SyncConfig::default()).await;

        let report = sync.seed_history_at("BTCUSDT", Timeframe::OneHour, now).await.unwrap();

        assert_eq!(report.mode, SyncMode::UpToDate);
        assert!(mock.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_gap_within_page_budget_is_paged() {
        let all = series(105);
        let now = all[104].timestamp + 1;
        let config = SyncConfig {
            history_seed_limit: 50,
            max_gap_pages: 2,
        };
        let (sync, mock, repo) = setup(all.clone(), &all[..10], config).await;

        let report = sync.seed_history_at("BTCUSDT", Timeframe::OneHour, now).await.unwrap();

        // 96 bars from bar 9 fit two pages of 50: 9..59, 59..105 (short)
        assert_eq!(report.mode, SyncMode::GapFilled);
        assert_eq!(report.pages, 2);
        assert_eq!(mock.requests().await.len(), 2);
        assert_eq!(repo.count("BTCUSDT").await.unwrap(), 105);
    }

    #[tokio::test]
    async fn test_gap_beyond_page_budget_fetches_newest_bars() {
        let all = series(500);
        let now = all[499].timestamp + 1;
        let config = SyncConfig {
            history_seed_limit: 50,
            max_gap_pages: 2,
        };
        let (sync, mock, repo) = setup(all.clone(), &all[..10], config).await;

        let report = sync.seed_history_at("BTCUSDT", Timeframe::OneHour, now).await.unwrap();

        assert_eq!(report.mode, SyncMode::Reseeded);
        assert_eq!(report.pages, 1);
        let requests = mock.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].start_time, None);

        // The recent window is contiguous up to the newest exchange bar
        let window = repo.find_last("BTCUSDT", 50).await.unwrap();
        let expected: Vec<i64> = all[450..].iter().map(|c| c.timestamp).collect();
        let actual: Vec<i64> = window.iter().map(|c| c.timestamp).collect();
        assert_eq!(actual, expected);
        assert_eq!(repo.count("BTCUSDT").await.unwrap(), 60);
    }
}
