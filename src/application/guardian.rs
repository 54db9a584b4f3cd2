//! The guardian watches one market: every kline update is stored, the recent
//! window is re-analyzed and the resulting tick is broadcast.

use crate::application::analysis::{RegimeAnalyzer, SignalPolicy};
use crate::application::broadcaster::MarketDataBroadcaster;
use crate::application::market_data::sync::{MarketDataSync, SyncReport};
use crate::domain::errors::AnalysisError;
use crate::domain::market::market_regime::{MarketRegime, RegimeAnalysis};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::trade_signal::TradeSignal;
use crate::domain::market::types::{Candle, MarketEvent, MarketTick};
use crate::domain::repositories::CandleRepository;
use crate::infrastructure::observability::{LatestTicks, Metrics};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc::Receiver};
use tracing::{debug, error, info, warn};

/// Recent history plus the current analysis, for consumers that join late.
#[derive(Debug, Clone, Serialize)]
pub struct GuardianSnapshot {
    pub symbol: String,
    pub candles: Vec<Candle>,
    pub analysis: RegimeAnalysis,
}

pub struct Guardian {
    symbol: String,
    repository: Arc<dyn CandleRepository>,
    analyzer: RegimeAnalyzer,
    policy: Mutex<SignalPolicy>,
    broadcaster: Arc<MarketDataBroadcaster>,
    latest: LatestTicks,
    analysis_window: usize,
    metrics: Option<Metrics>,
    backfill: Option<(MarketDataSync, Timeframe)>,
}

impl Guardian {
    pub fn new(
        symbol: impl Into<String>,
        repository: Arc<dyn CandleRepository>,
        analyzer: RegimeAnalyzer,
        broadcaster: Arc<MarketDataBroadcaster>,
        analysis_window: usize,
    ) -> Result<Self, AnalysisError> {
        let ema_period = analyzer.config().ema_period;
        if analysis_window <= ema_period {
            return Err(AnalysisError::WindowTooSmall {
                window: analysis_window,
                ema_period,
            });
        }

        Ok(Self {
            symbol: symbol.into(),
            repository,
            analyzer,
            policy: Mutex::new(SignalPolicy::new()),
            broadcaster,
            latest: Arc::new(RwLock::new(HashMap::new())),
            analysis_window,
            metrics: None,
            backfill: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Refill history through `sync` when the stream reconnects after a drop.
    pub fn with_backfill(mut self, sync: MarketDataSync, timeframe: Timeframe) -> Self {
        self.backfill = Some((sync, timeframe));
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Shared map of the last tick per symbol.
    pub fn latest_ticks(&self) -> LatestTicks {
        self.latest.clone()
    }

    /// Store the candle, re-analyze and broadcast.
    ///
    /// Signals are only derived from closed bars; a forming bar yields `Hold`.
    pub async fn handle_candle(&self, candle: Candle, is_closed: bool) -> Result<MarketTick> {
        let symbol = candle.symbol.clone();

        self.repository
            .upsert(&candle)
            .await
            .with_context(|| format!("Failed to store candle {}", candle))?;

        let window = self
            .repository
            .find_last(&symbol, self.analysis_window)
            .await
            .context("Failed to load analysis window")?;
        let analysis = self.analyzer.analyze(&window)?;

        let signal = if is_closed {
            self.policy.lock().await.evaluate(&symbol, &analysis)
        } else {
            TradeSignal::Hold
        };

        let previous = self
            .latest
            .read()
            .await
            .get(&symbol)
            .filter(|t| t.analysis.is_conclusive())
            .map(|t| t.analysis.regime);
        self.log_regime(&symbol, previous, &analysis);

        if signal.is_actionable() {
            info!(
                "Signal {} for {} at close {} ({})",
                signal, symbol, candle.close, analysis.regime
            );
        }

        if let Some(metrics) = &self.metrics {
            metrics.inc_candles(&symbol, is_closed);
            metrics.record_analysis(&symbol, &analysis);
            if signal.is_actionable() {
                metrics.inc_signals(&symbol, signal);
            }
            if let Some(prev) = previous
                && analysis.is_conclusive()
                && prev != analysis.regime
            {
                metrics.inc_regime_change(&symbol, prev, analysis.regime);
            }
        }

        let tick = MarketTick {
            candle,
            analysis,
            signal,
        };
        self.latest.write().await.insert(symbol, tick.clone());

        let delivered = self.broadcaster.broadcast(&tick).await;
        debug!("Tick for {} delivered to {} listeners", tick.candle.symbol, delivered);

        Ok(tick)
    }

    fn log_regime(&self, symbol: &str, previous: Option<MarketRegime>, analysis: &RegimeAnalysis) {
        if !analysis.is_conclusive() {
            return;
        }
        match previous {
            None => info!("{} initial regime: {}", symbol, analysis.regime),
            Some(prev) if prev != analysis.regime => {
                info!("{} regime change: {} -> {}", symbol, prev, analysis.regime)
            }
            Some(_) => {}
        }
    }

    /// Fetch the bars missed since the newest stored one.
    ///
    /// `None` when no backfill source is configured.
    pub async fn backfill(&self) -> Result<Option<SyncReport>> {
        let Some((sync, timeframe)) = &self.backfill else {
            return Ok(None);
        };
        let report = sync.seed_history(&self.symbol, *timeframe).await?;
        info!(
            "Backfill for {} after reconnect: {} ({} candles stored)",
            self.symbol, report.mode, report.stored
        );
        Ok(Some(report))
    }

    /// Consume market events until the channel closes.
    ///
    /// After a disconnect, history is backfilled before the next kline.
    pub async fn run(&self, mut rx: Receiver<MarketEvent>) {
        info!("Guardian started for {}", self.symbol);
        let mut backfill_pending = false;

        while let Some(event) = rx.recv().await {
            match event {
                MarketEvent::Kline { candle, is_closed } => {
                    if backfill_pending {
                        backfill_pending = false;
                        if let Err(e) = self.backfill().await {
                            warn!("Backfill for {} failed: {:#}", self.symbol, e);
                        }
                    }
                    if let Err(e) = self.handle_candle(candle, is_closed).await {
                        error!("Guardian failed to process candle: {:#}", e);
                    }
                }
                MarketEvent::Disconnected { reason } => {
                    warn!("Market data disconnected: {}", reason);
                    backfill_pending = true;
                }
            }
        }

        info!("Guardian for {}: market event channel closed", self.symbol);
    }

    pub async fn snapshot(&self, limit: usize) -> Result<GuardianSnapshot> {
        self.snapshot_for(&self.symbol, limit).await
    }

    /// Last `limit` candles (oldest first) and the current analysis.
    pub async fn snapshot_for(&self, symbol: &str, limit: usize) -> Result<GuardianSnapshot> {
        let candles = self.repository.find_last(symbol, limit).await?;

        let cached = self
            .latest
            .read()
            .await
            .get(symbol)
            .map(|t| t.analysis.clone());
        let analysis = match cached {
            Some(analysis) => analysis,
            None => {
                let window = self
                    .repository
                    .find_last(symbol, self.analysis_window)
                    .await?;
                self.analyzer.analyze(&window)?
            }
        };

        Ok(GuardianSnapshot {
            symbol: symbol.to_string(),
            candles,
            analysis,
        })
    }

    /// Regime of the last processed tick; `None` before the first candle.
    pub async fn current_regime(&self) -> Option<MarketRegime> {
        self.regime_of(&self.symbol).await
    }

    pub async fn regime_of(&self, symbol: &str) -> Option<MarketRegime> {
        self.latest
            .read()
            .await
            .get(symbol)
            .map(|t| t.analysis.regime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::RegimeConfig;
    use crate::infrastructure::repositories::InMemoryCandleRepository;
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;

    const HOUR: i64 = 3_600_000;

    fn small_config() -> RegimeConfig {
        RegimeConfig {
            ema_period: 20,
            adx_period: 5,
            atr_period: 5,
            atr_baseline_period: 10,
            adx_trend_threshold: 20.0,
            atr_volatility_multiplier: 1.5,
        }
    }

    fn bar(i: i64, close: f64, range: f64) -> Candle {
        let close_d = Decimal::from_f64(close).unwrap();
        let half = Decimal::from_f64(range / 2.0).unwrap();
        Candle {
            symbol: "BTCUSDT".to_string(),
            open: close_d,
            high: close_d + half,
            low: close_d - half,
            close: close_d,
            volume: Decimal::ONE,
            timestamp: i * HOUR,
        }
    }

    fn guardian(repo: Arc<InMemoryCandleRepository>) -> Guardian {
        Guardian::new(
            "BTCUSDT",
            repo,
            RegimeAnalyzer::new(small_config()).unwrap(),
            Arc::new(MarketDataBroadcaster::new()),
            60,
        )
        .unwrap()
    }

    #[test]
    fn test_window_must_exceed_ema_period() {
        let result = Guardian::new(
            "BTCUSDT",
            Arc::new(InMemoryCandleRepository::new()),
            RegimeAnalyzer::new(small_config()).unwrap(),
            Arc::new(MarketDataBroadcaster::new()),
            20,
        );
        assert!(matches!(
            result,
            Err(AnalysisError::WindowTooSmall {
                window: 20,
                ema_period: 20
            })
        ));
    }

    #[tokio::test]
    async fn test_short_history_is_sideways_hold() {
        let repo = Arc::new(InMemoryCandleRepository::new());
        let g = guardian(repo.clone());

        let tick = g.handle_candle(bar(0, 100.0, 1.0), true).await.unwrap();
        assert_eq!(tick.analysis.regime, MarketRegime::Sideways);
        assert!(!tick.analysis.is_conclusive());
        assert_eq!(tick.signal, TradeSignal::Hold);
        assert_eq!(repo.count("BTCUSDT").await.unwrap(), 1);
        assert_eq!(g.current_regime().await, Some(MarketRegime::Sideways));
    }

    #[tokio::test]
    async fn test_forming_bar_never_signals() {
        let repo = Arc::new(InMemoryCandleRepository::new());
        let history: Vec<Candle> = (0..50).map(|i| bar(i, 100.0, 1.0)).collect();
        repo.upsert_batch(&history).await.unwrap();
        let g = guardian(repo);

        // A violent forming bar: Volatile, but not closed
        let tick = g.handle_candle(bar(50, 100.0, 40.0), false).await.unwrap();
        assert_eq!(tick.analysis.regime, MarketRegime::Volatile);
        assert_eq!(tick.signal, TradeSignal::Hold);

        let tick = g.handle_candle(bar(50, 100.0, 40.0), true).await.unwrap();
        assert_eq!(tick.signal, TradeSignal::CloseAll);
    }

    #[tokio::test]
    async fn test_snapshot_returns_recent_candles_oldest_first() {
        let repo = Arc::new(InMemoryCandleRepository::new());
        let history: Vec<Candle> = (0..30).map(|i| bar(i, 100.0 + i as f64, 1.0)).collect();
        repo.upsert_batch(&history).await.unwrap();
        let g = guardian(repo);

        let snapshot = g.snapshot(5).await.unwrap();
        assert_eq!(snapshot.candles.len(), 5);
        assert_eq!(snapshot.candles[0].timestamp, 25 * HOUR);
        assert_eq!(snapshot.analysis.candles_used, 30);
        assert!(g.current_regime().await.is_none());
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let repo = Arc::new(InMemoryCandleRepository::new());
        let g = guardian(repo.clone());
        let (tx, rx) = tokio::sync::mpsc::channel(8);

        tx.send(MarketEvent::Kline {
            candle: bar(0, 100.0, 1.0),
            is_closed: false,
        })
        .await
        .unwrap();
        tx.send(MarketEvent::Disconnected {
            reason: "test".into(),
        })
        .await
        .unwrap();
        tx.send(MarketEvent::Kline {
            candle: bar(0, 101.0, 1.0),
            is_closed: true,
        })
        .await
        .unwrap();
        drop(tx);

        g.run(rx).await;

        let stored = repo.find_latest("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(stored.close, Decimal::from(101));
        assert_eq!(repo.count("BTCUSDT").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_backfills_missed_bars_before_next_kline() {
        use crate::application::market_data::sync::SyncConfig;
        use crate::infrastructure::mock::MockMarketDataService;

        let repo = Arc::new(InMemoryCandleRepository::new());
        let all: Vec<Candle> = (0..40).map(|i| bar(i, 100.0, 1.0)).collect();
        repo.upsert_batch(&all[..30]).await.unwrap();

        let exchange = Arc::new(MockMarketDataService::new_no_sim());
        exchange.set_history(all[..39].to_vec()).await;
        let sync = MarketDataSync::new(exchange.clone(), repo.clone(), SyncConfig::default());
        let g = guardian(repo.clone()).with_backfill(sync, Timeframe::OneHour);

        let (tx, rx) = tokio::sync::mpsc::channel(8);
        tx.send(MarketEvent::Disconnected {
            reason: "connection reset".into(),
        })
        .await
        .unwrap();
        tx.send(MarketEvent::Kline {
            candle: all[39].clone(),
            is_closed: true,
        })
        .await
        .unwrap();
        drop(tx);

        g.run(rx).await;

        assert_eq!(exchange.requests().await.len(), 1);
        let stored: Vec<i64> = repo
            .find_last("BTCUSDT", 100)
            .await
            .unwrap()
            .iter()
            .map(|c| c.timestamp)
            .collect();
        let expected: Vec<i64> = all.iter().map(|c| c.timestamp).collect();
        assert_eq!(stored, expected);
    }

    #[tokio::test]
    async fn test_backfill_without_source_is_noop() {
        let g = guardian(Arc::new(InMemoryCandleRepository::new()));
        assert!(g.backfill().await.unwrap().is_none());
    }
}
