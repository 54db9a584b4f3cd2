//! Push-based metrics reporter for Spectator
//!
//! Periodically outputs the observed regimes as structured JSON to stdout.
//!
//! **Security**: This system only SENDS data, never accepts requests.

use crate::domain::market::types::MarketTick;
use crate::infrastructure::observability::metrics::Metrics;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Shared view of the latest tick per symbol, written by the guardian.
pub type LatestTicks = Arc<RwLock<HashMap<String, MarketTick>>>;

/// Metrics snapshot for JSON output
#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub symbols: Vec<SymbolSnapshot>,
}

#[derive(Serialize)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub regime: String,
    pub signal: String,
    pub last_close: f64,
    pub candle_time: i64,
    pub adx: Option<f64>,
    pub atr_ratio: Option<f64>,
    pub candles_used: usize,
}

/// Push-based metrics reporter
///
/// Outputs metrics as structured JSON logs on a configurable interval.
/// No HTTP server, no incoming connections - only outbound data.
pub struct MetricsReporter {
    latest: LatestTicks,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(latest: LatestTicks, metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            latest,
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    /// Run the reporter in a loop, outputting metrics periodically
    pub async fn run(self) {
        info!(
            "MetricsReporter: Starting push-based metrics (interval: {:?})",
            self.interval
        );

        loop {
            tokio::time::sleep(self.interval).await;

            let snapshot = self.collect_snapshot().await;
            match serde_json::to_string(&snapshot) {
                Ok(json) => {
                    println!("METRICS_JSON:{}", json);
                    for s in &snapshot.symbols {
                        info!(
                            "{} | {} | last signal {} | close {:.2} | Uptime: {}s",
                            s.symbol, s.regime, s.signal, s.last_close, snapshot.uptime_seconds
                        );
                    }
                }
                Err(e) => warn!("Failed to serialize metrics: {}", e),
            }
        }
    }

    async fn collect_snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed().as_secs();
        self.metrics.uptime_seconds.set(uptime as f64);

        let latest = self.latest.read().await;
        let mut symbols: Vec<SymbolSnapshot> = latest
            .values()
            .map(|tick| SymbolSnapshot {
                symbol: tick.candle.symbol.clone(),
                regime: tick.analysis.regime.to_string(),
                signal: tick.signal.to_string(),
                last_close: tick.candle.close.to_f64().unwrap_or(0.0),
                candle_time: tick.candle.timestamp,
                adx: tick.analysis.indicators.map(|i| i.adx),
                atr_ratio: tick.analysis.indicators.and_then(|i| i.atr_ratio()),
                candles_used: tick.analysis.candles_used,
            })
            .collect();
        symbols.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            symbols,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::market_regime::{MarketRegime, RegimeAnalysis};
    use crate::domain::market::trade_signal::TradeSignal;
    use crate::domain::market::types::Candle;
    use rust_decimal_macros::dec;

    fn tick(symbol: &str) -> MarketTick {
        MarketTick {
            candle: Candle {
                symbol: symbol.to_string(),
                open: dec!(100),
                high: dec!(110),
                low: dec!(95),
                close: dec!(105.5),
                volume: dec!(12),
                timestamp: 1_704_067_200_000,
            },
            analysis: RegimeAnalysis::insufficient_data(10),
            signal: TradeSignal::Hold,
        }
    }

    #[tokio::test]
    async fn test_snapshot_collection_is_sorted_by_symbol() {
        let latest: LatestTicks = Arc::new(RwLock::new(HashMap::new()));
        latest.write().await.insert("ETHUSDT".into(), tick("ETHUSDT"));
        latest.write().await.insert("BTCUSDT".into(), tick("BTCUSDT"));

        let metrics = Metrics::new().expect("Failed to create metrics");
        let reporter = MetricsReporter::new(latest, metrics, 60);
        let snapshot = reporter.collect_snapshot().await;

        assert_eq!(snapshot.symbols.len(), 2);
        assert_eq!(snapshot.symbols[0].symbol, "BTCUSDT");
        assert_eq!(snapshot.symbols[0].regime, MarketRegime::Sideways.to_string());
        assert_eq!(snapshot.symbols[0].last_close, 105.5);
        assert!(snapshot.symbols[0].adx.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_serialization() {
        let latest: LatestTicks = Arc::new(RwLock::new(HashMap::new()));
        latest.write().await.insert("BTCUSDT".into(), tick("BTCUSDT"));
        let metrics = Metrics::new().expect("Failed to create metrics");
        let snapshot = MetricsReporter::new(latest, metrics, 60)
            .collect_snapshot()
            .await;

        let json = serde_json::to_string(&snapshot).expect("Failed to serialize");
        assert!(json.contains("\"regime\":\"SIDEWAYS\""));
        assert!(json.contains("\"signal\":\"HOLD\""));
    }
}
