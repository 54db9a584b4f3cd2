//! Prometheus metrics definitions for Spectator
//!
//! All metrics use the `spectator_` prefix and are read-only.

use crate::domain::market::market_regime::{MarketRegime, RegimeAnalysis};
use crate::domain::market::trade_signal::TradeSignal;
use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

/// Prometheus metrics for the regime observer
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Kline updates processed, by symbol and bar state (forming/closed)
    pub candles_ingested_total: CounterVec,
    /// Candles written by the history seed / gap fill
    pub history_candles_synced_total: CounterVec,
    /// Regime transitions by symbol, previous and new regime
    pub regime_changes_total: CounterVec,
    /// Signals emitted by kind
    pub trade_signals_total: CounterVec,
    /// Current regime code per symbol (see `MarketRegime::code`)
    pub current_regime: GenericGaugeVec<AtomicF64>,
    /// Last close price per symbol
    pub last_close_price: GenericGaugeVec<AtomicF64>,
    /// Last ADX per symbol
    pub adx_current: GenericGaugeVec<AtomicF64>,
    /// Last ATR per symbol
    pub atr_current: GenericGaugeVec<AtomicF64>,
    /// Last ATR / baseline ATR per symbol
    pub atr_ratio_current: GenericGaugeVec<AtomicF64>,
    /// WebSocket reconnection attempts
    pub websocket_reconnects_total: CounterVec,
    /// Exchange API latency in seconds
    pub api_latency_seconds: HistogramVec,
    /// Uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let candles_ingested_total = CounterVec::new(
            Opts::new(
                "spectator_candles_ingested_total",
                "Kline updates processed by the guardian",
            ),
            &["symbol", "state"],
        )?;
        registry.register(Box::new(candles_ingested_total.clone()))?;

        let history_candles_synced_total = CounterVec::new(
            Opts::new(
                "spectator_history_candles_synced_total",
                "Candles stored by the history seed and gap fill",
            ),
            &["symbol", "mode"],
        )?;
        registry.register(Box::new(history_candles_synced_total.clone()))?;

        let regime_changes_total = CounterVec::new(
            Opts::new(
                "spectator_regime_changes_total",
                "Market regime transitions",
            ),
            &["symbol", "from", "to"],
        )?;
        registry.register(Box::new(regime_changes_total.clone()))?;

        let trade_signals_total = CounterVec::new(
            Opts::new("spectator_trade_signals_total", "Trade signals emitted"),
            &["symbol", "signal"],
        )?;
        registry.register(Box::new(trade_signals_total.clone()))?;

        let current_regime = GaugeVec::new(
            Opts::new(
                "spectator_current_regime",
                "Current regime (1=up, -1=down, 0=sideways, 2=volatile)",
            ),
            &["symbol"],
        )?;
        registry.register(Box::new(current_regime.clone()))?;

        let last_close_price = GaugeVec::new(
            Opts::new("spectator_last_close_price", "Last close price"),
            &["symbol"],
        )?;
        registry.register(Box::new(last_close_price.clone()))?;

        let adx_current = GaugeVec::new(
            Opts::new("spectator_adx_current", "Last ADX value"),
            &["symbol"],
        )?;
        registry.register(Box::new(adx_current.clone()))?;

        let atr_current = GaugeVec::new(
            Opts::new("spectator_atr_current", "Last ATR value"),
            &["symbol"],
        )?;
        registry.register(Box::new(atr_current.clone()))?;

        let atr_ratio_current = GaugeVec::new(
            Opts::new(
                "spectator_atr_ratio_current",
                "Last ATR divided by its baseline",
            ),
            &["symbol"],
        )?;
        registry.register(Box::new(atr_ratio_current.clone()))?;

        let websocket_reconnects_total = CounterVec::new(
            Opts::new(
                "spectator_websocket_reconnects_total",
                "Total WebSocket reconnection attempts",
            ),
            &["exchange"],
        )?;
        registry.register(Box::new(websocket_reconnects_total.clone()))?;

        let api_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "spectator_api_latency_seconds",
                "Exchange API request latency in seconds",
            )
            .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["exchange", "endpoint"],
        )?;
        registry.register(Box::new(api_latency_seconds.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "spectator_uptime_seconds",
            "Process uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            candles_ingested_total,
            history_candles_synced_total,
            regime_changes_total,
            trade_signals_total,
            current_regime,
            last_close_price,
            adx_current,
            atr_current,
            atr_ratio_current,
            websocket_reconnects_total,
            api_latency_seconds,
            uptime_seconds,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn inc_candles(&self, symbol: &str, is_closed: bool) {
        let state = if is_closed { "closed" } else { "forming" };
        self.candles_ingested_total
            .with_label_values(&[symbol, state])
            .inc();
    }

    pub fn add_history_synced(&self, symbol: &str, mode: &str, count: usize) {
        self.history_candles_synced_total
            .with_label_values(&[symbol, mode])
            .inc_by(count as f64);
    }

    pub fn inc_regime_change(&self, symbol: &str, from: MarketRegime, to: MarketRegime) {
        self.regime_changes_total
            .with_label_values(&[symbol, &format!("{:?}", from), &format!("{:?}", to)])
            .inc();
    }

    pub fn inc_signals(&self, symbol: &str, signal: TradeSignal) {
        self.trade_signals_total
            .with_label_values(&[symbol, signal.as_str()])
            .inc();
    }

    /// Publish the latest analysis as gauges
    pub fn record_analysis(&self, symbol: &str, analysis: &RegimeAnalysis) {
        self.current_regime
            .with_label_values(&[symbol])
            .set(analysis.regime.code() as f64);

        if let Some(snapshot) = &analysis.indicators {
            self.last_close_price
                .with_label_values(&[symbol])
                .set(snapshot.price);
            self.adx_current
                .with_label_values(&[symbol])
                .set(snapshot.adx);
            self.atr_current
                .with_label_values(&[symbol])
                .set(snapshot.atr);
            if let Some(ratio) = snapshot.atr_ratio() {
                self.atr_ratio_current
                    .with_label_values(&[symbol])
                    .set(ratio);
            }
        }
    }

    /// Increment WebSocket reconnects
    pub fn inc_reconnects(&self, exchange: &str) {
        self.websocket_reconnects_total
            .with_label_values(&[exchange])
            .inc();
    }

    /// Observe API latency
    pub fn observe_api_latency(&self, exchange: &str, endpoint: &str, latency: f64) {
        self.api_latency_seconds
            .with_label_values(&[exchange, endpoint])
            .observe(latency);
    }
}
