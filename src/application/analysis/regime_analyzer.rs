//! Market Regime Analyzer
//!
//! Classifies the recent price action of one symbol into a [`MarketRegime`]:
//!
//! 1. **Volatile**: ATR above `baseline * atr_volatility_multiplier`
//! 2. **Sideways**: ADX below `adx_trend_threshold`
//! 3. **TrendingUp / TrendingDown**: close above / not above the long EMA
//!
//! The first matching rule wins, so a violent move is reported as volatile
//! even while the trend filter still points somewhere.

use crate::application::analysis::indicators::latest_snapshot;
use crate::domain::config::{RegimeConfig, RegimeConfigError};
use crate::domain::market::market_regime::{IndicatorSnapshot, MarketRegime, RegimeAnalysis};
use crate::domain::market::types::Candle;
use anyhow::Result;
use std::borrow::Cow;
use tracing::{debug, warn};

pub struct RegimeAnalyzer {
    config: RegimeConfig,
}

impl RegimeAnalyzer {
    pub fn new(config: RegimeConfig) -> Result<Self, RegimeConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Analyze the market from recent candles (oldest first).
    ///
    /// Candles of a different symbol than the newest one are ignored, and the
    /// series is re-ordered by open time if needed. With `ema_period` or fewer
    /// candles the result is `Sideways` without indicators.
    pub fn analyze(&self, candles: &[Candle]) -> Result<RegimeAnalysis> {
        let series = prepare_series(candles);

        if series.len() <= self.config.ema_period {
            warn!(
                "Not enough candles to calculate EMA {}. Need at least {}, got {}",
                self.config.ema_period,
                self.config.min_candles(),
                series.len()
            );
            return Ok(RegimeAnalysis::insufficient_data(series.len()));
        }

        let Some(snapshot) = latest_snapshot(&series, &self.config)? else {
            return Ok(RegimeAnalysis::insufficient_data(0));
        };

        let regime = self.classify(&snapshot);
        debug!(
            "Regime {} (price={:.4}, ema={:.4}, adx={:.2}, atr={:.4}, baseline_atr={:.4})",
            regime, snapshot.price, snapshot.ema, snapshot.adx, snapshot.atr, snapshot.baseline_atr
        );

        Ok(RegimeAnalysis {
            regime,
            indicators: Some(snapshot),
            candles_used: series.len(),
        })
    }

    /// Apply the decision rules to already computed indicator values.
    pub fn classify(&self, snapshot: &IndicatorSnapshot) -> MarketRegime {
        if snapshot.atr > snapshot.baseline_atr * self.config.atr_volatility_multiplier {
            return MarketRegime::Volatile;
        }

        if snapshot.adx < self.config.adx_trend_threshold {
            return MarketRegime::Sideways;
        }

        if snapshot.price > snapshot.ema {
            MarketRegime::TrendingUp
        } else {
            MarketRegime::TrendingDown
        }
    }
}

/// Single-symbol, strictly chronological view of `candles`.
///
/// Borrows when the input is already clean; duplicates of the same open time
/// keep the last occurrence.
fn prepare_series(candles: &[Candle]) -> Cow<'_, [Candle]> {
    let Some(last) = candles.last() else {
        return Cow::Borrowed(candles);
    };

    let single_symbol = candles.iter().all(|c| c.symbol == last.symbol);
    let strictly_ordered = candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp);
    if single_symbol && strictly_ordered {
        return Cow::Borrowed(candles);
    }

    let mut series: Vec<Candle> = candles
        .iter()
        .filter(|c| c.symbol == last.symbol)
        .cloned()
        .collect();
    // Stable sort keeps input order among equal timestamps, so the later write survives
    series.sort_by_key(|c| c.timestamp);
    let mut deduped: Vec<Candle> = Vec::with_capacity(series.len());
    for candle in series {
        match deduped.last_mut() {
            Some(prev) if prev.timestamp == candle.timestamp => *prev = candle,
            _ => deduped.push(candle),
        }
    }
    Cow::Owned(deduped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    const HOUR_MS: i64 = 3_600_000;

    fn create_candle(i: usize, price: f64, range: f64) -> Candle {
        let close = Decimal::from_f64_retain(price).unwrap();
        let half = Decimal::from_f64_retain(range / 2.0).unwrap();
        Candle {
            symbol: "BTCUSDT".to_string(),
            timestamp: i as i64 * HOUR_MS,
            open: close,
            high: close + half,
            low: close - half,
            close,
            volume: Decimal::from(1000),
        }
    }

    fn trend(n: usize, start: f64, step: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| create_candle(i, start + step * i as f64, 1.0))
            .collect()
    }

    fn oscillation(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| create_candle(i, if i % 2 == 0 { 100.0 } else { 101.0 }, 1.0))
            .collect()
    }

    fn analyzer() -> RegimeAnalyzer {
        RegimeAnalyzer::new(RegimeConfig::default()).unwrap()
    }

    #[test]
    fn test_insufficient_history_is_sideways() {
        let candles = trend(200, 100.0, 1.0);
        let analysis = analyzer().analyze(&candles).unwrap();
        assert_eq!(analysis.regime, MarketRegime::Sideways);
        assert!(analysis.indicators.is_none());
        assert_eq!(analysis.candles_used, 200);
    }

    #[test]
    fn test_empty_input_is_sideways() {
        let analysis = analyzer().analyze(&[]).unwrap();
        assert_eq!(analysis.regime, MarketRegime::Sideways);
        assert_eq!(analysis.candles_used, 0);
    }

    #[test]
    fn test_regime_detection_uptrend() {
        let analysis = analyzer().analyze(&trend(300, 100.0, 1.0)).unwrap();
        assert_eq!(analysis.regime, MarketRegime::TrendingUp);
        let snapshot = analysis.indicators.unwrap();
        assert!(snapshot.price > snapshot.ema);
        assert!(snapshot.adx >= 20.0);
    }

    #[test]
    fn test_regime_detection_downtrend() {
        let analysis = analyzer().analyze(&trend(300, 1000.0, -1.0)).unwrap();
        assert_eq!(analysis.regime, MarketRegime::TrendingDown);
    }

    #[test]
    fn test_regime_detection_sideways() {
        let analysis = analyzer().analyze(&oscillation(300)).unwrap();
        assert_eq!(analysis.regime, MarketRegime::Sideways);
        assert!(analysis.indicators.unwrap().adx < 20.0);
    }

    #[test]
    fn test_volatility_spike_wins_over_trend() {
        let mut candles = trend(300, 100.0, 1.0);
        let base = 400.0;
        for k in 0..5 {
            candles.push(create_candle(300 + k, base + k as f64, 30.0));
        }
        let analysis = analyzer().analyze(&candles).unwrap();
        assert_eq!(analysis.regime, MarketRegime::Volatile);
        let ratio = analysis.indicators.unwrap().atr_ratio().unwrap();
        assert!(ratio > 1.5);
    }

    #[test]
    fn test_volatility_threshold_uses_wilder_atr() {
        let calm_then = |shock_range: f64| {
            let mut candles: Vec<Candle> = (0..300).map(|i| create_candle(i, 100.0, 1.0)).collect();
            candles.push(create_candle(300, 100.0, shock_range));
            analyzer().analyze(&candles).unwrap()
        };

        // ATR 1.5 against 1.5 x baseline 1.0179
        let below = calm_then(8.0);
        assert_eq!(below.regime, MarketRegime::Sideways);
        assert!(below.indicators.unwrap().atr_ratio().unwrap() < 1.5);

        // ATR 1.5714 against 1.5 x baseline 1.0204
        let above = calm_then(9.0);
        assert_eq!(above.regime, MarketRegime::Volatile);
    }

    #[test]
    fn test_unordered_input_is_sorted() {
        let mut candles = trend(300, 100.0, 1.0);
        candles.reverse();
        let analysis = analyzer().analyze(&candles).unwrap();
        // After reversal the last element is the oldest bar, which only decides the symbol
        assert_eq!(analysis.regime, MarketRegime::TrendingUp);
        assert_eq!(analysis.candles_used, 300);
    }

    #[test]
    fn test_foreign_symbols_are_ignored() {
        let mut candles = trend(150, 100.0, 1.0);
        let mut other = trend(150, 100.0, 1.0);
        for c in other.iter_mut() {
            c.symbol = "ETHUSDT".to_string();
        }
        candles.splice(0..0, other);
        let analysis = analyzer().analyze(&candles).unwrap();
        assert_eq!(analysis.candles_used, 150);
        assert!(analysis.indicators.is_none());
    }

    #[test]
    fn test_duplicate_open_times_keep_latest() {
        let mut candles = trend(10, 100.0, 1.0);
        let mut revised = candles[4].clone();
        revised.close = Decimal::from(999);
        candles.push(revised);

        let series = prepare_series(&candles);
        assert_eq!(series.len(), 10);
        assert_eq!(series[4].close, Decimal::from(999));
    }

    #[test]
    fn test_classify_rule_order() {
        let a = analyzer();
        let volatile_and_trending = IndicatorSnapshot {
            price: 110.0,
            ema: 100.0,
            adx: 40.0,
            atr: 4.0,
            baseline_atr: 2.0,
        };
        assert_eq!(a.classify(&volatile_and_trending), MarketRegime::Volatile);

        let weak = IndicatorSnapshot {
            atr: 2.0,
            adx: 19.99,
            ..volatile_and_trending
        };
        assert_eq!(a.classify(&weak), MarketRegime::Sideways);

        let at_threshold = IndicatorSnapshot {
            adx: 20.0,
            ..weak
        };
        assert_eq!(a.classify(&at_threshold), MarketRegime::TrendingUp);

        let on_ema = IndicatorSnapshot {
            price: 100.0,
            ..at_threshold
        };
        assert_eq!(a.classify(&on_ema), MarketRegime::TrendingDown);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RegimeConfig {
            adx_period: 0,
            ..RegimeConfig::default()
        };
        assert!(RegimeAnalyzer::new(config).is_err());
    }
}
