use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the current market regime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketRegime {
    /// Price above the long EMA with a strong ADX
    TrendingUp,
    /// Price at or below the long EMA with a strong ADX
    TrendingDown,
    /// Weak ADX: consolidation
    Sideways,
    /// ATR expanding well beyond its baseline: danger or transition
    Volatile,
}

impl MarketRegime {
    pub fn all() -> [MarketRegime; 4] {
        [
            MarketRegime::TrendingUp,
            MarketRegime::TrendingDown,
            MarketRegime::Sideways,
            MarketRegime::Volatile,
        ]
    }

    /// Stable numeric code, used for the regime gauge.
    pub fn code(&self) -> i64 {
        match self {
            MarketRegime::TrendingUp => 1,
            MarketRegime::TrendingDown => -1,
            MarketRegime::Sideways => 0,
            MarketRegime::Volatile => 2,
        }
    }

    pub fn is_trending(&self) -> bool {
        matches!(self, MarketRegime::TrendingUp | MarketRegime::TrendingDown)
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketRegime::TrendingUp => write!(f, "TRENDING UP"),
            MarketRegime::TrendingDown => write!(f, "TRENDING DOWN"),
            MarketRegime::Sideways => write!(f, "SIDEWAYS"),
            MarketRegime::Volatile => write!(f, "VOLATILE"),
        }
    }
}

/// Indicator values at the most recent candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub price: f64,
    pub ema: f64,
    pub adx: f64,
    pub atr: f64,
    pub baseline_atr: f64,
}

impl IndicatorSnapshot {
    /// Current ATR relative to its baseline (1.0 = normal).
    pub fn atr_ratio(&self) -> Option<f64> {
        if self.baseline_atr > 0.0 {
            Some(self.atr / self.baseline_atr)
        } else {
            None
        }
    }
}

/// Result of one regime classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeAnalysis {
    pub regime: MarketRegime,
    /// `None` when there were not enough candles to compute the indicators.
    pub indicators: Option<IndicatorSnapshot>,
    pub candles_used: usize,
}

impl RegimeAnalysis {
    /// Safe default when history is too short to judge.
    pub fn insufficient_data(candles_used: usize) -> Self {
        Self {
            regime: MarketRegime::Sideways,
            indicators: None,
            candles_used,
        }
    }

    pub fn is_conclusive(&self) -> bool {
        self.indicators.is_some()
    }
}
