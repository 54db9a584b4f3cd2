//! Regime Classification Value Object
//!
//! Indicator periods and decision thresholds used by the regime analyzer.

use thiserror::Error;

/// Error type for RegimeConfig validation
#[derive(Debug, Error, PartialEq)]
pub enum RegimeConfigError {
    #[error("Invalid period: {field} = {value}. Must be > 0")]
    InvalidPeriod { field: String, value: usize },

    #[error("Invalid threshold: {field} = {value}. Must be positive")]
    InvalidThreshold { field: String, value: f64 },
}

/// Regime classification parameters
///
/// # Invariants
///
/// - All period fields must be > 0
/// - `adx_trend_threshold` and `atr_volatility_multiplier` must be > 0.0
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeConfig {
    /// Long trend filter (EMA of close)
    pub ema_period: usize,
    pub adx_period: usize,
    pub atr_period: usize,
    /// SMA window over ATR values that defines "normal" volatility
    pub atr_baseline_period: usize,

    /// ADX below this means no trend
    pub adx_trend_threshold: f64,
    /// ATR above `baseline * multiplier` means the market is volatile
    pub atr_volatility_multiplier: f64,
}

impl RegimeConfig {
    /// Create a new RegimeConfig with validation
    pub fn new(
        ema_period: usize,
        adx_period: usize,
        atr_period: usize,
        atr_baseline_period: usize,
        adx_trend_threshold: f64,
        atr_volatility_multiplier: f64,
    ) -> Result<Self, RegimeConfigError> {
        let config = Self {
            ema_period,
            adx_period,
            atr_period,
            atr_baseline_period,
            adx_trend_threshold,
            atr_volatility_multiplier,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RegimeConfigError> {
        Self::validate_period("ema_period", self.ema_period)?;
        Self::validate_period("adx_period", self.adx_period)?;
        Self::validate_period("atr_period", self.atr_period)?;
        Self::validate_period("atr_baseline_period", self.atr_baseline_period)?;

        Self::validate_threshold("adx_trend_threshold", self.adx_trend_threshold)?;
        Self::validate_threshold("atr_volatility_multiplier", self.atr_volatility_multiplier)?;

        Ok(())
    }

    /// Candles required before the analyzer trusts its indicators.
    pub fn min_candles(&self) -> usize {
        self.ema_period.saturating_add(1)
    }

    fn validate_period(field: &str, value: usize) -> Result<(), RegimeConfigError> {
        if value == 0 {
            return Err(RegimeConfigError::InvalidPeriod {
                field: field.to_string(),
                value,
            });
        }
        Ok(())
    }

    fn validate_threshold(field: &str, value: f64) -> Result<(), RegimeConfigError> {
        // NaN fails this comparison too
        if !(value > 0.0) {
            return Err(RegimeConfigError::InvalidThreshold {
                field: field.to_string(),
                value,
            });
        }
        Ok(())
    }
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            ema_period: 200,
            adx_period: 14,
            atr_period: 14,
            atr_baseline_period: 28,
            adx_trend_threshold: 20.0,
            atr_volatility_multiplier: 1.5,
        }
    }
}
