//! Regime classification parameters from the environment.

use super::{EnvLookup, parse_env};
use crate::domain::config::RegimeConfig;
use anyhow::Result;

#[derive(Debug, Clone)]
pub struct RegimeEnvConfig {
    pub ema_period: usize,
    pub adx_period: usize,
    pub atr_period: usize,
    pub atr_baseline_period: usize,
    pub adx_threshold: f64,
    pub atr_multiplier: f64,
}

impl RegimeEnvConfig {
    pub fn from_lookup(lookup: &EnvLookup) -> Result<Self> {
        let defaults = RegimeConfig::default();
        let atr_period = parse_env(lookup, "REGIME_ATR_PERIOD", defaults.atr_period)?;

        Ok(Self {
            ema_period: parse_env(lookup, "REGIME_EMA_PERIOD", defaults.ema_period)?,
            adx_period: parse_env(lookup, "REGIME_ADX_PERIOD", defaults.adx_period)?,
            atr_period,
            // Baseline follows the ATR period unless set explicitly
            atr_baseline_period: parse_env(
                lookup,
                "REGIME_ATR_BASELINE_PERIOD",
                atr_period.saturating_mul(2),
            )?,
            adx_threshold: parse_env(lookup, "REGIME_ADX_THRESHOLD", defaults.adx_trend_threshold)?,
            atr_multiplier: parse_env(
                lookup,
                "REGIME_ATR_MULTIPLIER",
                defaults.atr_volatility_multiplier,
            )?,
        })
    }

    pub fn to_regime_config(&self) -> Result<RegimeConfig> {
        Ok(RegimeConfig::new(
            self.ema_period,
            self.adx_period,
            self.atr_period,
            self.atr_baseline_period,
            self.adx_threshold,
            self.atr_multiplier,
        )?)
    }
}
