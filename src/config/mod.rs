//! Configuration module for Spectator.
//!
//! Structured configuration loaded from environment variables, organized by
//! concern: Binance endpoints, observed market, regime parameters and
//! observability. Missing variables take their default; malformed ones are
//! errors.

mod binance_config;
mod market_config;
mod observability_config;
mod regime_env_config;

pub use binance_config::BinanceConfig;
pub use market_config::MarketEnvConfig;
pub use observability_config::ObservabilityEnvConfig;
pub use regime_env_config::RegimeEnvConfig;

use crate::domain::config::RegimeConfig;
use crate::domain::errors::AnalysisError;
use anyhow::{Context, Result, anyhow};
use std::env;
use std::fmt::Display;
use std::str::FromStr;

/// Source of configuration values, keyed by variable name.
pub type EnvLookup = dyn Fn(&str) -> Option<String>;

/// Parse `key` from `lookup`, falling back to `default` when unset.
pub(crate) fn parse_env<T>(lookup: &EnvLookup, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Failed to parse {}='{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

/// Market data backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Binance,
    Mock,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "binance" => Ok(Mode::Binance),
            "mock" => Ok(Mode::Mock),
            _ => anyhow::bail!("Invalid MODE: {}. Must be 'binance' or 'mock'", s),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub market: MarketEnvConfig,
    pub binance: BinanceConfig,
    pub regime: RegimeEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key: &str| env::var(key).ok())
    }

    pub fn from_lookup(lookup: &EnvLookup) -> Result<Self> {
        let mode = parse_env(lookup, "MODE", Mode::Binance)?;
        let market = MarketEnvConfig::from_lookup(lookup).context("Failed to load market config")?;
        let binance = BinanceConfig::from_lookup(lookup).context("Failed to load Binance config")?;
        let regime = RegimeEnvConfig::from_lookup(lookup).context("Failed to load regime config")?;
        let observability = ObservabilityEnvConfig::from_lookup(lookup)
            .context("Failed to load observability config")?;

        let config = Self {
            mode,
            market,
            binance,
            regime,
            observability,
        };
        config.to_regime_config()?;
        Ok(config)
    }

    /// Validated regime parameters; the analysis window must cover the EMA.
    pub fn to_regime_config(&self) -> Result<RegimeConfig> {
        let regime = self.regime.to_regime_config()?;
        if self.market.analysis_window <= regime.ema_period {
            return Err(AnalysisError::WindowTooSmall {
                window: self.market.analysis_window,
                ema_period: regime.ema_period,
            }
            .into());
        }
        Ok(regime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::timeframe::Timeframe;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(&move |key: &str| map.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.mode, Mode::Binance);
        assert_eq!(config.market.symbol, "BTCUSDT");
        assert_eq!(config.market.timeframe, Timeframe::OneHour);
        assert_eq!(config.market.database_url, "sqlite://data/spectator.db");
        assert_eq!(config.market.history_seed_limit, 1000);
        assert_eq!(config.market.max_gap_pages, 50);
        assert_eq!(config.market.analysis_window, 500);
        assert_eq!(config.market.retention_days, None);
        assert_eq!(config.binance.ws_url, "wss://stream.binance.com:9443");
        assert!(config.observability.enabled);
        assert_eq!(config.observability.interval_secs, 60);

        let regime = config.to_regime_config().unwrap();
        assert_eq!(regime, RegimeConfig::default());
    }

    #[test]
    fn test_config_overrides() {
        let config = config_from(&[
            ("MODE", "Mock"),
            ("SYMBOL", " ethusdt "),
            ("TIMEFRAME", "15m"),
            ("REGIME_EMA_PERIOD", "50"),
            ("REGIME_ATR_PERIOD", "10"),
            ("REGIME_ADX_THRESHOLD", "25.5"),
            ("ANALYSIS_WINDOW", "120"),
            ("OBSERVABILITY_ENABLED", "false"),
        ])
        .unwrap();

        assert_eq!(config.mode, Mode::Mock);
        assert_eq!(config.market.symbol, "ETHUSDT");
        assert_eq!(config.market.timeframe, Timeframe::FifteenMin);
        assert!(!config.observability.enabled);

        let regime = config.to_regime_config().unwrap();
        assert_eq!(regime.ema_period, 50);
        assert_eq!(regime.atr_baseline_period, 20);
        assert_eq!(regime.adx_trend_threshold, 25.5);
    }

    #[test]
    fn test_malformed_values_are_errors() {
        assert!(config_from(&[("MODE", "paper")]).is_err());
        assert!(config_from(&[("REGIME_EMA_PERIOD", "two hundred")]).is_err());
        assert!(config_from(&[("TIMEFRAME", "3h")]).is_err());
        assert!(config_from(&[("HISTORY_SEED_LIMIT", "5000")]).is_err());
        assert!(config_from(&[("REGIME_ATR_MULTIPLIER", "-1")]).is_err());
    }

    #[test]
    fn test_baseline_default_saturates_on_huge_atr_period() {
        let config = config_from(&[("REGIME_ATR_PERIOD", &usize::MAX.to_string())]).unwrap();
        assert_eq!(config.regime.atr_baseline_period, usize::MAX);
    }

    #[test]
    fn test_retention_days_must_be_positive() {
        let config = config_from(&[("CANDLE_RETENTION_DAYS", "90")]).unwrap();
        assert_eq!(config.market.retention_days, Some(90));

        assert!(config_from(&[("CANDLE_RETENTION_DAYS", "0")]).is_err());
        assert!(config_from(&[("CANDLE_RETENTION_DAYS", "-1")]).is_err());
        assert!(config_from(&[("CANDLE_RETENTION_DAYS", "9223372036854775807")]).is_err());
    }

    #[test]
    fn test_window_must_exceed_ema_period() {
        let err = config_from(&[("ANALYSIS_WINDOW", "200")]).unwrap_err();
        assert!(err.to_string().contains("must exceed the EMA period"));
    }
}
