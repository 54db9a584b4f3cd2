//! Observed market and history settings.

use super::{EnvLookup, parse_env};
use crate::application::market_data::sync::SyncConfig;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::repositories::retention_cutoff_ms;
use anyhow::{Context, Result, bail};
use chrono::Utc;

#[derive(Debug, Clone)]
pub struct MarketEnvConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub database_url: String,
    pub history_seed_limit: usize,
    pub max_gap_pages: usize,
    pub analysis_window: usize,
    /// Days of candles kept in the store; `None` keeps everything.
    pub retention_days: Option<i64>,
}

impl MarketEnvConfig {
    pub fn from_lookup(lookup: &EnvLookup) -> Result<Self> {
        let symbol = lookup("SYMBOL")
            .unwrap_or_else(|| "BTCUSDT".to_string())
            .trim()
            .to_uppercase();
        if symbol.is_empty() {
            bail!("SYMBOL must not be empty");
        }

        let history_seed_limit = parse_env(lookup, "HISTORY_SEED_LIMIT", 1000usize)?;
        if !(1..=1000).contains(&history_seed_limit) {
            bail!(
                "HISTORY_SEED_LIMIT must be between 1 and 1000, got {}",
                history_seed_limit
            );
        }

        let retention_days = match lookup("CANDLE_RETENTION_DAYS") {
            Some(_) => {
                let days = parse_env(lookup, "CANDLE_RETENTION_DAYS", 0i64)?;
                retention_cutoff_ms(Utc::now().timestamp_millis(), days)
                    .context("Invalid CANDLE_RETENTION_DAYS")?;
                Some(days)
            }
            None => None,
        };

        Ok(Self {
            symbol,
            timeframe: parse_env(lookup, "TIMEFRAME", Timeframe::OneHour)?,
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://data/spectator.db".to_string()),
            history_seed_limit,
            max_gap_pages: parse_env(lookup, "MAX_GAP_PAGES", 50usize)?,
            analysis_window: parse_env(lookup, "ANALYSIS_WINDOW", 500usize)?,
            retention_days,
        })
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            history_seed_limit: self.history_seed_limit,
            max_gap_pages: self.max_gap_pages,
        }
    }
}
