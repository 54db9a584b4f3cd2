//! Binance endpoint configuration.

use super::{EnvLookup, parse_env};
use anyhow::Result;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub base_url: String,
    pub ws_url: String,
    pub request_timeout: Duration,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            ws_url: "wss://stream.binance.com:9443".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl BinanceConfig {
    pub fn from_lookup(lookup: &EnvLookup) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            base_url: lookup("BINANCE_BASE_URL").unwrap_or(defaults.base_url),
            ws_url: lookup("BINANCE_WS_URL").unwrap_or(defaults.ws_url),
            request_timeout: Duration::from_secs(parse_env(
                lookup,
                "BINANCE_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
        })
    }
}
