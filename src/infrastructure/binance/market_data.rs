//! Binance Market Data Service
//!
//! Historical klines over REST (retry middleware plus circuit breaker) and
//! live klines over the WebSocket kline stream.

use super::common::{MAX_KLINES_PER_REQUEST, parse_kline_rows};
use super::websocket::BinanceKlineStream;
use crate::domain::errors::MarketDataError;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::{Candle, MarketEvent};
use crate::domain::ports::MarketDataService;
use crate::infrastructure::core::circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerSettings,
};
use crate::infrastructure::core::http_client_factory::{HttpClientFactory, build_url_with_query};
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Receiver;
use tracing::{debug, info};

pub struct BinanceMarketDataService {
    client: ClientWithMiddleware,
    base_url: String,
    kline_stream: BinanceKlineStream,
    circuit_breaker: CircuitBreaker,
    metrics: Option<Metrics>,
}

impl BinanceMarketDataService {
    pub fn builder() -> BinanceMarketDataServiceBuilder {
        BinanceMarketDataServiceBuilder::default()
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        start_time: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let limit_str = limit.to_string();
        let start_str = start_time.map(|t| t.to_string());
        let mut params = vec![
            ("symbol", symbol),
            ("interval", timeframe.to_binance_string()),
            ("limit", limit_str.as_str()),
        ];
        if let Some(start) = &start_str {
            params.push(("startTime", start.as_str()));
        }
        let url = build_url_with_query(&format!("{}/api/v3/klines", self.base_url), &params)?;

        let started = Instant::now();
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .context("Failed to fetch klines from Binance")?;
        if let Some(metrics) = &self.metrics {
            metrics.observe_api_latency("binance", "klines", started.elapsed().as_secs_f64());
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MarketDataError::HttpStatus {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .context("Failed to parse Binance klines response")?;

        let candles = parse_kline_rows(symbol, &rows);
        debug!(
            "BinanceMarketDataService: Fetched {} {} bars for {} (start={:?})",
            candles.len(),
            timeframe,
            symbol,
            start_time
        );
        Ok(candles)
    }
}

#[derive(Default)]
pub struct BinanceMarketDataServiceBuilder {
    base_url: Option<String>,
    ws_url: Option<String>,
    request_timeout: Option<Duration>,
    circuit_breaker: Option<CircuitBreakerSettings>,
    metrics: Option<Metrics>,
}

impl BinanceMarketDataServiceBuilder {
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn circuit_breaker(mut self, settings: CircuitBreakerSettings) -> Self {
        self.circuit_breaker = Some(settings);
        self
    }

    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<BinanceMarketDataService> {
        let base_url = self
            .base_url
            .ok_or_else(|| anyhow!("base_url is required"))?;
        let ws_url = self.ws_url.ok_or_else(|| anyhow!("ws_url is required"))?;

        let client =
            HttpClientFactory::create_client(self.request_timeout.unwrap_or(Duration::from_secs(30)))?;

        Ok(BinanceMarketDataService {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            kline_stream: BinanceKlineStream::new(ws_url, self.metrics.clone()),
            circuit_breaker: CircuitBreaker::new(
                "BinanceMarketData",
                self.circuit_breaker.unwrap_or_default(),
            ),
            metrics: self.metrics,
        })
    }
}

#[async_trait]
impl MarketDataService for BinanceMarketDataService {
    async fn subscribe(&self, symbol: &str, timeframe: Timeframe) -> Result<Receiver<MarketEvent>> {
        // Receiver first so the first kline after connect is not lost
        let rx = self.kline_stream.subscribe_mpsc(100);
        self.kline_stream.start(symbol, timeframe).await;
        info!(
            "BinanceMarketDataService: Subscribed to {} {} klines",
            symbol, timeframe
        );
        Ok(rx)
    }

    async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        start_time: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let limit = limit.clamp(1, MAX_KLINES_PER_REQUEST);

        self.circuit_breaker
            .call(self.fetch_klines(symbol, timeframe, limit, start_time))
            .await
            .map_err(|e| match e {
                CircuitBreakerError::Open(msg) => MarketDataError::CircuitOpen(msg).into(),
                CircuitBreakerError::Inner(inner) => inner,
            })
    }
}
