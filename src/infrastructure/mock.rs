use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::{Candle, MarketEvent};
use crate::domain::ports::MarketDataService;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{
    RwLock,
    mpsc::{self, Receiver, Sender},
};
use tracing::{debug, info};

/// Parameters of one `get_klines` call, recorded for inspection in tests.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineRequest {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub limit: usize,
    pub start_time: Option<i64>,
}

/// Offline market data: preloaded history plus either manual `publish` or a
/// random-walk kline simulation.
#[derive(Clone)]
pub struct MockMarketDataService {
    subscribers: Arc<RwLock<Vec<Sender<MarketEvent>>>>,
    history: Arc<RwLock<Vec<Candle>>>,
    requests: Arc<RwLock<Vec<KlineRequest>>>,
    pub simulation_enabled: bool,
    pub simulation_interval: Duration,
}

impl MockMarketDataService {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(Vec::new())),
            history: Arc::new(RwLock::new(Vec::new())),
            requests: Arc::new(RwLock::new(Vec::new())),
            simulation_enabled: true,
            simulation_interval: Duration::from_millis(500),
        }
    }

    pub fn new_no_sim() -> Self {
        Self {
            simulation_enabled: false,
            ..Self::new()
        }
    }

    /// Replace the candles served by `get_klines`.
    pub async fn set_history(&self, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.timestamp);
        *self.history.write().await = candles;
    }

    /// Add candles to the served history (same-bar entries are replaced).
    pub async fn push_history(&self, candles: &[Candle]) {
        let mut history = self.history.write().await;
        for candle in candles {
            history.retain(|c| !c.same_bar(candle));
            history.push(candle.clone());
        }
        history.sort_by_key(|c| c.timestamp);
    }

    pub async fn requests(&self) -> Vec<KlineRequest> {
        self.requests.read().await.clone()
    }

    pub async fn publish(&self, event: MarketEvent) {
        let mut subs = self.subscribers.write().await;
        if subs.is_empty() {
            return;
        }

        // retain only active subscribers
        let mut active_subs = Vec::with_capacity(subs.len());
        for tx in subs.iter() {
            if tx.send(event.clone()).await.is_ok() {
                active_subs.push(tx.clone());
            }
        }
        *subs = active_subs;
    }

    async fn last_close(&self, symbol: &str) -> Option<(i64, f64)> {
        use rust_decimal::prelude::ToPrimitive;
        self.history
            .read()
            .await
            .iter()
            .rev()
            .find(|c| c.symbol == symbol)
            .and_then(|c| c.close.to_f64().map(|close| (c.timestamp, close)))
    }

    fn spawn_simulation(&self, symbol: String, timeframe: Timeframe) {
        let service = self.clone();
        let period = self.simulation_interval;

        tokio::spawn(async move {
            let (last_ts, mut price) = match service.last_close(&symbol).await {
                Some(last) => last,
                None => (
                    timeframe.period_start(Utc::now().timestamp_millis()) - timeframe.to_millis(),
                    base_price(&symbol),
                ),
            };
            // Simulated time runs one bar per four updates
            let mut bar_time = last_ts + timeframe.to_millis();
            let mut bar = BarBuilder::open(price);

            info!(
                "MockMarketDataService: Starting kline simulation for {} {}",
                symbol, timeframe
            );

            let mut interval = tokio::time::interval(period);
            let mut update = 0u64;
            loop {
                interval.tick().await;
                update += 1;

                let change_pct = rand::rng().random_range(-0.005..0.005);
                price *= 1.0 + change_pct;
                bar.update(price);

                let is_closed = update % 4 == 0;
                let candle = bar.to_candle(&symbol, bar_time);
                service
                    .publish(MarketEvent::Kline { candle, is_closed })
                    .await;

                if is_closed {
                    bar_time += timeframe.to_millis();
                    bar = BarBuilder::open(price);
                }

                if service.subscribers.read().await.is_empty() {
                    debug!("MockMarketDataService: no subscribers left, stopping simulation");
                    break;
                }
            }
        });
    }
}

impl Default for MockMarketDataService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketDataService for MockMarketDataService {
    async fn subscribe(&self, symbol: &str, timeframe: Timeframe) -> Result<Receiver<MarketEvent>> {
        let (tx, rx) = mpsc::channel(100);
        self.subscribers.write().await.push(tx);

        if self.simulation_enabled {
            self.spawn_simulation(symbol.to_string(), timeframe);
            info!(
                "MockMarketDataService: Subscribed to {} {} (Simulation Enabled)",
                symbol, timeframe
            );
        } else {
            info!(
                "MockMarketDataService: Subscribed to {} {} (Simulation Disabled)",
                symbol, timeframe
            );
        }

        Ok(rx)
    }

    async fn get_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        start_time: Option<i64>,
    ) -> Result<Vec<Candle>> {
        self.requests.write().await.push(KlineRequest {
            symbol: symbol.to_string(),
            timeframe,
            limit,
            start_time,
        });

        let history = self.history.read().await;
        let series = history.iter().filter(|c| c.symbol == symbol);
        let candles: Vec<Candle> = match start_time {
            Some(start) => series
                .filter(|c| c.timestamp >= start)
                .take(limit)
                .cloned()
                .collect(),
            None => {
                let all: Vec<&Candle> = series.collect();
                let skip = all.len().saturating_sub(limit);
                all.into_iter().skip(skip).cloned().collect()
            }
        };
        Ok(candles)
    }
}

/// Random-walk history ending with the bar before the current one.
pub fn generate_history(symbol: &str, timeframe: Timeframe, count: usize) -> Vec<Candle> {
    let step = timeframe.to_millis();
    let current = timeframe.period_start(Utc::now().timestamp_millis());
    let mut price = base_price(symbol);
    let mut rng = rand::rng();

    (0..count)
        .map(|i| {
            let open_time = current - (count - i) as i64 * step;
            let mut bar = BarBuilder::open(price);
            for _ in 0..4 {
                price *= 1.0 + rng.random_range(-0.004..0.0045);
                bar.update(price);
            }
            bar.to_candle(symbol, open_time)
        })
        .collect()
}

fn base_price(symbol: &str) -> f64 {
    if symbol.contains("BTC") {
        96000.0
    } else if symbol.contains("ETH") {
        3400.0
    } else {
        150.0
    }
}

struct BarBuilder {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl BarBuilder {
    fn open(price: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }

    fn update(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += 1.5;
    }

    fn to_candle(&self, symbol: &str, timestamp: i64) -> Candle {
        let dec = |v: f64| Decimal::from_f64(v).unwrap_or(Decimal::ZERO).round_dp(8);
        Candle {
            symbol: symbol.to_string(),
            open: dec(self.open),
            high: dec(self.high),
            low: dec(self.low),
            close: dec(self.close),
            volume: dec(self.volume),
            timestamp,
        }
    }
}
