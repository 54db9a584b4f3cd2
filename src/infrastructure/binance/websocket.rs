//! Binance kline stream: one connection per `(symbol, interval)`, fanned out
//! over a broadcast channel and kept alive with pings and reconnects.

use super::common::parse_decimal;
use crate::domain::errors::MarketDataError;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::types::{Candle, MarketEvent};
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

const MAX_BACKOFF_SECS: u64 = 60;
const PING_INTERVAL: Duration = Duration::from_secs(180);

pub struct BinanceKlineStream {
    ws_url: String,
    event_tx: broadcast::Sender<MarketEvent>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
    metrics: Option<Metrics>,
}

impl BinanceKlineStream {
    pub fn new(ws_url: impl Into<String>, metrics: Option<Metrics>) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self {
            ws_url: ws_url.into(),
            event_tx,
            task_handle: Mutex::new(None),
            metrics,
        }
    }

    /// `{ws}/ws/{symbol}@kline_{interval}` with the symbol lower-cased.
    pub fn stream_url(ws_url: &str, symbol: &str, timeframe: Timeframe) -> String {
        format!(
            "{}/ws/{}@kline_{}",
            ws_url.trim_end_matches('/'),
            symbol.to_lowercase(),
            timeframe.to_binance_string()
        )
    }

    /// (Re)start the connection task for the given stream.
    pub async fn start(&self, symbol: &str, timeframe: Timeframe) {
        let mut handle_guard = self.task_handle.lock().await;
        if let Some(handle) = handle_guard.take() {
            debug!("BinanceKlineStream: Aborting previous WebSocket task");
            handle.abort();
        }

        let url = Self::stream_url(&self.ws_url, symbol, timeframe);
        let event_tx = self.event_tx.clone();
        let metrics = self.metrics.clone();
        *handle_guard = Some(tokio::spawn(async move {
            Self::run(url, event_tx, metrics).await;
        }));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.event_tx.subscribe()
    }

    /// Bridge a broadcast receiver into an mpsc channel of `capacity`.
    pub fn subscribe_mpsc(&self, capacity: usize) -> mpsc::Receiver<MarketEvent> {
        let mut broadcast_rx = self.subscribe();
        let (tx, rx) = mpsc::channel(capacity);

        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Kline broadcast receiver lagged, missed {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Kline broadcast channel closed");
                        break;
                    }
                }
            }
        });

        rx
    }

    async fn run(url: String, event_tx: broadcast::Sender<MarketEvent>, metrics: Option<Metrics>) {
        let mut backoff = 1;

        loop {
            match Self::connect_and_stream(&url, &event_tx).await {
                Ok(()) => {
                    info!("Binance WebSocket connection closed gracefully");
                    backoff = 1;
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                }
                Err(e) => {
                    error!(
                        "Binance WebSocket error: {}. Reconnecting in {}s...",
                        e, backoff
                    );
                    let _ = event_tx.send(MarketEvent::Disconnected {
                        reason: e.to_string(),
                    });
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                }
            }

            if let Some(metrics) = &metrics {
                metrics.inc_reconnects("binance");
            }
        }
    }

    async fn connect_and_stream(url: &str, event_tx: &broadcast::Sender<MarketEvent>) -> Result<()> {
        info!("Connecting to Binance WebSocket: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Binance WebSocket")?;

        info!("Binance WebSocket connected successfully");

        let (mut write, mut read) = ws_stream.split();

        // Single writer task: pings and pongs share the sink
        let (ws_tx, mut ws_rx) = mpsc::channel::<Message>(16);
        let writer = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let tx_ping = ws_tx.clone();
        let pinger = tokio::spawn(async move {
            let mut ping_interval = tokio::time::interval(PING_INTERVAL);
            ping_interval.tick().await;
            loop {
                ping_interval.tick().await;
                if tx_ping.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        });

        let mut outcome = Ok(());
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match parse_kline_message(&text) {
                    Ok(Some((candle, is_closed))) => {
                        // No receivers is fine: nobody is listening yet
                        let _ = event_tx.send(MarketEvent::Kline { candle, is_closed });
                    }
                    Ok(None) => debug!("Ignoring non-kline message"),
                    Err(e) => warn!("Failed to handle Binance message: {}", e),
                },
                Ok(Message::Ping(payload)) => {
                    let _ = ws_tx.send(Message::Pong(payload)).await;
                }
                Ok(Message::Close(frame)) => {
                    match frame {
                        Some(cf) => info!(
                            "Binance WebSocket closed by server: Code {} Reason '{}'",
                            cf.code, cf.reason
                        ),
                        None => info!("Binance WebSocket closed by server"),
                    }
                    break;
                }
                Err(e) => {
                    outcome = Err(MarketDataError::ConnectionLost {
                        reason: e.to_string(),
                    }
                    .into());
                    break;
                }
                _ => {}
            }
        }

        pinger.abort();
        writer.abort();
        outcome
    }
}

#[derive(Debug, Deserialize)]
struct KlineEnvelope {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

#[derive(Debug, Deserialize)]
struct CombinedStream {
    data: serde_json::Value,
}

/// Decode a kline stream message. Raw and combined (`{"stream", "data"}`)
/// payloads are accepted; other event types yield `None`.
pub fn parse_kline_message(text: &str) -> Result<Option<(Candle, bool)>, MarketDataError> {
    let invalid = |symbol: &str, reason: String| MarketDataError::InvalidData {
        symbol: symbol.to_string(),
        reason,
    };

    let mut value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| invalid("?", e.to_string()))?;
    if value.get("stream").is_some() {
        let combined: CombinedStream =
            serde_json::from_value(value).map_err(|e| invalid("?", e.to_string()))?;
        value = combined.data;
    }
    if value.get("e").and_then(|e| e.as_str()) != Some("kline") {
        return Ok(None);
    }

    let envelope: KlineEnvelope =
        serde_json::from_value(value).map_err(|e| invalid("?", e.to_string()))?;
    let k = envelope.kline;
    let symbol = envelope.symbol;

    let field = |name: &str, raw: &str| {
        parse_decimal(raw).ok_or_else(|| invalid(&symbol, format!("bad {} '{}'", name, raw)))
    };

    let candle = Candle {
        symbol: symbol.clone(),
        open: field("open", &k.open)?,
        high: field("high", &k.high)?,
        low: field("low", &k.low)?,
        close: field("close", &k.close)?,
        volume: field("volume", &k.volume)?,
        timestamp: k.open_time,
    };
    Ok(Some((candle, k.is_closed)))
}
