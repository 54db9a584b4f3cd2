//! In-process fan-out of [`MarketTick`]s to any number of listeners
//! (dashboards, alerting, recorders).

use crate::domain::market::types::MarketTick;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

pub trait MarketTickListener: Send + Sync {
    fn on_tick(&self, tick: &MarketTick);

    /// Listeners that report closed are dropped after the next broadcast.
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> MarketTickListener for F
where
    F: Fn(&MarketTick) + Send + Sync,
{
    fn on_tick(&self, tick: &MarketTick) {
        self(tick)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

type Registered = (ListenerId, Arc<dyn MarketTickListener>);

/// Thread-safe listener registry.
///
/// Dispatch works on a snapshot of the registry, so a listener may register or
/// unregister (from a spawned task) while a broadcast is running.
pub struct MarketDataBroadcaster {
    listeners: Arc<RwLock<Vec<Registered>>>,
}

impl MarketDataBroadcaster {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn register(&self, listener: Arc<dyn MarketTickListener>) -> ListenerId {
        let id = ListenerId(Uuid::new_v4());
        self.listeners.write().await.push((id, listener));
        debug!("MarketDataBroadcaster: registered listener {:?}", id);
        id
    }

    /// Register a channel-backed listener and hand back its receiving end.
    pub async fn subscribe_channel(&self, capacity: usize) -> (ListenerId, mpsc::Receiver<MarketTick>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = self.register(Arc::new(ChannelListener::new(tx))).await;
        (id, rx)
    }

    pub async fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().await;
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        before != listeners.len()
    }

    /// Deliver the tick to every listener in registration order.
    /// Returns the number of listeners that received it.
    pub async fn broadcast(&self, tick: &MarketTick) -> usize {
        let snapshot: Vec<Registered> = self.listeners.read().await.clone();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, listener) in &snapshot {
            if listener.is_closed() {
                closed.push(*id);
                continue;
            }
            listener.on_tick(tick);
            delivered += 1;
        }

        if !closed.is_empty() {
            let mut listeners = self.listeners.write().await;
            listeners.retain(|(id, _)| !closed.contains(id));
            debug!(
                "MarketDataBroadcaster: dropped {} closed listeners",
                closed.len()
            );
        }

        delivered
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }
}

impl Default for MarketDataBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MarketDataBroadcaster {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

/// Forwards ticks into a bounded mpsc channel; a full channel drops the tick.
pub struct ChannelListener {
    tx: mpsc::Sender<MarketTick>,
}

impl ChannelListener {
    pub fn new(tx: mpsc::Sender<MarketTick>) -> Self {
        Self { tx }
    }
}

impl MarketTickListener for ChannelListener {
    fn on_tick(&self, tick: &MarketTick) {
        if let Err(mpsc::error::TrySendError::Full(dropped)) = self.tx.try_send(tick.clone()) {
            warn!(
                "ChannelListener: consumer is lagging, dropped tick for {} @ {}",
                dropped.candle.symbol, dropped.candle.timestamp
            );
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::market_regime::RegimeAnalysis;
    use crate::domain::market::trade_signal::TradeSignal;
    use crate::domain::market::types::Candle;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tick(timestamp: i64) -> MarketTick {
        MarketTick {
            candle: Candle {
                symbol: "BTCUSDT".to_string(),
                open: dec!(100),
                high: dec!(101),
                low: dec!(99),
                close: dec!(100.5),
                volume: dec!(3),
                timestamp,
            },
            analysis: RegimeAnalysis::insufficient_data(1),
            signal: TradeSignal::Hold,
        }
    }

    struct CountingListener {
        count: Arc<AtomicUsize>,
    }

    impl MarketTickListener for CountingListener {
        fn on_tick(&self, _tick: &MarketTick) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_register_and_broadcast() {
        let bus = MarketDataBroadcaster::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.register(Arc::new(CountingListener {
            count: count.clone(),
        }))
        .await;
        bus.register(Arc::new(CountingListener {
            count: count.clone(),
        }))
        .await;

        assert_eq!(bus.broadcast(&tick(0)).await, 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unregistered_listener_receives_nothing() {
        let bus = MarketDataBroadcaster::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id = bus
            .register(Arc::new(CountingListener {
                count: count.clone(),
            }))
            .await;

        assert!(bus.unregister(id).await);
        assert!(!bus.unregister(id).await);

        bus.broadcast(&tick(0)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.listener_count().await, 0);
    }

    #[tokio::test]
    async fn test_registration_order_preserved() {
        let bus = MarketDataBroadcaster::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let order = order.clone();
            bus.register(Arc::new(move |_: &MarketTick| {
                order.lock().unwrap().push(n);
            }))
            .await;
        }

        bus.broadcast(&tick(0)).await;
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_channel_listener_forwards_and_is_pruned_when_closed() {
        let bus = MarketDataBroadcaster::new();
        let (_, mut rx) = bus.subscribe_channel(4).await;

        bus.broadcast(&tick(42)).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.candle.timestamp, 42);

        drop(rx);
        assert_eq!(bus.broadcast(&tick(43)).await, 0);
        assert_eq!(bus.listener_count().await, 0);
    }

    #[tokio::test]
    async fn test_full_channel_drops_tick() {
        let bus = MarketDataBroadcaster::new();
        let (_, mut rx) = bus.subscribe_channel(1).await;

        bus.broadcast(&tick(1)).await;
        bus.broadcast(&tick(2)).await;

        assert_eq!(rx.recv().await.unwrap().candle.timestamp, 1);
        assert!(rx.try_recv().is_err());
    }
}
