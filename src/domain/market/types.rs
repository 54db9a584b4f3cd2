use crate::domain::market::market_regime::RegimeAnalysis;
use crate::domain::market::trade_signal::TradeSignal;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLCV bar.
///
/// `timestamp` is the bar's open time in milliseconds since the Unix epoch (UTC).
/// `(symbol, timestamp)` identifies a bar: a forming bar and its closed version
/// share the same identity and the later one replaces the earlier in storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: i64,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn body_size(&self) -> Decimal {
        (self.close - self.open).abs()
    }

    pub fn same_bar(&self, other: &Candle) -> bool {
        self.symbol == other.symbol && self.timestamp == other.timestamp
    }
}

impl fmt::Display for Candle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Candle{{symbol='{}', time={}, o={}, h={}, l={}, c={}}}",
            self.symbol, self.timestamp, self.open, self.high, self.low, self.close
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MarketEvent {
    /// Live update of a kline. `is_closed` is false while the bar is still forming.
    Kline { candle: Candle, is_closed: bool },
    Disconnected { reason: String },
}

/// What the guardian publishes for every processed candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTick {
    pub candle: Candle,
    pub analysis: RegimeAnalysis,
    pub signal: TradeSignal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, close: Decimal) -> Candle {
        Candle {
            symbol: "BTCUSDT".to_string(),
            open,
            high: open.max(close) + dec!(1),
            low: open.min(close) - dec!(1),
            close,
            volume: dec!(10),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_candle_direction() {
        let up = candle(dec!(100), dec!(105));
        assert!(up.is_bullish());
        assert!(!up.is_bearish());
        assert_eq!(up.body_size(), dec!(5));

        let down = candle(dec!(100), dec!(97.5));
        assert!(down.is_bearish());
        assert_eq!(down.body_size(), dec!(2.5));
    }

    #[test]
    fn test_doji_is_neither_bullish_nor_bearish() {
        let doji = candle(dec!(100), dec!(100));
        assert!(!doji.is_bullish());
        assert!(!doji.is_bearish());
        assert_eq!(doji.body_size(), Decimal::ZERO);
    }

    #[test]
    fn test_same_bar_ignores_prices() {
        let a = candle(dec!(100), dec!(101));
        let mut b = candle(dec!(100), dec!(120));
        assert!(a.same_bar(&b));
        b.timestamp += 3_600_000;
        assert!(!a.same_bar(&b));
    }
}
