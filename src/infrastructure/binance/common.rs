//! Wire helpers shared by the Binance REST client and kline stream

use crate::domain::market::types::Candle;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::warn;

/// Binance serves at most this many klines per request.
pub const MAX_KLINES_PER_REQUEST: usize = 1000;

/// Binance encodes prices and volumes as decimal strings.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim()).ok()
}

/// Decode one REST kline row `[openTime, "o", "h", "l", "c", "v", closeTime, ...]`.
pub fn parse_kline_row(symbol: &str, row: &serde_json::Value) -> Option<Candle> {
    let arr = row.as_array()?;
    if arr.len() < 6 {
        return None;
    }

    let field = |i: usize| arr[i].as_str().and_then(parse_decimal);

    Some(Candle {
        symbol: symbol.to_string(),
        timestamp: arr[0].as_i64()?,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

/// Decode a klines response, skipping malformed rows.
pub fn parse_kline_rows(symbol: &str, rows: &[serde_json::Value]) -> Vec<Candle> {
    rows.iter()
        .filter_map(|row| {
            let candle = parse_kline_row(symbol, row);
            if candle.is_none() {
                warn!("Skipping malformed kline row for {}: {}", symbol, row);
            }
            candle
        })
        .collect()
}
