// Market analysis domain
pub mod market_regime;
pub mod timeframe;
pub mod trade_signal;
pub mod types;
