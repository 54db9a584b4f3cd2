pub mod common;
pub mod market_data;
pub mod websocket;

pub use market_data::{BinanceMarketDataService, BinanceMarketDataServiceBuilder};
pub use websocket::BinanceKlineStream;
