pub mod binance;
pub mod core;
pub mod mock;
pub mod observability;
pub mod persistence;
pub mod repositories;

pub use repositories::InMemoryCandleRepository;
