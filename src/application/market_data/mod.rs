pub mod sync;

pub use sync::{MarketDataSync, SyncConfig, SyncMode, SyncReport};
