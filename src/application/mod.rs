// Indicators, regime classification and signal derivation
pub mod analysis;

// Tick fan-out to in-process listeners
pub mod broadcaster;

pub mod guardian;

// History seeding and gap filling
pub mod market_data;

// System orchestrator
pub mod system;
