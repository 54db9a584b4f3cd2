pub mod indicators;
pub mod regime_analyzer;
pub mod signal_policy;

pub use regime_analyzer::RegimeAnalyzer;
pub use signal_policy::SignalPolicy;
