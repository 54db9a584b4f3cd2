//! Configuration domain module
//!
//! Validated value objects built from the environment-level `Config`.

pub mod regime_config;

pub use regime_config::{RegimeConfig, RegimeConfigError};
