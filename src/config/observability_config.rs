//! Observability configuration parsing from environment variables.

use super::{EnvLookup, parse_env};
use anyhow::Result;

/// Push-based metrics reporting
#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

impl ObservabilityEnvConfig {
    pub fn from_lookup(lookup: &EnvLookup) -> Result<Self> {
        let interval_secs = parse_env(lookup, "OBSERVABILITY_INTERVAL", 60u64)?;
        Ok(Self {
            enabled: parse_env(lookup, "OBSERVABILITY_ENABLED", true)?,
            interval_secs: interval_secs.max(1),
        })
    }
}
