//! Push-based observability for Spectator
//!
//! Outbound data only: no HTTP server, no incoming requests. Metrics live in a
//! Prometheus registry and are periodically printed as structured JSON.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::{LatestTicks, MetricsReporter};
