//! Spectator - headless market regime observer
//!
//! Watches one symbol, keeps its candle history in SQLite and logs regime
//! changes and signals. Metrics are pushed as structured JSON to stdout.
//!
//! # Usage
//! ```sh
//! MODE=mock OBSERVABILITY_INTERVAL=30 cargo run --bin spectator
//! ```

use anyhow::Result;
use spectator::application::system::Application;
use spectator::config::Config;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Spectator {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: Mode={:?}, Symbol={}, Timeframe={}, Database={}",
        config.mode, config.market.symbol, config.market.timeframe, config.market.database_url
    );

    let app = Application::build(config).await?;
    let handle = app.start().await?;

    if let Some(regime) = handle.guardian.current_regime().await {
        info!("Current regime: {}", regime);
    }

    info!("Running. Press Ctrl+C to shutdown.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting...");
    handle.shutdown();

    Ok(())
}
