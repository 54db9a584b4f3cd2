use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::analysis::RegimeAnalyzer;
use crate::application::broadcaster::MarketDataBroadcaster;
use crate::application::guardian::Guardian;
use crate::application::market_data::sync::{MarketDataSync, SyncReport};
use crate::config::{Config, Mode};
use crate::domain::ports::MarketDataService;
use crate::domain::repositories::CandleRepository;
use crate::infrastructure::binance::BinanceMarketDataService;
use crate::infrastructure::mock::{MockMarketDataService, generate_history};
use crate::infrastructure::observability::{Metrics, MetricsReporter};
use crate::infrastructure::persistence::{Database, SqliteCandleRepository};

pub struct Application {
    pub config: Config,
    pub market_service: Arc<dyn MarketDataService>,
    pub candle_repository: Arc<dyn CandleRepository>,
    pub broadcaster: Arc<MarketDataBroadcaster>,
    pub guardian: Arc<Guardian>,
    pub metrics: Metrics,
}

/// Running system. Dropping it leaves the tasks running; call `shutdown` to stop them.
pub struct SystemHandle {
    pub broadcaster: Arc<MarketDataBroadcaster>,
    pub guardian: Arc<Guardian>,
    pub metrics: Metrics,
    pub sync_report: Option<SyncReport>,
    pub task: JoinHandle<()>,
    pub reporter_task: Option<JoinHandle<()>>,
}

impl SystemHandle {
    pub fn shutdown(self) {
        self.task.abort();
        if let Some(reporter) = self.reporter_task {
            reporter.abort();
        }
    }
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        info!("Building Spectator (Mode: {:?})...", config.mode);

        let metrics = Metrics::new().context("Failed to register metrics")?;

        let market_service: Arc<dyn MarketDataService> = match config.mode {
            Mode::Mock => {
                info!("Using Mock market data");
                let mock = MockMarketDataService::new();
                mock.set_history(generate_history(
                    &config.market.symbol,
                    config.market.timeframe,
                    config.market.history_seed_limit,
                ))
                .await;
                Arc::new(mock)
            }
            Mode::Binance => {
                info!("Using Binance market data ({})", config.binance.base_url);
                Arc::new(
                    BinanceMarketDataService::builder()
                        .base_url(config.binance.base_url.clone())
                        .ws_url(config.binance.ws_url.clone())
                        .request_timeout(config.binance.request_timeout)
                        .metrics(metrics.clone())
                        .build()?,
                )
            }
        };

        let database = Database::new(&config.market.database_url).await?;
        let candle_repository: Arc<dyn CandleRepository> =
            Arc::new(SqliteCandleRepository::new(database.pool.clone()));

        Self::with_services(config, market_service, candle_repository, metrics)
    }

    /// Wire the application around already constructed services.
    pub fn with_services(
        config: Config,
        market_service: Arc<dyn MarketDataService>,
        candle_repository: Arc<dyn CandleRepository>,
        metrics: Metrics,
    ) -> Result<Self> {
        let analyzer = RegimeAnalyzer::new(config.to_regime_config()?)?;
        let broadcaster = Arc::new(MarketDataBroadcaster::new());
        let guardian = Arc::new(
            Guardian::new(
                config.market.symbol.clone(),
                candle_repository.clone(),
                analyzer,
                broadcaster.clone(),
                config.market.analysis_window,
            )?
            .with_metrics(metrics.clone())
            .with_backfill(
                MarketDataSync::new(
                    market_service.clone(),
                    candle_repository.clone(),
                    config.market.sync_config(),
                )
                .with_metrics(metrics.clone()),
                config.market.timeframe,
            ),
        );

        Ok(Self {
            config,
            market_service,
            candle_repository,
            broadcaster,
            guardian,
            metrics,
        })
    }

    pub async fn start(self) -> Result<SystemHandle> {
        let symbol = self.config.market.symbol.clone();
        let timeframe = self.config.market.timeframe;

        if let Some(days) = self.config.market.retention_days {
            let pruned = self.candle_repository.prune(days).await?;
            info!("Pruned {} candles older than {} days", pruned, days);
        }

        let sync = MarketDataSync::new(
            self.market_service.clone(),
            self.candle_repository.clone(),
            self.config.market.sync_config(),
        )
        .with_metrics(self.metrics.clone());

        // Stored history is still usable when the exchange is unreachable
        let sync_report = match sync.seed_history(&symbol, timeframe).await {
            Ok(report) => {
                info!(
                    "History sync for {} {}: {} ({} candles stored)",
                    symbol, timeframe, report.mode, report.stored
                );
                Some(report)
            }
            Err(e) => {
                warn!("History sync failed, continuing with stored candles: {:#}", e);
                None
            }
        };

        let rx = self
            .market_service
            .subscribe(&symbol, timeframe)
            .await
            .with_context(|| format!("Failed to subscribe to {} {} klines", symbol, timeframe))?;

        let guardian = self.guardian.clone();
        let task = tokio::spawn(async move {
            guardian.run(rx).await;
        });

        let reporter_task = if self.config.observability.enabled {
            let reporter = MetricsReporter::new(
                self.guardian.latest_ticks(),
                self.metrics.clone(),
                self.config.observability.interval_secs,
            );
            info!(
                "Metrics reporter started (interval: {}s)",
                self.config.observability.interval_secs
            );
            Some(tokio::spawn(reporter.run()))
        } else {
            info!("Metrics reporting disabled.");
            None
        };

        info!("Spectator watching {} {}", symbol, timeframe);

        Ok(SystemHandle {
            broadcaster: self.broadcaster,
            guardian: self.guardian,
            metrics: self.metrics,
            sync_report,
            task,
            reporter_task,
        })
    }
}
