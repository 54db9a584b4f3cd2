//! One-shot regime report over the candles stored by `spectator`.
//!
//! Regime parameters come from the same environment variables as the server;
//! the flags below override the market selection.

use anyhow::{Context, Result, bail};
use chrono::{TimeZone, Utc};
use clap::Parser;
use spectator::application::analysis::{RegimeAnalyzer, SignalPolicy};
use spectator::config::Config;
use serde::Serialize;
use spectator::domain::market::market_regime::RegimeAnalysis;
use spectator::domain::market::types::Candle;
use spectator::domain::repositories::CandleRepository;
use spectator::infrastructure::persistence::{Database, SqliteCandleRepository};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Symbol to analyze (defaults to SYMBOL)
    #[arg(short, long)]
    symbol: Option<String>,

    /// Candles per analysis window (defaults to ANALYSIS_WINDOW)
    #[arg(short, long)]
    limit: Option<usize>,

    /// SQLite database (defaults to DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Also replay the regime and signal for each of the last N bars
    #[arg(short, long, default_value = "0")]
    timeline: usize,

    /// Print the symbol, last candle and analysis as JSON
    #[arg(long)]
    json: bool,
}

/// JSON form of the report
#[derive(Serialize)]
struct RegimeReport<'a> {
    symbol: &'a str,
    last_candle: &'a Candle,
    analysis: &'a RegimeAnalysis,
}

/// The newest `window` candles, or an error when nothing can be analyzed.
fn latest_window(candles: &[Candle], window: usize) -> Result<&[Candle]> {
    if window == 0 {
        bail!("--limit must be at least 1");
    }
    if candles.is_empty() {
        bail!("No candles to analyze");
    }
    Ok(&candles[candles.len().saturating_sub(window)..])
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let symbol = cli
        .symbol
        .map(|s| s.to_uppercase())
        .unwrap_or_else(|| config.market.symbol.clone());
    let window = cli.limit.unwrap_or(config.market.analysis_window);
    if window == 0 {
        bail!("--limit must be at least 1");
    }
    let database_url = cli
        .database_url
        .unwrap_or_else(|| config.market.database_url.clone());

    let analyzer = RegimeAnalyzer::new(config.regime.to_regime_config()?)?;
    let db = Database::new(&database_url).await?;
    let repository = SqliteCandleRepository::new(db.pool.clone());

    let candles = repository
        .find_last(&symbol, window.saturating_add(cli.timeline))
        .await
        .with_context(|| format!("Failed to load candles for {}", symbol))?;
    if candles.is_empty() {
        bail!("No stored candles for {} in {}", symbol, database_url);
    }

    if cli.timeline > 0 {
        print_timeline(&analyzer, &candles, window, cli.timeline)?;
    }

    let latest = latest_window(&candles, window)?;
    let analysis = analyzer.analyze(latest)?;
    let Some(last) = latest.last() else {
        bail!("No stored candles for {} in {}", symbol, database_url);
    };

    if cli.json {
        let report = RegimeReport {
            symbol: &symbol,
            last_candle: last,
            analysis: &analysis,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Symbol:        {}", symbol);
    println!("Last candle:   {} (close {})", format_time(last.timestamp), last.close);
    println!("Candles used:  {}", analysis.candles_used);
    println!("Regime:        {}", analysis.regime);
    match analysis.indicators {
        Some(i) => {
            println!("Price / EMA:   {:.4} / {:.4}", i.price, i.ema);
            println!("ADX:           {:.2}", i.adx);
            println!(
                "ATR:           {:.4} (baseline {:.4}, ratio {:.2})",
                i.atr,
                i.baseline_atr,
                i.atr_ratio().unwrap_or(0.0)
            );
        }
        None => println!(
            "Indicators:    not enough data (need {})",
            analyzer.config().min_candles()
        ),
    }

    Ok(())
}

/// Replay the last `bars` closes through the analyzer and signal policy.
fn print_timeline(
    analyzer: &RegimeAnalyzer,
    candles: &[Candle],
    window: usize,
    bars: usize,
) -> Result<()> {
    let mut policy = SignalPolicy::new();
    let first = candles.len().saturating_sub(bars);

    println!("{:<20} {:>14} {:<14} SIGNAL", "TIME", "CLOSE", "REGIME");
    for end in first..candles.len() {
        let start = (end + 1).saturating_sub(window);
        let slice = &candles[start..=end];
        let analysis = analyzer.analyze(slice)?;
        let signal = policy.evaluate(&candles[end].symbol, &analysis);
        println!(
            "{:<20} {:>14} {:<14} {}",
            format_time(candles[end].timestamp),
            candles[end].close,
            analysis.regime.to_string(),
            signal
        );
    }
    println!();
    Ok(())
}

fn format_time(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}
