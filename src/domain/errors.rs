use thiserror::Error;

/// Errors related to market data and connectivity
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Invalid market data for {symbol}: {reason}")]
    InvalidData { symbol: String, reason: String },

    #[error("Exchange returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Market data circuit breaker open: {0}")]
    CircuitOpen(String),
}

/// Errors raised while wiring or running the regime analysis
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Invalid regime config: {0}")]
    InvalidConfig(#[from] crate::domain::config::RegimeConfigError),

    #[error("Analysis window {window} must exceed the EMA period {ema_period}")]
    WindowTooSmall { window: usize, ema_period: usize },
}
