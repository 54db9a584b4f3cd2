//! Regime transitions to trade signals.
//!
//! | New regime    | Previous regime            | Signal     |
//! |---------------|----------------------------|------------|
//! | Volatile      | anything (or none)         | `CloseAll` |
//! | TrendingUp    | anything else than TrendingUp   | `Buy`  |
//! | TrendingDown  | anything else than TrendingDown | `Sell` |
//! | unchanged / Sideways / inconclusive | -        | `Hold`     |
//!
//! The first conclusive observation of a symbol only sets the baseline.

use crate::domain::market::market_regime::{MarketRegime, RegimeAnalysis};
use crate::domain::market::trade_signal::TradeSignal;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SignalPolicy {
    last_regime: HashMap<String, MarketRegime>,
}

impl SignalPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_regime(&self, symbol: &str) -> Option<MarketRegime> {
        self.last_regime.get(symbol).copied()
    }

    /// Evaluate a fresh analysis and remember its regime.
    pub fn evaluate(&mut self, symbol: &str, analysis: &RegimeAnalysis) -> TradeSignal {
        if !analysis.is_conclusive() {
            return TradeSignal::Hold;
        }

        let current = analysis.regime;
        let previous = self.last_regime.insert(symbol.to_string(), current);

        match (previous, current) {
            (_, MarketRegime::Volatile) => TradeSignal::CloseAll,
            (None, _) => TradeSignal::Hold,
            (Some(prev), now) if prev == now => TradeSignal::Hold,
            (Some(_), MarketRegime::TrendingUp) => TradeSignal::Buy,
            (Some(_), MarketRegime::TrendingDown) => TradeSignal::Sell,
            (Some(_), MarketRegime::Sideways) => TradeSignal::Hold,
        }
    }

    pub fn reset(&mut self, symbol: &str) {
        self.last_regime.remove(symbol);
    }
}
