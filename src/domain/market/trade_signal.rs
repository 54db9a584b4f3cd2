use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TradeSignal {
    Buy,
    Sell,
    /// Do nothing (most of the time)
    #[default]
    Hold,
    /// Emergency exit
    CloseAll,
}

impl TradeSignal {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, TradeSignal::Hold)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSignal::Buy => "BUY",
            TradeSignal::Sell => "SELL",
            TradeSignal::Hold => "HOLD",
            TradeSignal::CloseAll => "CLOSE_ALL",
        }
    }
}

impl fmt::Display for TradeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
