use crate::domain::config::RegimeConfig;
use crate::domain::market::market_regime::IndicatorSnapshot;
use crate::domain::market::types::Candle;
use anyhow::{Result, anyhow};
use rust_decimal::prelude::ToPrimitive;
use ta::Next;
use ta::indicators::{ExponentialMovingAverage, SimpleMovingAverage};

fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    (high - low)
        .max((high - prev_close).abs())
        .max((low - prev_close).abs())
}

/// Average True Range with Wilder's smoothing (`atr += (tr - atr) / n`).
///
/// Starts from the first bar's high-low range.
pub struct WilderAtr {
    period: f64,
    prev_close: Option<f64>,
    atr: Option<f64>,
}

impl WilderAtr {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1) as f64,
            prev_close: None,
            atr: None,
        }
    }

    pub fn next(&mut self, high: f64, low: f64, close: f64) -> f64 {
        let tr = match self.prev_close {
            Some(prev_close) => true_range(high, low, prev_close),
            None => high - low,
        };
        let atr = match self.atr {
            Some(atr) => atr + (tr - atr) / self.period,
            None => tr,
        };
        self.prev_close = Some(close);
        self.atr = Some(atr);
        atr
    }
}

/// Manual ADX implementation using standard Wilder's smoothing
///
/// Accumulates the first N values as a sum, then applies Wilder's smoothing.
pub struct ManualAdx {
    period: usize,
    prev_high: Option<f64>,
    prev_low: Option<f64>,
    prev_close: Option<f64>,
    tr_sum: f64,
    plus_dm_sum: f64,
    minus_dm_sum: f64,
    tr_smooth: f64,
    plus_dm_smooth: f64,
    minus_dm_smooth: f64,
    adx_smooth: f64,
    count: usize,
}

impl ManualAdx {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_high: None,
            prev_low: None,
            prev_close: None,
            tr_sum: 0.0,
            plus_dm_sum: 0.0,
            minus_dm_sum: 0.0,
            tr_smooth: 0.0,
            plus_dm_smooth: 0.0,
            minus_dm_smooth: 0.0,
            adx_smooth: 0.0,
            count: 0,
        }
    }

    pub fn next(&mut self, high: f64, low: f64, close: f64) -> f64 {
        let (Some(prev_high), Some(prev_low), Some(prev_close)) =
            (self.prev_high, self.prev_low, self.prev_close)
        else {
            self.prev_high = Some(high);
            self.prev_low = Some(low);
            self.prev_close = Some(close);
            return 0.0;
        };

        let tr = true_range(high, low, prev_close);
        let up_move = high - prev_high;
        let down_move = prev_low - low;
        let plus_dm = if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        };
        let minus_dm = if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        };

        self.count += 1;

        if self.count <= self.period {
            self.tr_sum += tr;
            self.plus_dm_sum += plus_dm;
            self.minus_dm_sum += minus_dm;
            if self.count == self.period {
                self.tr_smooth = self.tr_sum;
                self.plus_dm_smooth = self.plus_dm_sum;
                self.minus_dm_smooth = self.minus_dm_sum;
            }
        } else {
            let n = self.period as f64;
            self.tr_smooth = self.tr_smooth - (self.tr_smooth / n) + tr;
            self.plus_dm_smooth = self.plus_dm_smooth - (self.plus_dm_smooth / n) + plus_dm;
            self.minus_dm_smooth = self.minus_dm_smooth - (self.minus_dm_smooth / n) + minus_dm;
        }

        let mut adx = 0.0;
        if self.count >= self.period && self.tr_smooth > 0.0 {
            let plus_di = 100.0 * self.plus_dm_smooth / self.tr_smooth;
            let minus_di = 100.0 * self.minus_dm_smooth / self.tr_smooth;
            let sum_di = plus_di + minus_di;
            let dx = if sum_di > 0.0 {
                100.0 * (plus_di - minus_di).abs() / sum_di
            } else {
                0.0
            };

            if self.count == self.period {
                self.adx_smooth = dx;
            } else {
                self.adx_smooth =
                    ((self.adx_smooth * (self.period as f64 - 1.0)) + dx) / self.period as f64;
            }
            adx = self.adx_smooth;
        }

        self.prev_high = Some(high);
        self.prev_low = Some(low);
        self.prev_close = Some(close);
        adx
    }
}

/// Streaming bundle of the indicators the regime decision needs.
///
/// Feed candles oldest first; every call returns the values at that candle.
pub struct RegimeIndicators {
    ema: ExponentialMovingAverage,
    adx: ManualAdx,
    atr: WilderAtr,
    atr_baseline: SimpleMovingAverage,
}

impl RegimeIndicators {
    pub fn new(config: &RegimeConfig) -> Result<Self> {
        Ok(Self {
            ema: ExponentialMovingAverage::new(config.ema_period)
                .map_err(|e| anyhow!("ema_period {}: {:?}", config.ema_period, e))?,
            adx: ManualAdx::new(config.adx_period),
            atr: WilderAtr::new(config.atr_period),
            atr_baseline: SimpleMovingAverage::new(config.atr_baseline_period).map_err(|e| {
                anyhow!(
                    "atr_baseline_period {}: {:?}",
                    config.atr_baseline_period,
                    e
                )
            })?,
        })
    }

    pub fn next(&mut self, candle: &Candle) -> Result<IndicatorSnapshot> {
        let open = candle.open.to_f64().unwrap_or(0.0);
        let close = candle.close.to_f64().unwrap_or(0.0);
        // Exchanges occasionally send a high/low that does not bracket open/close
        let high = candle.high.to_f64().unwrap_or(0.0).max(open).max(close);
        let low = candle.low.to_f64().unwrap_or(0.0).min(open).min(close);
        if !(high.is_finite() && low.is_finite() && close.is_finite()) {
            return Err(anyhow!("invalid bar {}", candle));
        }

        let atr = self.atr.next(high, low, close);

        Ok(IndicatorSnapshot {
            price: close,
            ema: self.ema.next(close),
            adx: self.adx.next(high, low, close),
            atr,
            baseline_atr: self.atr_baseline.next(atr),
        })
    }
}

/// Runs a chronological series through fresh indicators and returns the
/// values at its last candle, or `None` for an empty series.
pub fn latest_snapshot(candles: &[Candle], config: &RegimeConfig) -> Result<Option<IndicatorSnapshot>> {
    let mut indicators = RegimeIndicators::new(config)?;
    let mut last = None;
    for candle in candles {
        last = Some(indicators.next(candle)?);
    }
    Ok(last)
}
