//! Per-candle technical indicators
//!
//! Every windowed indicator yields `None` until its window is full. Missing is
//! never folded into zero: zero is a legal oscillator / volume value.

use serde::{Deserialize, Serialize};

use crate::{Error, OHLCVExt, Period, Result, OHLCV};

/// Indicator lookbacks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub rsi_period: Period,
    pub ema_fast: Period,
    pub ema_medium: Period,
    pub ema_slow: Period,
    pub atr_period: Period,
    pub volume_period: Period,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: Period::new_const(14),
            ema_fast: Period::new_const(20),
            ema_medium: Period::new_const(50),
            ema_slow: Period::new_const(200),
            atr_period: Period::new_const(14),
            volume_period: Period::new_const(20),
        }
    }
}

impl IndicatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ema_fast >= self.ema_medium || self.ema_medium >= self.ema_slow {
            return Err(Error::InvalidConfig(format!(
                "EMA periods must be strictly increasing (fast {}, medium {}, slow {})",
                self.ema_fast.get(),
                self.ema_medium.get(),
                self.ema_slow.get()
            )));
        }
        Ok(())
    }
}

/// Derived fields for one candle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub rsi: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_medium: Option<f64>,
    pub ema_slow: Option<f64>,
    pub atr: Option<f64>,
    pub volume_ma: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub body: f64,
    pub upper_wick: f64,
    pub lower_wick: f64,
}

impl IndicatorRow {
    /// True when the oscillator, averages, volatility, and volume ratio are all present
    pub fn is_complete(&self) -> bool {
        self.rsi.is_some()
            && self.ema_fast.is_some()
            && self.ema_medium.is_some()
            && self.ema_slow.is_some()
            && self.atr.is_some()
            && self.volume_ratio.is_some()
    }
}

/// Computes [`IndicatorRow`]s for a candle sequence
#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// One row per candle, same order and length as the input.
    pub fn compute<T: OHLCV>(&self, bars: &[T]) -> Vec<IndicatorRow> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close()).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume()).collect();

        let rsi = rsi(&closes, self.config.rsi_period.get());
        let ema_fast = ema(&closes, self.config.ema_fast.get());
        let ema_medium = ema(&closes, self.config.ema_medium.get());
        let ema_slow = ema(&closes, self.config.ema_slow.get());
        let atr = atr(bars, self.config.atr_period.get());
        let volume_ma = sma(&volumes, self.config.volume_period.get());

        bars.iter()
            .enumerate()
            .map(|(i, bar)| IndicatorRow {
                rsi: rsi[i],
                ema_fast: ema_fast[i],
                ema_medium: ema_medium[i],
                ema_slow: ema_slow[i],
                atr: atr[i],
                volume_ma: volume_ma[i],
                volume_ratio: volume_ma[i]
                    .filter(|ma| *ma > 0.0)
                    .map(|ma| bar.volume() / ma),
                body: bar.body(),
                upper_wick: bar.upper_wick(),
                lower_wick: bar.lower_wick(),
            })
            .collect()
    }
}

// ============================================================
// WINDOWED PRIMITIVES
// ============================================================

/// Simple moving average; first value at `period - 1`
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

/// Exponential moving average seeded with the SMA of the first `period` values
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(prev);
    for i in period..values.len() {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        out[i] = Some(prev);
    }
    out
}

/// Wilder RSI; first value at `period`
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let change = |i: usize| closes[i] - closes[i - 1];
    let mut avg_gain = (1..=period).map(|i| change(i).max(0.0)).sum::<f64>() / period as f64;
    let mut avg_loss = (1..=period).map(|i| (-change(i)).max(0.0)).sum::<f64>() / period as f64;
    out[period] = Some(rsi_value(avg_gain, avg_loss));

    let p = period as f64;
    for i in period + 1..closes.len() {
        let d = change(i);
        avg_gain = (avg_gain * (p - 1.0) + d.max(0.0)) / p;
        avg_loss = (avg_loss * (p - 1.0) + (-d).max(0.0)) / p;
        out[i] = Some(rsi_value(avg_gain, avg_loss));
    }
    out
}

#[inline]
fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss <= 0.0 {
        if avg_gain <= 0.0 {
            50.0
        } else {
            100.0
        }
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Wilder average true range; first value at `period - 1`
pub fn atr<T: OHLCV>(bars: &[T], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if period == 0 || bars.len() < period {
        return out;
    }

    let true_range = |i: usize| {
        let bar = &bars[i];
        if i == 0 {
            return bar.range();
        }
        let prev_close = bars[i - 1].close();
        bar.range()
            .max((bar.high() - prev_close).abs())
            .max((bar.low() - prev_close).abs())
    };

    let p = period as f64;
    let mut prev = (0..period).map(true_range).sum::<f64>() / p;
    out[period - 1] = Some(prev);
    for (i, slot) in out.iter_mut().enumerate().skip(period) {
        prev = (prev * (p - 1.0) + true_range(i)) / p;
        *slot = Some(prev);
    }
    out
}

/// Trailing percentile rank (0..=1) of `values[index]` among the defined
/// values in `values[..=index]`; ties take the average rank.
pub fn percentile_rank(values: &[Option<f64>], index: usize) -> Option<f64> {
    let current = (*values.get(index)?)?;
    let (mut below, mut equal, mut total) = (0usize, 0usize, 0usize);
    for v in values[..=index].iter().flatten() {
        total += 1;
        if *v < current {
            below += 1;
        } else if *v == current {
            equal += 1;
        }
    }
    let avg_rank = below as f64 + (equal as f64 + 1.0) / 2.0;
    Some(avg_rank / total as f64)
}

// ============================================================
// TREND BIAS
// ============================================================

/// Trend classification of the latest candle of a (higher-timeframe) sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendBias {
    Uptrend,
    Downtrend,
    #[default]
    Neutral,
}

/// `Uptrend` when close > EMA20 > EMA50, `Downtrend` when close < EMA20 < EMA50.
pub fn trend_bias<T: OHLCV>(bars: &[T]) -> TrendBias {
    let Some(last) = bars.last() else {
        return TrendBias::Neutral;
    };
    let closes: Vec<f64> = bars.iter().map(|b| b.close()).collect();
    let fast = ema(&closes, 20).last().copied().flatten();
    let slow = ema(&closes, 50).last().copied().flatten();

    match (fast, slow) {
        (Some(f), Some(s)) if last.close() > f && f > s => TrendBias::Uptrend,
        (Some(f), Some(s)) if last.close() < f && f < s => TrendBias::Downtrend,
        _ => TrendBias::Neutral,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Candle;

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle::new(i as i64, c, c + 1.0, c - 1.0, c, 100.0))
            .collect()
    }

    #[test]
    fn test_sma_missing_until_full() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(out[0], None);
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(2.0));
        assert_eq!(out[3], Some(3.0));
    }

    #[test]
    fn test_ema_seed_and_step() {
        let out = ema(&[2.0, 4.0, 6.0, 8.0], 3);
        assert_eq!(out[1], None);
        assert_eq!(out[2], Some(4.0));
        // alpha = 0.5: 0.5 * 8 + 0.5 * 4
        assert_eq!(out[3], Some(6.0));
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let out = rsi(&rising, 14);
        assert_eq!(out[13], None);
        assert_eq!(out[14], Some(100.0));

        let flat = vec![5.0; 20];
        assert_eq!(rsi(&flat, 14)[19], Some(50.0));

        let falling: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        assert_eq!(rsi(&falling, 14)[19], Some(0.0));
    }

    #[test]
    fn test_atr_constant_range() {
        let bars = candles_from_closes(&[10.0; 20]);
        let out = atr(&bars, 14);
        assert_eq!(out[12], None);
        assert!((out[13].unwrap() - 2.0).abs() < 1e-12);
        assert!((out[19].unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_rows_same_length_and_missing_prefix() {
        let bars = candles_from_closes(&(0..30).map(|i| 100.0 + i as f64).collect::<Vec<_>>());
        let rows = IndicatorEngine::default().compute(&bars);
        assert_eq!(rows.len(), bars.len());
        assert!(rows[0].rsi.is_none());
        assert!(rows[18].volume_ratio.is_none());
        assert_eq!(rows[19].volume_ratio, Some(1.0));
        assert!(rows[29].ema_slow.is_none());
        assert!(!rows[29].is_complete());
    }

    #[test]
    fn test_zero_volume_average_is_missing() {
        let bars: Vec<Candle> = (0..25)
            .map(|i| Candle::new(i, 1.0, 2.0, 0.5, 1.5, 0.0))
            .collect();
        let rows = IndicatorEngine::default().compute(&bars);
        assert_eq!(rows[24].volume_ma, Some(0.0));
        assert_eq!(rows[24].volume_ratio, None);
    }

    #[test]
    fn test_compute_is_deterministic() {
        let closes: Vec<f64> = (0..80).map(|i| (i as f64 * 0.3).sin() * 5.0 + 50.0).collect();
        let bars = candles_from_closes(&closes);
        let engine = IndicatorEngine::default();
        assert_eq!(engine.compute(&bars), engine.compute(&bars));
    }

    #[test]
    fn test_percentile_rank() {
        let values = vec![None, Some(1.0), Some(3.0), Some(2.0), Some(3.0)];
        assert_eq!(percentile_rank(&values, 0), None);
        assert_eq!(percentile_rank(&values, 1), Some(1.0));
        // among [1, 3, 2]: 2 is rank 2 of 3
        assert!((percentile_rank(&values, 3).unwrap() - 2.0 / 3.0).abs() < 1e-12);
        // among [1, 3, 2, 3]: ties at ranks 3 and 4 -> 3.5 / 4
        assert!((percentile_rank(&values, 4).unwrap() - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_trend_bias() {
        let up = candles_from_closes(&(0..60).map(|i| 100.0 + i as f64).collect::<Vec<_>>());
        assert_eq!(trend_bias(&up), TrendBias::Uptrend);

        let down = candles_from_closes(&(0..60).map(|i| 200.0 - i as f64).collect::<Vec<_>>());
        assert_eq!(trend_bias(&down), TrendBias::Downtrend);

        let short = candles_from_closes(&[1.0, 2.0, 3.0]);
        assert_eq!(trend_bias(&short), TrendBias::Neutral);
    }

    #[test]
    fn test_config_rejects_unordered_emas() {
        let config = IndicatorConfig {
            ema_fast: Period::new_const(60),
            ..Default::default()
        };
        assert!(IndicatorEngine::new(config).is_err());
    }
}
