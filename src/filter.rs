//! Signal confirmation
//!
//! Two tiers over [`PatternSignal`] + its [`IndicatorRow`]:
//!
//! 1. [`QualityConfig`]: indicator presence, oscillator context, and a
//!    confirmation score (volume, momentum room, geometric strength).
//! 2. [`DirectionalFilters`]: independently toggleable conjunctive rules
//!    (trend alignment, RSI ceiling/floor, volatility percentile ceiling,
//!    support/resistance confluence, higher-timeframe bias).
//!
//! Every rule is a pure predicate; evaluation stops at the first failure.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    indicators::{percentile_rank, IndicatorRow, TrendBias},
    levels::{Level, LevelClusterer, LevelConfig},
    Direction, Error, PatternSignal, Ratio, Result, OHLCV,
};

/// Highest score [`SignalQualityFilter`] can award
pub const MAX_SCORE: u8 = 3;

// ============================================================
// CONFIGURATION
// ============================================================

/// First-tier quality rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Volume / volume MA at or above this confirms the signal
    pub volume_ratio_min: f64,
    /// Bullish signals with RSI above this are rejected
    pub overbought: f64,
    /// Bearish signals with RSI below this are rejected
    pub oversold: f64,
    /// Strength at or above this earns a point
    pub strong_pattern: Ratio,
    pub min_score: u8,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            volume_ratio_min: 1.0,
            overbought: 70.0,
            oversold: 30.0,
            strong_pattern: Ratio::new_const(0.7),
            min_score: 1,
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.volume_ratio_min.is_finite() || self.volume_ratio_min < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "volume_ratio_min must be finite and >= 0, got {}",
                self.volume_ratio_min
            )));
        }
        if !(0.0..=100.0).contains(&self.oversold)
            || !(0.0..=100.0).contains(&self.overbought)
            || self.oversold >= self.overbought
        {
            return Err(Error::InvalidConfig(format!(
                "need 0 <= oversold ({}) < overbought ({}) <= 100",
                self.oversold, self.overbought
            )));
        }
        if self.min_score > MAX_SCORE {
            return Err(Error::OutOfRange {
                field: "min_score",
                value: self.min_score as f64,
                min: 0.0,
                max: MAX_SCORE as f64,
            });
        }
        Ok(())
    }
}

/// Second-tier rules. `None` / `false` disables a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionalFilters {
    /// Bullish needs fast EMA > medium EMA, bearish the reverse
    pub trend_alignment: bool,
    pub rsi_long_max: Option<f64>,
    pub rsi_short_min: Option<f64>,
    /// Trailing ATR percentile ceiling
    pub atr_percentile_max: Option<Ratio>,
    /// Bullish needs a support zone at the close, bearish a resistance zone
    pub level_confluence: Option<LevelConfig>,
    /// Bias of a higher-timeframe sequence; signals against it are rejected
    pub higher_timeframe: Option<TrendBias>,
}

impl Default for DirectionalFilters {
    fn default() -> Self {
        Self {
            trend_alignment: true,
            rsi_long_max: Some(65.0),
            rsi_short_min: Some(35.0),
            atr_percentile_max: Some(Ratio::new_const(0.8)),
            level_confluence: None,
            higher_timeframe: None,
        }
    }
}

impl DirectionalFilters {
    /// Every rule switched off
    pub fn none() -> Self {
        Self {
            trend_alignment: false,
            rsi_long_max: None,
            rsi_short_min: None,
            atr_percentile_max: None,
            level_confluence: None,
            higher_timeframe: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, cap) in [
            ("rsi_long_max", self.rsi_long_max),
            ("rsi_short_min", self.rsi_short_min),
        ] {
            if let Some(v) = cap {
                if !(0.0..=100.0).contains(&v) {
                    return Err(Error::OutOfRange {
                        field: name,
                        value: v,
                        min: 0.0,
                        max: 100.0,
                    });
                }
            }
        }
        if let Some(levels) = &self.level_confluence {
            levels.validate()?;
        }
        Ok(())
    }
}

// ============================================================
// OUTPUT
// ============================================================

/// A signal that passed the filter, with its score and confluent zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualifiedSignal {
    pub signal: PatternSignal,
    pub score: u8,
    /// Support (bullish) / resistance (bearish) zone when confluence ran
    pub level: Option<Level>,
}

impl QualifiedSignal {
    /// Wrap a raw signal without running any rule
    pub fn unfiltered(signal: PatternSignal) -> Self {
        Self {
            signal,
            score: 0,
            level: None,
        }
    }

    /// Blend of geometric strength and confirmation score, 0.0..=1.0
    pub fn confidence(&self) -> f64 {
        let score = f64::from(self.score.min(MAX_SCORE)) / f64::from(MAX_SCORE);
        (0.5 * self.signal.strength + 0.5 * score).clamp(0.0, 1.0)
    }
}

/// Why a signal was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    OutOfRange,
    MissingData,
    Overbought,
    Oversold,
    LowScore,
    AgainstTrend,
    RsiCap,
    Volatility,
    NoConfluence,
    AgainstHigherTimeframe,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rejection::OutOfRange => "index out of range",
            Rejection::MissingData => "missing indicator data",
            Rejection::Overbought => "overbought",
            Rejection::Oversold => "oversold",
            Rejection::LowScore => "score below minimum",
            Rejection::AgainstTrend => "against EMA trend",
            Rejection::RsiCap => "RSI cap",
            Rejection::Volatility => "ATR percentile too high",
            Rejection::NoConfluence => "no support/resistance confluence",
            Rejection::AgainstHigherTimeframe => "against higher timeframe",
        };
        f.write_str(s)
    }
}

// ============================================================
// FILTER
// ============================================================

/// Applies [`QualityConfig`] and, optionally, [`DirectionalFilters`]
#[derive(Debug, Clone, Default)]
pub struct SignalQualityFilter {
    quality: QualityConfig,
    directional: Option<DirectionalFilters>,
    clusterer: Option<LevelClusterer>,
}

impl SignalQualityFilter {
    pub fn new(quality: QualityConfig) -> Result<Self> {
        quality.validate()?;
        Ok(Self {
            quality,
            directional: None,
            clusterer: None,
        })
    }

    /// Compose the second tier on top
    pub fn with_directional(mut self, directional: DirectionalFilters) -> Result<Self> {
        directional.validate()?;
        self.clusterer = directional
            .level_confluence
            .clone()
            .map(LevelClusterer::new)
            .transpose()?;
        self.directional = Some(directional);
        Ok(self)
    }

    pub fn quality(&self) -> &QualityConfig {
        &self.quality
    }

    pub fn directional(&self) -> Option<&DirectionalFilters> {
        self.directional.as_ref()
    }

    /// Update the higher-timeframe bias (no-op without directional filters)
    pub fn set_higher_timeframe(&mut self, bias: Option<TrendBias>) {
        if let Some(d) = self.directional.as_mut() {
            d.higher_timeframe = bias;
        }
    }

    /// Keep the signals passing every enabled rule, preserving order
    pub fn apply<T: OHLCV>(
        &self,
        bars: &[T],
        rows: &[IndicatorRow],
        signals: &[PatternSignal],
    ) -> Vec<QualifiedSignal> {
        let atrs: Vec<Option<f64>> = if self.needs_atr_series() {
            rows.iter().map(|r| r.atr).collect()
        } else {
            Vec::new()
        };

        let kept: Vec<QualifiedSignal> = signals
            .iter()
            .filter_map(|s| match self.check(bars, rows, &atrs, s) {
                Ok(q) => Some(q),
                Err(reason) => {
                    debug!(index = s.index, kind = %s.kind, %reason, "signal rejected");
                    None
                },
            })
            .collect();
        debug!(
            candidates = signals.len(),
            kept = kept.len(),
            "quality filter applied"
        );
        kept
    }

    /// Evaluate a single signal
    pub fn evaluate<T: OHLCV>(
        &self,
        bars: &[T],
        rows: &[IndicatorRow],
        signal: &PatternSignal,
    ) -> std::result::Result<QualifiedSignal, Rejection> {
        let atrs: Vec<Option<f64>> = if self.needs_atr_series() {
            rows.iter().map(|r| r.atr).collect()
        } else {
            Vec::new()
        };
        self.check(bars, rows, &atrs, signal)
    }

    fn needs_atr_series(&self) -> bool {
        self.directional
            .as_ref()
            .is_some_and(|d| d.atr_percentile_max.is_some())
    }

    fn check<T: OHLCV>(
        &self,
        bars: &[T],
        rows: &[IndicatorRow],
        atrs: &[Option<f64>],
        signal: &PatternSignal,
    ) -> std::result::Result<QualifiedSignal, Rejection> {
        let index = signal.index;
        if index >= bars.len() || index >= rows.len() {
            return Err(Rejection::OutOfRange);
        }
        let row = &rows[index];
        let score = self.score(row, signal)?;

        let level = match &self.directional {
            Some(d) => self.directional_check(d, bars, row, atrs, signal)?,
            None => None,
        };

        Ok(QualifiedSignal {
            signal: *signal,
            score,
            level,
        })
    }

    fn score(
        &self,
        row: &IndicatorRow,
        signal: &PatternSignal,
    ) -> std::result::Result<u8, Rejection> {
        let q = &self.quality;
        let (Some(rsi), Some(volume_ratio)) = (row.rsi, row.volume_ratio) else {
            return Err(Rejection::MissingData);
        };

        let momentum_room = match signal.direction {
            Direction::Bullish if rsi > q.overbought => return Err(Rejection::Overbought),
            Direction::Bearish if rsi < q.oversold => return Err(Rejection::Oversold),
            Direction::Bullish => rsi <= 50.0,
            Direction::Bearish => rsi >= 50.0,
        };

        let score = u8::from(volume_ratio >= q.volume_ratio_min)
            + u8::from(momentum_room)
            + u8::from(signal.strength >= q.strong_pattern.get());
        if score < q.min_score {
            return Err(Rejection::LowScore);
        }
        Ok(score)
    }

    fn directional_check<T: OHLCV>(
        &self,
        d: &DirectionalFilters,
        bars: &[T],
        row: &IndicatorRow,
        atrs: &[Option<f64>],
        signal: &PatternSignal,
    ) -> std::result::Result<Option<Level>, Rejection> {
        let bullish = signal.direction.is_bullish();

        if d.trend_alignment {
            let (Some(fast), Some(medium)) = (row.ema_fast, row.ema_medium) else {
                return Err(Rejection::MissingData);
            };
            let aligned = if bullish { fast > medium } else { fast < medium };
            if !aligned {
                return Err(Rejection::AgainstTrend);
            }
        }

        let cap = if bullish { d.rsi_long_max } else { d.rsi_short_min };
        if let Some(cap) = cap {
            let rsi = row.rsi.ok_or(Rejection::MissingData)?;
            let breached = if bullish { rsi > cap } else { rsi < cap };
            if breached {
                return Err(Rejection::RsiCap);
            }
        }

        if let Some(max) = d.atr_percentile_max {
            let pct = percentile_rank(atrs, signal.index).ok_or(Rejection::MissingData)?;
            if pct > max.get() {
                return Err(Rejection::Volatility);
            }
        }

        match d.higher_timeframe {
            Some(TrendBias::Downtrend) if bullish => return Err(Rejection::AgainstHigherTimeframe),
            Some(TrendBias::Uptrend) if !bullish => return Err(Rejection::AgainstHigherTimeframe),
            _ => {},
        }

        match &self.clusterer {
            Some(clusterer) => {
                let price = bars[signal.index].close();
                let zone = if bullish {
                    clusterer.is_at_support(bars, signal.index, price)
                } else {
                    clusterer.is_at_resistance(bars, signal.index, price)
                };
                zone.map(Some).ok_or(Rejection::NoConfluence)
            },
            None => Ok(None),
        }
    }
}
