//! Trendline formations: triangles, wedges, and flags
//!
//! Triangles and wedges fit one line through the swing highs and one through
//! the swing lows of a trailing window, then fire on the candle whose close
//! first crosses a boundary. Flags measure a pole and fit the consolidation
//! candle-by-candle.

use std::collections::HashMap;

use super::helpers::{
    all_near_mean, crossed_above, crossed_below, extreme_price, fit_line, fit_window_line,
    scale_strength, swings_in, Extremum, Line, SwingPoint,
};
use crate::{
    indicators::IndicatorRow,
    params::{get_factor, get_period, get_ratio, ParamMeta, ParameterizedDetector},
    Direction, Error, Factor, PatternDetector, PatternKind, PatternSignal, Period, Ratio, Result,
    SignalPayload, OHLCV,
};

impl_with_defaults!(TriangleDetector, WedgeDetector, FlagDetector);

// ============================================================
// SHARED BOUNDARIES
// ============================================================

/// Upper and lower boundary lines of `bars[start..end]`
struct Boundaries {
    highs: Vec<SwingPoint>,
    lows: Vec<SwingPoint>,
    upper: Line,
    lower: Line,
    /// Widest high-low range of the window
    height: f64,
}

impl Boundaries {
    fn fit<T: OHLCV>(
        bars: &[T],
        start: usize,
        end: usize,
        swing_window: usize,
        min_touches: usize,
    ) -> Option<Self> {
        let highs = swings_in(bars, start, end, Extremum::High, swing_window);
        let lows = swings_in(bars, start, end, Extremum::Low, swing_window);
        if highs.len() < min_touches || lows.len() < min_touches {
            return None;
        }
        let upper = fit_line(&highs)?;
        let lower = fit_line(&lows)?;
        let height = extreme_price(bars, start, end, Extremum::High)?
            - extreme_price(bars, start, end, Extremum::Low)?;
        Some(Self {
            highs,
            lows,
            upper,
            lower,
            height,
        })
    }

    fn touches(&self) -> usize {
        self.highs.len() + self.lows.len()
    }

    fn width_at(&self, x: usize) -> f64 {
        self.upper.at(x as f64) - self.lower.at(x as f64)
    }
}

fn prices(points: &[SwingPoint]) -> Vec<f64> {
    points.iter().map(|p| p.price).collect()
}

fn check_window(lookback: Period, swing_window: Period, min_touches: usize) -> Result<()> {
    if lookback.get() < 4 * swing_window.get() + 2 {
        return Err(Error::InvalidConfig(format!(
            "lookback {} too short for swing_window {}",
            lookback.get(),
            swing_window.get()
        )));
    }
    if min_touches < 2 {
        return Err(Error::InvalidConfig("min_touches must be >= 2".to_string()));
    }
    Ok(())
}

// ============================================================
// TRIANGLES
// ============================================================

/// Ascending, descending, and symmetrical triangles.
///
/// A boundary is flat when all of its swing prices lie within
/// `flat_tolerance` of their mean.
#[derive(Debug, Clone)]
pub struct TriangleDetector {
    pub lookback: Period,
    pub swing_window: Period,
    pub flat_tolerance: Ratio,
    pub min_touches: usize,
}

impl Default for TriangleDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(30),
            swing_window: Period::new_const(1),
            flat_tolerance: Ratio::new_const(0.003),
            min_touches: 2,
        }
    }
}

const TRIANGLE_KINDS: &[PatternKind] = &[
    PatternKind::AscendingTriangle,
    PatternKind::DescendingTriangle,
    PatternKind::SymmetricalTriangle,
];

impl PatternDetector for TriangleDetector {
    fn kinds(&self) -> &'static [PatternKind] {
        TRIANGLE_KINDS
    }

    fn min_bars(&self) -> usize {
        self.lookback.get() + 1
    }

    fn validate_config(&self) -> Result<()> {
        check_window(self.lookback, self.swing_window, self.min_touches)
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        _rows: &[IndicatorRow],
        index: usize,
    ) -> Option<PatternSignal> {
        let lookback = self.lookback.get();
        if index < lookback || index >= bars.len() {
            return None;
        }
        let start = index - lookback;
        let b = Boundaries::fit(bars, start, index, self.swing_window.get(), self.min_touches)?;
        if b.width_at(index) <= 0.0 {
            return None;
        }

        let prev_close = bars[index - 1].close();
        let close = bars[index].close();
        let tolerance = self.flat_tolerance.get();
        let flat_top = all_near_mean(&prices(&b.highs), tolerance);
        let flat_bottom = all_near_mean(&prices(&b.lows), tolerance);
        let upper = b.upper.at(index as f64);
        let lower = b.lower.at(index as f64);

        let (kind, direction, support, resistance, target) = match (flat_top, flat_bottom) {
            (Some(r), None) => {
                if b.lower.slope <= 0.0 || !crossed_above(prev_close, close, r, r) {
                    return None;
                }
                (
                    PatternKind::AscendingTriangle,
                    Direction::Bullish,
                    lower,
                    r,
                    r + b.height,
                )
            },
            (None, Some(s)) => {
                if b.upper.slope >= 0.0 || !crossed_below(prev_close, close, s, s) {
                    return None;
                }
                (
                    PatternKind::DescendingTriangle,
                    Direction::Bearish,
                    s,
                    upper,
                    s - b.height,
                )
            },
            (None, None) => {
                if b.upper.slope >= 0.0 || b.lower.slope <= 0.0 {
                    return None;
                }
                let x_prev = (index - 1) as f64;
                if crossed_above(prev_close, close, b.upper.at(x_prev), upper) {
                    (
                        PatternKind::SymmetricalTriangle,
                        Direction::Bullish,
                        lower,
                        upper,
                        upper + b.height,
                    )
                } else if crossed_below(prev_close, close, b.lower.at(x_prev), lower) {
                    (
                        PatternKind::SymmetricalTriangle,
                        Direction::Bearish,
                        lower,
                        upper,
                        lower - b.height,
                    )
                } else {
                    return None;
                }
            },
            // Both boundaries flat is a rectangle
            (Some(_), Some(_)) => return None,
        };

        let extra = b.touches().saturating_sub(2 * self.min_touches) as f64;
        Some(PatternSignal {
            index,
            kind,
            direction,
            strength: scale_strength(extra / 4.0, 0.55, 0.85),
            payload: SignalPayload::Trendlines {
                support,
                resistance,
                upper_slope: b.upper.slope,
                lower_slope: b.lower.slope,
                target: Some(target),
            },
        })
    }
}

// ============================================================
// WEDGES
// ============================================================

/// Rising (bearish) and falling (bullish) wedges: both boundaries slope the
/// same way and converge.
#[derive(Debug, Clone)]
pub struct WedgeDetector {
    pub lookback: Period,
    pub swing_window: Period,
    pub min_touches: usize,
}

impl Default for WedgeDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(30),
            swing_window: Period::new_const(1),
            min_touches: 2,
        }
    }
}

const WEDGE_KINDS: &[PatternKind] = &[PatternKind::RisingWedge, PatternKind::FallingWedge];

impl PatternDetector for WedgeDetector {
    fn kinds(&self) -> &'static [PatternKind] {
        WEDGE_KINDS
    }

    fn min_bars(&self) -> usize {
        self.lookback.get() + 1
    }

    fn validate_config(&self) -> Result<()> {
        check_window(self.lookback, self.swing_window, self.min_touches)
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        _rows: &[IndicatorRow],
        index: usize,
    ) -> Option<PatternSignal> {
        let lookback = self.lookback.get();
        if index < lookback || index >= bars.len() {
            return None;
        }
        let start = index - lookback;
        let b = Boundaries::fit(bars, start, index, self.swing_window.get(), self.min_touches)?;

        let (w0, w1) = (b.width_at(start), b.width_at(index));
        if w1 <= 0.0 || w0 <= w1 {
            return None;
        }

        let prev_close = bars[index - 1].close();
        let close = bars[index].close();
        let x_prev = (index - 1) as f64;
        let upper = b.upper.at(index as f64);
        let lower = b.lower.at(index as f64);
        let (up, lo) = (b.upper.slope, b.lower.slope);

        let (kind, direction) = if up > 0.0 && lo > up {
            if !crossed_below(prev_close, close, b.lower.at(x_prev), lower) {
                return None;
            }
            (PatternKind::RisingWedge, Direction::Bearish)
        } else if lo < 0.0 && up < lo {
            if !crossed_above(prev_close, close, b.upper.at(x_prev), upper) {
                return None;
            }
            (PatternKind::FallingWedge, Direction::Bullish)
        } else {
            return None;
        };

        let convergence = 1.0 - w1 / w0;
        Some(PatternSignal {
            index,
            kind,
            direction,
            strength: scale_strength(convergence, 0.5, 0.8),
            payload: SignalPayload::Trendlines {
                support: lower,
                resistance: upper,
                upper_slope: up,
                lower_slope: lo,
                target: None,
            },
        })
    }
}

// ============================================================
// FLAGS
// ============================================================

/// Bull and bear flags: a strong pole followed by a counter-sloped or
/// sideways channel, confirmed by a close through the channel extreme.
#[derive(Debug, Clone)]
pub struct FlagDetector {
    pub pole_len: Period,
    pub flag_len: Period,
    /// Minimum pole move in percent
    pub min_pole_pct: Factor,
}

impl Default for FlagDetector {
    fn default() -> Self {
        Self {
            pole_len: Period::new_const(10),
            flag_len: Period::new_const(10),
            min_pole_pct: Factor::new_const(2.0),
        }
    }
}

const FLAG_KINDS: &[PatternKind] = &[PatternKind::BullFlag, PatternKind::BearFlag];

impl PatternDetector for FlagDetector {
    fn kinds(&self) -> &'static [PatternKind] {
        FLAG_KINDS
    }

    fn min_bars(&self) -> usize {
        self.pole_len.get() + self.flag_len.get() + 1
    }

    fn validate_config(&self) -> Result<()> {
        if self.pole_len.get() < 2 || self.flag_len.get() < 3 {
            return Err(Error::InvalidConfig(
                "flag needs pole_len >= 2 and flag_len >= 3".to_string(),
            ));
        }
        Ok(())
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        _rows: &[IndicatorRow],
        index: usize,
    ) -> Option<PatternSignal> {
        let (pole_len, flag_len) = (self.pole_len.get(), self.flag_len.get());
        if index < pole_len + flag_len || index >= bars.len() {
            return None;
        }
        let flag_start = index - flag_len;
        let pole_start = flag_start - pole_len;

        let base = bars[pole_start].close();
        let peak = bars[flag_start - 1].close();
        if base.abs() <= f64::EPSILON {
            return None;
        }
        let pole = peak - base;
        let pole_pct = pole / base * 100.0;
        if pole_pct.abs() < self.min_pole_pct.get() {
            return None;
        }

        let resistance = extreme_price(bars, flag_start, index, Extremum::High)?;
        let support = extreme_price(bars, flag_start, index, Extremum::Low)?;
        let upper = fit_window_line(bars, flag_start, index, Extremum::High)?;
        let lower = fit_window_line(bars, flag_start, index, Extremum::Low)?;
        let prev_close = bars[index - 1].close();
        let close = bars[index].close();

        let (kind, direction) = if pole > 0.0 {
            let channel_ok = upper.slope <= 0.0 && lower.slope <= 0.0;
            if !channel_ok || !crossed_above(prev_close, close, resistance, resistance) {
                return None;
            }
            (PatternKind::BullFlag, Direction::Bullish)
        } else {
            let channel_ok = upper.slope >= 0.0 && lower.slope >= 0.0;
            if !channel_ok || !crossed_below(prev_close, close, support, support) {
                return None;
            }
            (PatternKind::BearFlag, Direction::Bearish)
        };

        let excess = pole_pct.abs() / self.min_pole_pct.get() - 1.0;
        Some(PatternSignal {
            index,
            kind,
            direction,
            strength: scale_strength(excess / 2.0, 0.55, 0.85),
            payload: SignalPayload::Flag {
                pole_change_pct: pole_pct,
                support,
                resistance,
                target: close + pole,
            },
        })
    }
}

// ============================================================
// PARAMETERS
// ============================================================

static TRIANGLE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("lookback", 30.0, (20.0, 60.0, 10.0), "Trailing window length"),
    ParamMeta::period("swing_window", 1.0, (1.0, 4.0, 1.0), "Swing neighbourhood per side"),
    ParamMeta::ratio(
        "flat_tolerance",
        0.003,
        (0.001, 0.01, 0.001),
        "Max deviation of a flat boundary from its mean",
    ),
];

static WEDGE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("lookback", 30.0, (20.0, 60.0, 10.0), "Trailing window length"),
    ParamMeta::period("swing_window", 1.0, (1.0, 4.0, 1.0), "Swing neighbourhood per side"),
];

static FLAG_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("pole_len", 10.0, (5.0, 20.0, 5.0), "Pole length in candles"),
    ParamMeta::period("flag_len", 10.0, (5.0, 20.0, 5.0), "Consolidation length in candles"),
    ParamMeta::factor("min_pole_pct", 2.0, (1.0, 5.0, 0.5), "Minimum pole move in percent"),
];

impl ParameterizedDetector for TriangleDetector {
    fn param_meta() -> &'static [ParamMeta] {
        TRIANGLE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            lookback: get_period(params, "lookback", 30)?,
            swing_window: get_period(params, "swing_window", 1)?,
            flat_tolerance: get_ratio(params, "flat_tolerance", 0.003)?,
            min_touches: 2,
        };
        detector.validate_config()?;
        Ok(detector)
    }
}

impl ParameterizedDetector for WedgeDetector {
    fn param_meta() -> &'static [ParamMeta] {
        WEDGE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            lookback: get_period(params, "lookback", 30)?,
            swing_window: get_period(params, "swing_window", 1)?,
            min_touches: 2,
        };
        detector.validate_config()?;
        Ok(detector)
    }
}

impl ParameterizedDetector for FlagDetector {
    fn param_meta() -> &'static [ParamMeta] {
        FLAG_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            pole_len: get_period(params, "pole_len", 10)?,
            flag_len: get_period(params, "flag_len", 10)?,
            min_pole_pct: get_factor(params, "min_pole_pct", 2.0)?,
        };
        detector.validate_config()?;
        Ok(detector)
    }
}
