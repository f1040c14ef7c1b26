//! Quadratic-fit formations: rounded top/bottom and cup-and-handle

use std::collections::HashMap;

use super::helpers::{
    crossed_above, crossed_below, extreme_price, fit_quadratic, scale_strength, Extremum,
    Quadratic,
};
use crate::{
    indicators::IndicatorRow,
    params::{get_period, get_ratio, ParamMeta, ParameterizedDetector},
    Direction, Error, PatternDetector, PatternKind, PatternSignal, Period, Ratio, Result,
    SignalPayload, OHLCV,
};

impl_with_defaults!(RoundedDetector, CupAndHandleDetector);

/// Parabola through the `kind` prices of `bars[start..end]`
fn fit_side<T: OHLCV>(
    bars: &[T],
    start: usize,
    end: usize,
    kind: Extremum,
) -> Option<Quadratic> {
    let ys: Vec<f64> = bars.get(start..end)?.iter().map(|b| kind.price(b)).collect();
    fit_quadratic(&ys)
}

fn fit_strength(r_squared: f64, min: f64) -> f64 {
    let span = (1.0 - min).max(f64::EPSILON);
    scale_strength((r_squared - min) / span, 0.6, 0.9)
}

// ============================================================
// ROUNDED TOP / BOTTOM
// ============================================================

/// Rounded top (highs fit a downward parabola) and rounded bottom (lows fit
/// an upward parabola), each with R² strictly above `min_r_squared`. Fires
/// when the close first leaves the window's range on the reversal side.
#[derive(Debug, Clone)]
pub struct RoundedDetector {
    pub window: Period,
    pub min_r_squared: Ratio,
}

impl Default for RoundedDetector {
    fn default() -> Self {
        Self {
            window: Period::new_const(30),
            min_r_squared: Ratio::new_const(0.7),
        }
    }
}

const ROUNDED_KINDS: &[PatternKind] = &[PatternKind::RoundedTop, PatternKind::RoundedBottom];

impl PatternDetector for RoundedDetector {
    fn kinds(&self) -> &'static [PatternKind] {
        ROUNDED_KINDS
    }

    fn min_bars(&self) -> usize {
        self.window.get() + 1
    }

    fn validate_config(&self) -> Result<()> {
        if self.window.get() < 8 {
            return Err(Error::InvalidConfig(format!(
                "rounded window must be >= 8, got {}",
                self.window.get()
            )));
        }
        Ok(())
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        _rows: &[IndicatorRow],
        index: usize,
    ) -> Option<PatternSignal> {
        let window = self.window.get();
        if index < window || index >= bars.len() {
            return None;
        }
        let start = index - window;
        let min_r2 = self.min_r_squared.get();
        let support = extreme_price(bars, start, index, Extremum::Low)?;
        let resistance = extreme_price(bars, start, index, Extremum::High)?;
        let prev_close = bars[index - 1].close();
        let close = bars[index].close();

        let (kind, direction, fit) = if crossed_below(prev_close, close, support, support) {
            let q = fit_side(bars, start, index, Extremum::High)?;
            if q.a >= 0.0 {
                return None;
            }
            (PatternKind::RoundedTop, Direction::Bearish, q)
        } else if crossed_above(prev_close, close, resistance, resistance) {
            let q = fit_side(bars, start, index, Extremum::Low)?;
            if q.a <= 0.0 {
                return None;
            }
            (PatternKind::RoundedBottom, Direction::Bullish, q)
        } else {
            return None;
        };

        if fit.r_squared <= min_r2 {
            return None;
        }

        Some(PatternSignal {
            index,
            kind,
            direction,
            strength: fit_strength(fit.r_squared, min_r2),
            payload: SignalPayload::Curve {
                r_squared: fit.r_squared,
                support,
                resistance,
            },
        })
    }
}

// ============================================================
// CUP AND HANDLE
// ============================================================

/// A rounded cup of `cup_len` candles followed by a handle of `handle_len`
/// candles whose range stays under `max_handle_ratio` of the cup depth.
/// Fires on the first close above the handle high; the target adds the cup
/// depth to that close.
#[derive(Debug, Clone)]
pub struct CupAndHandleDetector {
    pub cup_len: Period,
    pub handle_len: Period,
    pub min_r_squared: Ratio,
    /// Handle range must stay strictly below this fraction of cup depth
    pub max_handle_ratio: Ratio,
}

impl Default for CupAndHandleDetector {
    fn default() -> Self {
        Self {
            cup_len: Period::new_const(30),
            handle_len: Period::new_const(8),
            min_r_squared: Ratio::new_const(0.6),
            max_handle_ratio: Ratio::new_const(0.5),
        }
    }
}

const CUP_KINDS: &[PatternKind] = &[PatternKind::CupAndHandle];

impl PatternDetector for CupAndHandleDetector {
    fn kinds(&self) -> &'static [PatternKind] {
        CUP_KINDS
    }

    fn min_bars(&self) -> usize {
        self.cup_len.get() + self.handle_len.get() + 1
    }

    fn validate_config(&self) -> Result<()> {
        if self.cup_len.get() < 8 || self.handle_len.get() < 2 {
            return Err(Error::InvalidConfig(
                "cup_len must be >= 8 and handle_len >= 2".to_string(),
            ));
        }
        if self.handle_len.get() >= self.cup_len.get() {
            return Err(Error::InvalidConfig(
                "handle must be shorter than the cup".to_string(),
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
        let (cup_len, handle_len) = (self.cup_len.get(), self.handle_len.get());
        if index < cup_len + handle_len || index >= bars.len() {
            return None;
        }
        let handle_start = index - handle_len;
        let cup_start = handle_start - cup_len;

        let handle_high = extreme_price(bars, handle_start, index, Extremum::High)?;
        let prev_close = bars[index - 1].close();
        let close = bars[index].close();
        if !crossed_above(prev_close, close, handle_high, handle_high) {
            return None;
        }

        let fit = fit_side(bars, cup_start, handle_start, Extremum::Low)?;
        let min_r2 = self.min_r_squared.get();
        if fit.a <= 0.0 || fit.r_squared <= min_r2 {
            return None;
        }

        let cup_high = extreme_price(bars, cup_start, handle_start, Extremum::High)?;
        let cup_low = extreme_price(bars, cup_start, handle_start, Extremum::Low)?;
        let cup_depth = cup_high - cup_low;
        let handle_low = extreme_price(bars, handle_start, index, Extremum::Low)?;
        let handle_range = handle_high - handle_low;
        if cup_depth <= f64::EPSILON || handle_range >= cup_depth * self.max_handle_ratio.get() {
            return None;
        }

        Some(PatternSignal {
            index,
            kind: PatternKind::CupAndHandle,
            direction: Direction::Bullish,
            strength: fit_strength(fit.r_squared, min_r2),
            payload: SignalPayload::CupAndHandle {
                r_squared: fit.r_squared,
                cup_depth,
                handle_high,
                target: close + cup_depth,
            },
        })
    }
}

// ============================================================
// PARAMETERS
// ============================================================

static ROUNDED_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("window", 30.0, (20.0, 60.0, 10.0), "Fit window length"),
    ParamMeta::ratio("min_r_squared", 0.7, (0.5, 0.9, 0.1), "Minimum parabola fit quality"),
];

static CUP_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("cup_len", 30.0, (20.0, 60.0, 10.0), "Cup length in candles"),
    ParamMeta::period("handle_len", 8.0, (4.0, 12.0, 2.0), "Handle length in candles"),
    ParamMeta::ratio("min_r_squared", 0.6, (0.5, 0.9, 0.1), "Minimum cup fit quality"),
    ParamMeta::ratio(
        "max_handle_ratio",
        0.5,
        (0.2, 0.5, 0.1),
        "Max handle range relative to cup depth",
    ),
];

impl ParameterizedDetector for RoundedDetector {
    fn param_meta() -> &'static [ParamMeta] {
        ROUNDED_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            window: get_period(params, "window", 30)?,
            min_r_squared: get_ratio(params, "min_r_squared", 0.7)?,
        };
        detector.validate_config()?;
        Ok(detector)
    }
}

impl ParameterizedDetector for CupAndHandleDetector {
    fn param_meta() -> &'static [ParamMeta] {
        CUP_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            cup_len: get_period(params, "cup_len", 30)?,
            handle_len: get_period(params, "handle_len", 8)?,
            min_r_squared: get_ratio(params, "min_r_squared", 0.6)?,
            max_handle_ratio: get_ratio(params, "max_handle_ratio", 0.5)?,
        };
        detector.validate_config()?;
        Ok(detector)
    }
}
