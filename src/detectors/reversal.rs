//! Swing-structure reversals: double top/bottom and head-and-shoulders
//!
//! Both detectors are written once over [`Extremum`] and mirrored: a top is
//! built from swing highs with a neckline under it, a bottom from swing lows
//! with a neckline above it.

use std::collections::HashMap;

use super::helpers::{
    crossed_above, crossed_below, extreme_price, scale_strength, swings_in, within_tolerance,
    Extremum, SwingPoint,
};
use crate::{
    indicators::IndicatorRow,
    params::{get_period, get_ratio, ParamMeta, ParameterizedDetector},
    Direction, Error, PatternDetector, PatternKind, PatternSignal, Period, Ratio, Result,
    SignalPayload, OHLCV,
};

impl_with_defaults!(DoubleExtremeDetector, HeadAndShouldersDetector);

/// Close of `index` breaks `neckline` away from the formation, and no close
/// between `from` and `index` broke it earlier.
fn breaks_neckline<T: OHLCV>(
    bars: &[T],
    from: usize,
    index: usize,
    neckline: f64,
    side: Extremum,
) -> bool {
    let (prev_close, close) = (bars[index - 1].close(), bars[index].close());
    let crossed = match side {
        Extremum::High => crossed_below(prev_close, close, neckline, neckline),
        Extremum::Low => crossed_above(prev_close, close, neckline, neckline),
    };
    // A close through the neckline before `index` means the break already happened
    crossed
        && bars[from..index - 1].iter().all(|b| match side {
            Extremum::High => b.close() >= neckline,
            Extremum::Low => b.close() <= neckline,
        })
}

/// No candle after the last swing (up to and including `index`) exceeds `limit`
fn not_exceeded<T: OHLCV>(
    bars: &[T],
    from: usize,
    index: usize,
    limit: f64,
    side: Extremum,
) -> bool {
    bars[from..=index]
        .iter()
        .all(|b| !side.beats(side.price(b), limit))
}

fn reversal_direction(side: Extremum) -> Direction {
    match side {
        Extremum::High => Direction::Bearish,
        Extremum::Low => Direction::Bullish,
    }
}

fn check_swing_window(lookback: Period, swing_window: Period) -> Result<()> {
    if lookback.get() < 6 * swing_window.get() + 3 {
        return Err(Error::InvalidConfig(format!(
            "lookback {} too short for swing_window {}",
            lookback.get(),
            swing_window.get()
        )));
    }
    Ok(())
}

// ============================================================
// DOUBLE TOP / BOTTOM
// ============================================================

/// Two swing extremes at matching prices separated by a neckline; fires when
/// the close first breaks the neckline after the second extreme.
#[derive(Debug, Clone)]
pub struct DoubleExtremeDetector {
    pub lookback: Period,
    pub swing_window: Period,
    /// Max relative price difference of the two extremes
    pub tolerance: Ratio,
}

impl Default for DoubleExtremeDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(40),
            swing_window: Period::new_const(3),
            tolerance: Ratio::new_const(0.01),
        }
    }
}

const DOUBLE_KINDS: &[PatternKind] = &[PatternKind::DoubleTop, PatternKind::DoubleBottom];

impl DoubleExtremeDetector {
    fn detect_side<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        side: Extremum,
    ) -> Option<PatternSignal> {
        let start = index.saturating_sub(self.lookback.get());
        let swings = swings_in(bars, start, index, side, self.swing_window.get());
        let (second, earlier) = swings.split_last()?;

        let tolerance = self.tolerance.get();
        let first = earlier.iter().rev().find(|p| {
            within_tolerance(p.price, second.price, tolerance)
                && !intervening_beats(bars, p, second, side)
        })?;

        let neckline = extreme_price(bars, first.index + 1, second.index, side.opposite())?;
        let peak = if side.beats(first.price, second.price) {
            first.price
        } else {
            second.price
        };
        let height = (peak - neckline).abs();
        if height <= f64::EPSILON
            || !not_exceeded(bars, second.index + 1, index, peak, side)
            || !breaks_neckline(bars, second.index + 1, index, neckline, side)
        {
            return None;
        }

        let direction = reversal_direction(side);
        let kind = match side {
            Extremum::High => PatternKind::DoubleTop,
            Extremum::Low => PatternKind::DoubleBottom,
        };
        let similarity = 1.0 - (first.price - second.price).abs() / (peak.abs() * tolerance);
        Some(PatternSignal {
            index,
            kind,
            direction,
            strength: scale_strength(similarity, 0.6, 0.9),
            payload: SignalPayload::Reversal {
                neckline,
                target: neckline + direction.sign() * height,
            },
        })
    }
}

/// Some candle strictly between the two swings is more extreme than the
/// milder of the pair.
fn intervening_beats<T: OHLCV>(
    bars: &[T],
    a: &SwingPoint,
    b: &SwingPoint,
    side: Extremum,
) -> bool {
    let milder = if side.beats(a.price, b.price) {
        b.price
    } else {
        a.price
    };
    bars[a.index + 1..b.index]
        .iter()
        .any(|bar| side.beats(side.price(bar), milder))
}

impl PatternDetector for DoubleExtremeDetector {
    fn kinds(&self) -> &'static [PatternKind] {
        DOUBLE_KINDS
    }

    fn min_bars(&self) -> usize {
        4 * self.swing_window.get() + 4
    }

    fn validate_config(&self) -> Result<()> {
        if self.tolerance.get() <= 0.0 {
            return Err(Error::InvalidConfig(
                "double top/bottom tolerance must be > 0".to_string(),
            ));
        }
        check_swing_window(self.lookback, self.swing_window)
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        _rows: &[IndicatorRow],
        index: usize,
    ) -> Option<PatternSignal> {
        if index < 1 || index >= bars.len() {
            return None;
        }
        self.detect_side(bars, index, Extremum::High)
            .or_else(|| self.detect_side(bars, index, Extremum::Low))
    }
}

// ============================================================
// HEAD AND SHOULDERS
// ============================================================

/// Three consecutive swing extremes with the middle one (head) beyond both
/// matching shoulders. The neckline is the mean of the two opposite extremes
/// between them.
#[derive(Debug, Clone)]
pub struct HeadAndShouldersDetector {
    pub lookback: Period,
    pub swing_window: Period,
    pub shoulder_tolerance: Ratio,
}

impl Default for HeadAndShouldersDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(60),
            swing_window: Period::new_const(3),
            shoulder_tolerance: Ratio::new_const(0.015),
        }
    }
}

const HS_KINDS: &[PatternKind] = &[
    PatternKind::HeadAndShoulders,
    PatternKind::InverseHeadAndShoulders,
];

impl HeadAndShouldersDetector {
    fn detect_side<T: OHLCV>(
        &self,
        bars: &[T],
        index: usize,
        side: Extremum,
    ) -> Option<PatternSignal> {
        let start = index.saturating_sub(self.lookback.get());
        let swings = swings_in(bars, start, index, side, self.swing_window.get());
        let [left, head, right] = swings.get(swings.len().checked_sub(3)?..)? else {
            return None;
        };

        let tolerance = self.shoulder_tolerance.get();
        if !side.beats(head.price, left.price)
            || !side.beats(head.price, right.price)
            || !within_tolerance(left.price, right.price, tolerance)
        {
            return None;
        }

        let trough_a = extreme_price(bars, left.index + 1, head.index, side.opposite())?;
        let trough_b = extreme_price(bars, head.index + 1, right.index, side.opposite())?;
        let neckline = (trough_a + trough_b) / 2.0;
        // Shoulders must sit on the formation side of the neckline
        if !side.beats(left.price, neckline) || !side.beats(right.price, neckline) {
            return None;
        }
        if !not_exceeded(bars, right.index + 1, index, head.price, side)
            || !breaks_neckline(bars, right.index + 1, index, neckline, side)
        {
            return None;
        }

        let direction = reversal_direction(side);
        let kind = match side {
            Extremum::High => PatternKind::HeadAndShoulders,
            Extremum::Low => PatternKind::InverseHeadAndShoulders,
        };
        let height = (head.price - neckline).abs();
        let mean_shoulder = (left.price + right.price) / 2.0;
        let symmetry =
            1.0 - (left.price - right.price).abs() / (mean_shoulder.abs() * tolerance);
        Some(PatternSignal {
            index,
            kind,
            direction,
            strength: scale_strength(symmetry, 0.65, 0.95),
            payload: SignalPayload::Reversal {
                neckline,
                target: neckline + direction.sign() * height,
            },
        })
    }
}

impl PatternDetector for HeadAndShouldersDetector {
    fn kinds(&self) -> &'static [PatternKind] {
        HS_KINDS
    }

    fn min_bars(&self) -> usize {
        6 * self.swing_window.get() + 4
    }

    fn validate_config(&self) -> Result<()> {
        if self.shoulder_tolerance.get() <= 0.0 {
            return Err(Error::InvalidConfig(
                "shoulder_tolerance must be > 0".to_string(),
            ));
        }
        check_swing_window(self.lookback, self.swing_window)
    }

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        _rows: &[IndicatorRow],
        index: usize,
    ) -> Option<PatternSignal> {
        if index < 1 || index >= bars.len() {
            return None;
        }
        self.detect_side(bars, index, Extremum::High)
            .or_else(|| self.detect_side(bars, index, Extremum::Low))
    }
}

// ============================================================
// PARAMETERS
// ============================================================

static DOUBLE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("lookback", 40.0, (20.0, 80.0, 10.0), "Trailing window length"),
    ParamMeta::period("swing_window", 3.0, (2.0, 5.0, 1.0), "Swing neighbourhood per side"),
    ParamMeta::ratio("tolerance", 0.01, (0.005, 0.03, 0.005), "Max extreme price mismatch"),
];

static HS_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("lookback", 60.0, (30.0, 120.0, 10.0), "Trailing window length"),
    ParamMeta::period("swing_window", 3.0, (2.0, 5.0, 1.0), "Swing neighbourhood per side"),
    ParamMeta::ratio(
        "shoulder_tolerance",
        0.015,
        (0.005, 0.03, 0.005),
        "Max shoulder price mismatch",
    ),
];

impl ParameterizedDetector for DoubleExtremeDetector {
    fn param_meta() -> &'static [ParamMeta] {
        DOUBLE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            lookback: get_period(params, "lookback", 40)?,
            swing_window: get_period(params, "swing_window", 3)?,
            tolerance: get_ratio(params, "tolerance", 0.01)?,
        };
        detector.validate_config()?;
        Ok(detector)
    }
}

impl ParameterizedDetector for HeadAndShouldersDetector {
    fn param_meta() -> &'static [ParamMeta] {
        HS_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            lookback: get_period(params, "lookback", 60)?,
            swing_window: get_period(params, "swing_window", 3)?,
            shoulder_tolerance: get_ratio(params, "shoulder_tolerance", 0.015)?,
        };
        detector.validate_config()?;
        Ok(detector)
    }
}
