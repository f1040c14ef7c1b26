//! Staircases: runs of strictly rising (or falling) swing highs and lows

use std::collections::HashMap;

use super::helpers::{find_swings, scale_strength, Extremum, SwingPoint};
use crate::{
    indicators::IndicatorRow,
    params::{get_period, ParamMeta, ParameterizedDetector},
    Direction, Error, PatternDetector, PatternKind, PatternSignal, Period, Result,
    SignalPayload, OHLCV,
};

impl_with_defaults!(StaircaseDetector);

/// Ascending staircase (higher highs and higher lows) or descending staircase
/// (lower highs and lower lows) over a trailing window.
///
/// The signal fires on the candle where the run first becomes established,
/// i.e. where the last `min_steps` swing highs and swing lows are monotonic
/// but were not on the previous candle.
#[derive(Debug, Clone)]
pub struct StaircaseDetector {
    pub lookback: Period,
    pub swing_window: Period,
    pub min_steps: usize,
}

impl Default for StaircaseDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(30),
            swing_window: Period::new_const(2),
            min_steps: 3,
        }
    }
}

const STAIRCASE_KINDS: &[PatternKind] = &[
    PatternKind::AscendingStaircase,
    PatternKind::DescendingStaircase,
];

/// Established run at one anchor
struct Run {
    direction: Direction,
    steps: usize,
    last_high: f64,
    last_low: f64,
}

/// Length of the monotonic tail of `points` in `direction`
fn tail_run(points: &[SwingPoint], direction: Direction) -> usize {
    if points.is_empty() {
        return 0;
    }
    let steps = points
        .windows(2)
        .rev()
        .take_while(|w| match direction {
            Direction::Bullish => w[1].price > w[0].price,
            Direction::Bearish => w[1].price < w[0].price,
        })
        .count();
    steps + 1
}

impl StaircaseDetector {
    fn established<T: OHLCV>(&self, bars: &[T], at: usize) -> Option<Run> {
        let start = (at + 1).saturating_sub(self.lookback.get());
        let window = &bars[start..=at];
        let w = self.swing_window.get();
        let highs = find_swings(window, Extremum::High, w);
        let lows = find_swings(window, Extremum::Low, w);
        let (last_high, last_low) = (highs.last()?.price, lows.last()?.price);

        [Direction::Bullish, Direction::Bearish]
            .into_iter()
            .find_map(|direction| {
                let steps = tail_run(&highs, direction).min(tail_run(&lows, direction));
                (steps >= self.min_steps).then_some(Run {
                    direction,
                    steps,
                    last_high,
                    last_low,
                })
            })
    }
}

impl PatternDetector for StaircaseDetector {
    fn kinds(&self) -> &'static [PatternKind] {
        STAIRCASE_KINDS
    }

    fn min_bars(&self) -> usize {
        self.lookback.get() + 1
    }

    fn validate_config(&self) -> Result<()> {
        if self.min_steps < 2 {
            return Err(Error::InvalidConfig("min_steps must be >= 2".to_string()));
        }
        let needed = 2 * self.swing_window.get() * self.min_steps + 1;
        if self.lookback.get() < needed {
            return Err(Error::InvalidConfig(format!(
                "lookback {} cannot hold {} steps",
                self.lookback.get(),
                self.min_steps
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
        if index < self.lookback.get() || index >= bars.len() {
            return None;
        }
        let run = self.established(bars, index)?;
        let before = self.established(bars, index - 1);
        if before.is_some_and(|b| b.direction == run.direction) {
            return None;
        }

        let kind = match run.direction {
            Direction::Bullish => PatternKind::AscendingStaircase,
            Direction::Bearish => PatternKind::DescendingStaircase,
        };
        let extra = (run.steps - self.min_steps) as f64;
        Some(PatternSignal {
            index,
            kind,
            direction: run.direction,
            strength: scale_strength(extra / 3.0, 0.55, 0.85),
            payload: SignalPayload::Staircase {
                steps: run.steps,
                support: run.last_low,
                resistance: run.last_high,
            },
        })
    }
}

// ============================================================
// PARAMETERS
// ============================================================

static STAIRCASE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("lookback", 30.0, (20.0, 60.0, 10.0), "Trailing window length"),
    ParamMeta::period("swing_window", 2.0, (1.0, 4.0, 1.0), "Swing neighbourhood per side"),
    ParamMeta::period("min_steps", 3.0, (2.0, 5.0, 1.0), "Monotonic swings required"),
];

impl ParameterizedDetector for StaircaseDetector {
    fn param_meta() -> &'static [ParamMeta] {
        STAIRCASE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            lookback: get_period(params, "lookback", 30)?,
            swing_window: get_period(params, "swing_window", 2)?,
            min_steps: get_period(params, "min_steps", 3)?.get(),
        };
        detector.validate_config()?;
        Ok(detector)
    }
}
