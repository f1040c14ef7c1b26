//! Two-candle engulfing reversal

use std::collections::HashMap;

use super::helpers::scale_strength;
use crate::{
    indicators::IndicatorRow,
    params::{get_factor, ParamMeta, ParameterizedDetector},
    Direction, Error, Factor, OHLCVExt, PatternDetector, PatternKind, PatternSignal, Result,
    SignalPayload, OHLCV,
};

impl_with_defaults!(EngulfingDetector);

/// Bullish / bearish engulfing.
///
/// The anchor candle's body must contain the previous body (boundaries
/// inclusive), the two candles must have opposite colours, and the anchor
/// body must be at least `min_body_ratio` times the previous one.
#[derive(Debug, Clone)]
pub struct EngulfingDetector {
    pub min_body_ratio: Factor,
}

impl Default for EngulfingDetector {
    fn default() -> Self {
        Self {
            min_body_ratio: Factor::new_const(1.5),
        }
    }
}

const KINDS: &[PatternKind] = &[PatternKind::BullishEngulfing, PatternKind::BearishEngulfing];

impl PatternDetector for EngulfingDetector {
    fn kinds(&self) -> &'static [PatternKind] {
        KINDS
    }

    fn min_bars(&self) -> usize {
        2
    }

    fn validate_config(&self) -> Result<()> {
        if self.min_body_ratio.get() < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "min_body_ratio must be >= 1.0, got {}",
                self.min_body_ratio.get()
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
        if index < 1 {
            return None;
        }
        let prev = bars.get(index - 1)?;
        let curr = bars.get(index)?;

        let (kind, direction) = if prev.is_bearish() && curr.is_bullish() {
            (PatternKind::BullishEngulfing, Direction::Bullish)
        } else if prev.is_bullish() && curr.is_bearish() {
            (PatternKind::BearishEngulfing, Direction::Bearish)
        } else {
            return None;
        };

        let contains =
            curr.body_bottom() <= prev.body_bottom() && curr.body_top() >= prev.body_top();
        if !contains {
            return None;
        }

        let prev_body = prev.body();
        let curr_body = curr.body();
        let min_ratio = self.min_body_ratio.get();
        if prev_body <= f64::EPSILON || curr_body < prev_body * min_ratio {
            return None;
        }

        let body_ratio = curr_body / prev_body;
        Some(PatternSignal {
            index,
            kind,
            direction,
            strength: scale_strength(body_ratio / min_ratio - 1.0, 0.6, 0.9),
            payload: SignalPayload::Candle { body_ratio },
        })
    }
}

// ============================================================
// PARAMETERS
// ============================================================

static ENGULFING_PARAMS: &[ParamMeta] = &[ParamMeta::factor(
    "min_body_ratio",
    1.5,
    (1.05, 3.0, 0.15),
    "Minimum anchor body / previous body",
)];

impl ParameterizedDetector for EngulfingDetector {
    fn param_meta() -> &'static [ParamMeta] {
        ENGULFING_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        let detector = Self {
            min_body_ratio: get_factor(params, "min_body_ratio", 1.5)?,
        };
        detector.validate_config()?;
        Ok(detector)
    }
}
