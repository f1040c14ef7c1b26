//! # chartscan
//!
//! Chart-pattern detection and trade simulation over OHLCV candle sequences.
//!
//! Data flows strictly left to right:
//! candles → [`IndicatorEngine`] → {[`LevelClusterer`], detectors} →
//! [`SignalQualityFilter`] → [`BacktestEngine`] → [`Statistics`].
//!
//! ## Quick Start
//!
//! ```rust
//! use chartscan::prelude::*;
//!
//! let candles: Vec<Candle> = (0..60)
//!     .map(|i| {
//!         let base = 100.0 + (i as f64 * 0.7).sin() * 3.0;
//!         Candle::new(i, base, base + 1.0, base - 1.0, base + 0.2, 1_000.0)
//!     })
//!     .collect();
//!
//! let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
//! let analysis = engine.analyze(&candles).unwrap();
//! assert_eq!(analysis.rows.len(), candles.len());
//!
//! let report = run_signals(
//!     &BacktestConfig::default(),
//!     &TradePlanner::default(),
//!     &candles,
//!     &analysis.rows,
//!     analysis.signals.iter().cloned().map(QualifiedSignal::unfiltered),
//! )
//! .unwrap();
//! assert!(report.trades.len() <= analysis.signals.len());
//! ```

pub mod backtest;
pub mod config;
pub mod detectors;
pub mod export;
pub mod filter;
pub mod indicators;
pub mod levels;
pub mod params;
pub mod scanner;
pub mod stats;

pub mod prelude {
    pub use crate::{
        // Backtest
        backtest::{
            backtest_by_kind, combined_statistics, run_signals, BacktestConfig, BacktestEngine,
            BacktestReport, BacktestState, ExitReason, FeatureSnapshot, KindReport, SkipCounts,
            Trade, TradePlanner, TradeSetup, TradeSide,
        },
        // Configuration
        config::AnalysisConfig,
        // Detectors
        detectors::*,
        // Export
        export::{export_trades_csv, write_trades_csv},
        // Filtering
        filter::{DirectionalFilters, QualifiedSignal, QualityConfig, SignalQualityFilter},
        // Indicators
        indicators::{trend_bias, IndicatorConfig, IndicatorEngine, IndicatorRow, TrendBias},
        // Levels
        levels::{is_at_level, Level, LevelClusterer, LevelConfig},
        // Parameters
        params::{get_factor, get_period, get_ratio, ParamMeta, ParamType, ParameterizedDetector},
        // Live scanning
        scanner::{LiveScanner, TradeRecommendation},
        // Statistics
        stats::{ApprovalCriteria, Statistics},
        Analysis,
        BuiltinDetector,
        Candle,
        Direction,
        EngineBuilder,
        // Errors
        Error,
        Factor,
        OHLCVExt,
        PatternDetector,
        PatternEngine,
        PatternKind,
        PatternSignal,
        Period,
        Ratio,
        Result,
        SignalPayload,
        OHLCV,
    };
}

use std::{collections::HashMap, fmt, str::FromStr};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    indicators::{IndicatorEngine, IndicatorRow},
    params::{ParamMeta, ParameterizedDetector},
};

#[doc(no_inline)]
pub use crate::{
    backtest::BacktestEngine, filter::SignalQualityFilter, levels::LevelClusterer,
    stats::Statistics,
};

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the caller.
///
/// Only configuration and input-validation problems are errors. Missing
/// indicator values, degenerate geometry, and out-of-range signal indices
/// shrink the result set instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Unknown pattern kind: {0}")]
    UnknownPatternKind(String),

    #[error("Invalid candle at index {index}: {reason}")]
    InvalidCandle { index: usize, reason: &'static str },

    #[error("Timestamps not strictly increasing at index {index}")]
    UnorderedTimestamps { index: usize },

    #[error("CSV export failed: {0}")]
    Export(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(Error::InvalidValue("Ratio cannot be NaN or infinite"));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(Error::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

/// Strictly positive, finite multiplier (body ratios, percentages, ATR offsets)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Factor(f64);

impl Factor {
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(Error::InvalidValue("Factor cannot be NaN or infinite"));
        }
        if value <= 0.0 {
            return Err(Error::InvalidValue("Factor must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

/// Period (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(Error::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

macro_rules! impl_validated_serde {
    ($($ty:ident($inner:ty)),* $(,)?) => {
        $(
            impl Serialize for $ty {
                fn serialize<S: serde::Serializer>(
                    &self,
                    s: S,
                ) -> std::result::Result<S::Ok, S::Error> {
                    self.0.serialize(s)
                }
            }

            impl<'de> Deserialize<'de> for $ty {
                fn deserialize<D: serde::Deserializer<'de>>(
                    d: D,
                ) -> std::result::Result<Self, D::Error> {
                    let value = <$inner>::deserialize(d)?;
                    $ty::new(value).map_err(serde::de::Error::custom)
                }
            }
        )*
    };
}

impl_validated_serde!(Ratio(f64), Factor(f64), Period(usize));

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn timestamp(&self) -> i64;
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn body(&self) -> f64 {
        (self.close() - self.open()).abs()
    }

    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn upper_wick(&self) -> f64 {
        self.high() - self.open().max(self.close())
    }

    #[inline]
    fn lower_wick(&self) -> f64 {
        self.open().min(self.close()) - self.low()
    }

    #[inline]
    fn body_top(&self) -> f64 {
        self.open().max(self.close())
    }

    #[inline]
    fn body_bottom(&self) -> f64 {
        self.open().min(self.close())
    }

    #[inline]
    fn is_bullish(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        let prices = [self.open(), self.high(), self.low(), self.close()];
        if prices.iter().any(|p| p.is_nan()) {
            return Err(Error::InvalidCandle {
                index: 0,
                reason: "NaN in OHLC",
            });
        }
        if prices.iter().any(|p| p.is_infinite()) {
            return Err(Error::InvalidCandle {
                index: 0,
                reason: "Infinite value in OHLC",
            });
        }
        if self.high() < self.low() {
            return Err(Error::InvalidCandle {
                index: 0,
                reason: "high < low",
            });
        }
        if !self.volume().is_finite() || self.volume() < 0.0 {
            return Err(Error::InvalidCandle {
                index: 0,
                reason: "volume must be finite and non-negative",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

/// Plain candle record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for Candle {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }
}

/// Validate every candle and the strict timestamp ordering of the sequence.
pub fn validate_candles<T: OHLCV>(bars: &[T]) -> Result<()> {
    for (i, bar) in bars.iter().enumerate() {
        bar.validate().map_err(|e| match e {
            Error::InvalidCandle { reason, .. } => Error::InvalidCandle { index: i, reason },
            other => other,
        })?;
        if i > 0 && bar.timestamp() <= bars[i - 1].timestamp() {
            return Err(Error::UnorderedTimestamps { index: i });
        }
    }
    Ok(())
}

// ============================================================
// PATTERN SIGNAL - tagged envelope + kind-specific payload
// ============================================================

/// Direction of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl Direction {
    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    #[inline]
    pub fn is_bearish(self) -> bool {
        matches!(self, Direction::Bearish)
    }

    /// +1.0 for bullish, -1.0 for bearish
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::Bullish => 1.0,
            Direction::Bearish => -1.0,
        }
    }

    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Direction::Bullish => Direction::Bearish,
            Direction::Bearish => Direction::Bullish,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Bullish => write!(f, "bullish"),
            Direction::Bearish => write!(f, "bearish"),
        }
    }
}

macro_rules! define_pattern_kinds {
    (
        $(
            $variant:ident => $name:literal, $bias:expr
        ),* $(,)?
    ) => {
        /// Fixed enumeration of recognised formations
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(rename_all = "snake_case")]
        pub enum PatternKind {
            $($variant),*
        }

        impl PatternKind {
            pub const ALL: &'static [PatternKind] = &[$(PatternKind::$variant),*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(PatternKind::$variant => $name),*
                }
            }

            /// Typical direction of the formation.
            ///
            /// `None` means the breakout side decides (symmetrical triangle).
            pub fn typical_direction(&self) -> Option<Direction> {
                match self {
                    $(PatternKind::$variant => $bias),*
                }
            }
        }

        impl FromStr for PatternKind {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($name => Ok(PatternKind::$variant),)*
                    other => Err(Error::UnknownPatternKind(other.to_string())),
                }
            }
        }
    };
}

define_pattern_kinds! {
    BullishEngulfing => "bullish_engulfing", Some(Direction::Bullish),
    BearishEngulfing => "bearish_engulfing", Some(Direction::Bearish),
    AscendingTriangle => "ascending_triangle", Some(Direction::Bullish),
    DescendingTriangle => "descending_triangle", Some(Direction::Bearish),
    SymmetricalTriangle => "symmetrical_triangle", None,
    RisingWedge => "rising_wedge", Some(Direction::Bearish),
    FallingWedge => "falling_wedge", Some(Direction::Bullish),
    BullFlag => "bull_flag", Some(Direction::Bullish),
    BearFlag => "bear_flag", Some(Direction::Bearish),
    DoubleTop => "double_top", Some(Direction::Bearish),
    DoubleBottom => "double_bottom", Some(Direction::Bullish),
    HeadAndShoulders => "head_and_shoulders", Some(Direction::Bearish),
    InverseHeadAndShoulders => "inverse_head_and_shoulders", Some(Direction::Bullish),
    RoundedTop => "rounded_top", Some(Direction::Bearish),
    RoundedBottom => "rounded_bottom", Some(Direction::Bullish),
    CupAndHandle => "cup_and_handle", Some(Direction::Bullish),
    AscendingStaircase => "ascending_staircase", Some(Direction::Bullish),
    DescendingStaircase => "descending_staircase", Some(Direction::Bearish),
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific structural data of a signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum SignalPayload {
    /// Two-candle body formation
    Candle { body_ratio: f64 },
    /// Converging boundary lines, projected to the anchor candle
    Trendlines {
        support: f64,
        resistance: f64,
        upper_slope: f64,
        lower_slope: f64,
        target: Option<f64>,
    },
    /// Pole + consolidation channel
    Flag {
        pole_change_pct: f64,
        support: f64,
        resistance: f64,
        target: f64,
    },
    /// Double top/bottom, head-and-shoulders
    Reversal { neckline: f64, target: f64 },
    /// Quadratic-fit formation
    Curve {
        r_squared: f64,
        support: f64,
        resistance: f64,
    },
    CupAndHandle {
        r_squared: f64,
        cup_depth: f64,
        handle_high: f64,
        target: f64,
    },
    /// Monotonic run of swing highs and lows
    Staircase {
        steps: usize,
        support: f64,
        resistance: f64,
    },
}

/// One detected formation, anchored to the candle on which it confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternSignal {
    pub index: usize,
    pub kind: PatternKind,
    pub direction: Direction,
    /// Geometric quality 0.0..=1.0
    pub strength: f64,
    pub payload: SignalPayload,
}

impl PatternSignal {
    pub fn neckline(&self) -> Option<f64> {
        match self.payload {
            SignalPayload::Reversal { neckline, .. } => Some(neckline),
            _ => None,
        }
    }

    pub fn support(&self) -> Option<f64> {
        match self.payload {
            SignalPayload::Trendlines { support, .. }
            | SignalPayload::Flag { support, .. }
            | SignalPayload::Curve { support, .. }
            | SignalPayload::Staircase { support, .. } => Some(support),
            _ => None,
        }
    }

    pub fn resistance(&self) -> Option<f64> {
        match self.payload {
            SignalPayload::Trendlines { resistance, .. }
            | SignalPayload::Flag { resistance, .. }
            | SignalPayload::Curve { resistance, .. }
            | SignalPayload::Staircase { resistance, .. } => Some(resistance),
            SignalPayload::CupAndHandle { handle_high, .. } => Some(handle_high),
            _ => None,
        }
    }

    pub fn target(&self) -> Option<f64> {
        match self.payload {
            SignalPayload::Trendlines { target, .. } => target,
            SignalPayload::Flag { target, .. }
            | SignalPayload::Reversal { target, .. }
            | SignalPayload::CupAndHandle { target, .. } => Some(target),
            _ => None,
        }
    }
}

// ============================================================
// PATTERN DETECTOR TRAIT
// ============================================================

/// A pure scan recognising one family of formations.
///
/// `detect` evaluates a single anchor index; `scan` makes one pass over the
/// whole sequence. Detectors never read each other's output.
pub trait PatternDetector: Send + Sync {
    /// Kinds this detector can emit
    fn kinds(&self) -> &'static [PatternKind];

    /// Minimum number of candles up to and including the anchor
    fn min_bars(&self) -> usize;

    fn detect<T: OHLCV>(
        &self,
        bars: &[T],
        rows: &[IndicatorRow],
        index: usize,
    ) -> Option<PatternSignal>;

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }

    fn scan<T: OHLCV>(&self, bars: &[T], rows: &[IndicatorRow]) -> Vec<PatternSignal> {
        let first = self.min_bars().saturating_sub(1);
        (first..bars.len())
            .filter_map(|i| self.detect(bars, rows, i))
            .collect()
    }
}

// ============================================================
// BUILTIN DETECTORS - generated via macro
// ============================================================

use detectors::*;

/// Macro to generate BuiltinDetector enum without boilerplate
macro_rules! define_builtin_detectors {
    (
        $(
            $variant:ident($detector:ty) => $family:literal
        ),* $(,)?
    ) => {
        /// All builtin detectors - enum dispatch
        #[derive(Debug, Clone)]
        pub enum BuiltinDetector {
            $($variant($detector)),*
        }

        impl BuiltinDetector {
            #[inline]
            pub fn detect<T: OHLCV>(
                &self,
                bars: &[T],
                rows: &[IndicatorRow],
                index: usize,
            ) -> Option<PatternSignal> {
                match self {
                    $(Self::$variant(d) => PatternDetector::detect(d, bars, rows, index)),*
                }
            }

            pub fn scan<T: OHLCV>(&self, bars: &[T], rows: &[IndicatorRow]) -> Vec<PatternSignal> {
                match self {
                    $(Self::$variant(d) => PatternDetector::scan(d, bars, rows)),*
                }
            }

            #[inline]
            pub fn kinds(&self) -> &'static [PatternKind] {
                match self {
                    $(Self::$variant(d) => PatternDetector::kinds(d)),*
                }
            }

            #[inline]
            pub fn min_bars(&self) -> usize {
                match self {
                    $(Self::$variant(d) => PatternDetector::min_bars(d)),*
                }
            }

            pub fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(d) => PatternDetector::validate_config(d)),*
                }
            }

            /// Config-file name of the detector family
            pub fn family(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => $family),*
                }
            }

            /// Build the detector of `family` from a parameter map.
            ///
            /// Missing parameters take their defaults; unknown names and
            /// values outside the parameter's range are errors.
            pub fn from_params(family: &str, params: &HashMap<&str, f64>) -> Result<Self> {
                match family {
                    $(
                        $family => {
                            let meta = <$detector as ParameterizedDetector>::param_meta();
                            check_params(family, meta, params)?;
                            let detector =
                                <$detector as ParameterizedDetector>::with_params(params)?;
                            Ok(Self::$variant(detector))
                        }
                    )*
                    other => Err(Error::InvalidConfig(format!(
                        "unknown detector family '{other}'"
                    ))),
                }
            }
        }

        /// Config-file names of every builtin detector family
        pub const DETECTOR_FAMILIES: &[&str] = &[$($family),*];
    };
}

fn check_params(family: &str, meta: &[ParamMeta], params: &HashMap<&str, f64>) -> Result<()> {
    for (name, value) in params {
        let Some(m) = meta.iter().find(|m| m.name == *name) else {
            return Err(Error::InvalidConfig(format!(
                "unknown parameter '{name}' for detector family '{family}'"
            )));
        };
        m.validate(*value)?;
    }
    Ok(())
}

define_builtin_detectors! {
    Engulfing(EngulfingDetector) => "engulfing",
    Triangle(TriangleDetector) => "triangle",
    Wedge(WedgeDetector) => "wedge",
    Flag(FlagDetector) => "flag",
    DoubleExtreme(DoubleExtremeDetector) => "double_extreme",
    HeadAndShoulders(HeadAndShouldersDetector) => "head_and_shoulders",
    Rounded(RoundedDetector) => "rounded",
    CupAndHandle(CupAndHandleDetector) => "cup_and_handle",
    Staircase(StaircaseDetector) => "staircase",
}

impl BuiltinDetector {
    /// Default-configured detector emitting `kind`
    pub fn for_kind(kind: PatternKind) -> Self {
        use PatternKind::*;
        match kind {
            BullishEngulfing | BearishEngulfing => Self::Engulfing(Default::default()),
            AscendingTriangle | DescendingTriangle | SymmetricalTriangle => {
                Self::Triangle(Default::default())
            }
            RisingWedge | FallingWedge => Self::Wedge(Default::default()),
            BullFlag | BearFlag => Self::Flag(Default::default()),
            DoubleTop | DoubleBottom => Self::DoubleExtreme(Default::default()),
            HeadAndShoulders | InverseHeadAndShoulders => {
                Self::HeadAndShoulders(Default::default())
            }
            RoundedTop | RoundedBottom => Self::Rounded(Default::default()),
            CupAndHandle => Self::CupAndHandle(Default::default()),
            AscendingStaircase | DescendingStaircase => Self::Staircase(Default::default()),
        }
    }
}

// ============================================================
// PATTERN ENGINE
// ============================================================

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub min_strength: Option<f64>,
    pub validate_data: bool,
    pub pattern_filter: Option<Vec<PatternKind>>,
}

/// Indicator rows and raw signals from one complete pass
#[derive(Debug, Clone)]
pub struct Analysis {
    pub rows: Vec<IndicatorRow>,
    /// Sorted by anchor index, then kind
    pub signals: Vec<PatternSignal>,
}

/// Main pattern detection engine
pub struct PatternEngine {
    detectors: Vec<BuiltinDetector>,
    indicators: IndicatorEngine,
    config: EngineConfig,
}

impl PatternEngine {
    pub fn indicators(&self) -> &IndicatorEngine {
        &self.indicators
    }

    /// Compute indicator rows for all bars.
    #[inline]
    pub fn compute_rows<T: OHLCV>(&self, bars: &[T]) -> Vec<IndicatorRow> {
        self.indicators.compute(bars)
    }

    /// Run every detector once over precomputed rows.
    ///
    /// Detectors are independent, so each runs its full pass on the rayon pool.
    pub fn scan_with_rows<T: OHLCV + Sync>(
        &self,
        bars: &[T],
        rows: &[IndicatorRow],
    ) -> Vec<PatternSignal> {
        let mut signals: Vec<PatternSignal> = self
            .detectors
            .par_iter()
            .flat_map_iter(|d| d.scan(bars, rows))
            .filter(|s| self.should_include(s))
            .collect();

        signals.sort_by(|a, b| a.index.cmp(&b.index).then(a.kind.cmp(&b.kind)));
        signals
    }

    /// Scan all bars and return a flat, index-ordered list of signals.
    pub fn scan<T: OHLCV + Sync>(&self, bars: &[T]) -> Result<Vec<PatternSignal>> {
        Ok(self.analyze(bars)?.signals)
    }

    /// Validate (if enabled), compute indicators, and scan.
    pub fn analyze<T: OHLCV + Sync>(&self, bars: &[T]) -> Result<Analysis> {
        if self.config.validate_data {
            validate_candles(bars)?;
        }

        let rows = self.compute_rows(bars);
        let signals = self.scan_with_rows(bars, &rows);
        debug!(
            candles = bars.len(),
            detectors = self.detectors.len(),
            signals = signals.len(),
            "scan complete"
        );
        Ok(Analysis { rows, signals })
    }

    /// Signals anchored on one index (for live use the last candle).
    pub fn scan_at<T: OHLCV>(
        &self,
        bars: &[T],
        rows: &[IndicatorRow],
        index: usize,
    ) -> Vec<PatternSignal> {
        if index >= bars.len() {
            return Vec::new();
        }
        self.detectors
            .iter()
            .filter(|d| index + 1 >= d.min_bars())
            .filter_map(|d| d.detect(bars, rows, index))
            .filter(|s| self.should_include(s))
            .collect()
    }

    fn should_include(&self, s: &PatternSignal) -> bool {
        if let Some(min) = self.config.min_strength {
            if s.strength < min {
                return false;
            }
        }
        if let Some(ref filter) = self.config.pattern_filter {
            if !filter.contains(&s.kind) {
                return false;
            }
        }
        true
    }

    fn validate(&self) -> Result<()> {
        self.indicators.config().validate()?;
        for d in &self.detectors {
            d.validate_config()?;
        }
        Ok(())
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating PatternEngine instances
pub struct EngineBuilder {
    indicators: IndicatorEngine,
    detectors: Vec<BuiltinDetector>,
    config: EngineConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate an array of `BuiltinDetector` variants using `Default::default()` for each inner type.
macro_rules! builtin_defaults {
  ($($variant:ident),* $(,)?) => {
    [$(BuiltinDetector::$variant(Default::default())),*]
  };
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            indicators: IndicatorEngine::default(),
            detectors: Vec::new(),
            config: EngineConfig::default(),
        }
    }

    /// Replace the indicator engine
    pub fn indicators(mut self, indicators: IndicatorEngine) -> Self {
        self.indicators = indicators;
        self
    }

    /// Add every builtin detector with default configuration
    pub fn with_all_defaults(mut self) -> Self {
        self.detectors.extend(builtin_defaults![
            Engulfing,
            Triangle,
            Wedge,
            Flag,
            DoubleExtreme,
            HeadAndShoulders,
            Rounded,
            CupAndHandle,
            Staircase,
        ]);
        self
    }

    /// Add the detectors emitting `kinds` (one detector per family) and
    /// restrict the output to exactly those kinds.
    pub fn with_kinds(mut self, kinds: &[PatternKind]) -> Self {
        for &kind in kinds {
            let detector = BuiltinDetector::for_kind(kind);
            let family = detector.kinds();
            if !self.detectors.iter().any(|d| d.kinds() == family) {
                self.detectors.push(detector);
            }
        }
        self.only_patterns(kinds.iter().copied())
    }

    /// Add a builtin detector
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, detector: BuiltinDetector) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Add with config validation
    pub fn add_checked(mut self, detector: BuiltinDetector) -> Result<Self> {
        detector.validate_config()?;
        self.detectors.push(detector);
        Ok(self)
    }

    /// Set minimum strength filter
    pub fn min_strength(mut self, strength: f64) -> Self {
        self.config.min_strength = Some(strength);
        self
    }

    /// Enable/disable data validation
    pub fn validate_data(mut self, enable: bool) -> Self {
        self.config.validate_data = enable;
        self
    }

    /// Filter to specific pattern kinds only
    pub fn only_patterns(mut self, kinds: impl IntoIterator<Item = PatternKind>) -> Self {
        self.config.pattern_filter = Some(kinds.into_iter().collect());
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<PatternEngine> {
        let engine = PatternEngine {
            detectors: self.detectors,
            indicators: self.indicators,
            config: self.config,
        };
        engine.validate()?;
        Ok(engine)
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle::new(ts, o, h, l, c, 1000.0)
    }

    fn make_downtrend_bars() -> Vec<Candle> {
        (0..20)
            .map(|i| {
                let base = 100.0 - i as f64 * 2.0;
                bar(i, base, base + 1.0, base - 1.0, base - 0.5)
            })
            .collect()
    }

    #[test]
    fn test_ratio_validation() {
        assert!(Ratio::new(0.0).is_ok());
        assert!(Ratio::new(1.0).is_ok());
        assert!(Ratio::new(0.5).is_ok());
        assert!(Ratio::new(-0.1).is_err());
        assert!(Ratio::new(1.1).is_err());
        assert!(Ratio::new(f64::NAN).is_err());
        assert!(Ratio::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_factor_and_period_validation() {
        assert!(Factor::new(1.5).is_ok());
        assert!(Factor::new(0.0).is_err());
        assert!(Factor::new(-2.0).is_err());
        assert!(Factor::new(f64::NAN).is_err());
        assert!(Period::new(1).is_ok());
        assert!(Period::new(0).is_err());
    }

    #[test]
    fn test_ohlcv_ext() {
        let b = bar(0, 100.0, 110.0, 90.0, 105.0);
        assert_eq!(b.body(), 5.0);
        assert_eq!(b.range(), 20.0);
        assert_eq!(b.upper_wick(), 5.0);
        assert_eq!(b.lower_wick(), 10.0);
        assert!(b.is_bullish());
        assert!(!b.is_bearish());
    }

    #[test]
    fn test_validate_candles() {
        let good = vec![bar(1, 1.0, 2.0, 0.5, 1.5), bar(2, 1.5, 2.5, 1.0, 2.0)];
        assert!(validate_candles(&good).is_ok());

        let inverted = vec![bar(1, 1.0, 0.5, 2.0, 1.5)];
        assert!(matches!(
            validate_candles(&inverted),
            Err(Error::InvalidCandle { index: 0, .. })
        ));

        let unordered = vec![bar(5, 1.0, 2.0, 0.5, 1.5), bar(5, 1.0, 2.0, 0.5, 1.5)];
        assert!(matches!(
            validate_candles(&unordered),
            Err(Error::UnorderedTimestamps { index: 1 })
        ));
    }

    #[test]
    fn test_pattern_kind_round_trip_names() {
        for kind in PatternKind::ALL {
            assert_eq!(kind.as_str().parse::<PatternKind>().unwrap(), *kind);
        }
        assert!(matches!(
            "pennant".parse::<PatternKind>(),
            Err(Error::UnknownPatternKind(_))
        ));
        assert_eq!(PatternKind::SymmetricalTriangle.typical_direction(), None);
    }

    #[test]
    fn test_engine_builder() {
        let engine = EngineBuilder::new().with_all_defaults().build();
        assert!(engine.is_ok());
        assert_eq!(engine.unwrap().detectors.len(), 9);
    }

    #[test]
    fn test_empty_scan() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        let bars: Vec<Candle> = vec![];
        let analysis = engine.analyze(&bars).unwrap();
        assert!(analysis.signals.is_empty());
        assert!(analysis.rows.is_empty());
    }

    #[test]
    fn test_engulfing_detection() {
        let mut bars = make_downtrend_bars();
        bars.push(bar(20, 60.0, 61.0, 58.0, 59.0)); // Bearish, body 1
        bars.push(bar(21, 58.5, 62.0, 58.0, 61.5)); // Bullish engulfing, body 3

        let engine = EngineBuilder::new()
            .add(BuiltinDetector::Engulfing(EngulfingDetector::with_defaults()))
            .build()
            .unwrap();

        let signals = engine.scan(&bars).unwrap();
        let engulfing = signals
            .iter()
            .find(|s| s.kind == PatternKind::BullishEngulfing)
            .unwrap();
        assert_eq!(engulfing.index, 21);
        assert_eq!(engulfing.direction, Direction::Bullish);
    }

    #[test]
    fn test_min_strength_filter() {
        let bars = vec![
            bar(0, 100.0, 100.5, 94.5, 95.0),
            bar(1, 94.0, 101.5, 93.5, 101.0),
        ];
        let engine = EngineBuilder::new()
            .add(BuiltinDetector::Engulfing(EngulfingDetector::with_defaults()))
            .min_strength(1.01)
            .build()
            .unwrap();
        assert!(engine.scan(&bars).unwrap().is_empty());
    }

    #[test]
    fn test_pattern_filter() {
        let bars = vec![
            bar(0, 100.0, 100.5, 94.5, 95.0),
            bar(1, 94.0, 101.5, 93.5, 101.0),
        ];
        let engine = EngineBuilder::new()
            .add(BuiltinDetector::Engulfing(EngulfingDetector::with_defaults()))
            .only_patterns([PatternKind::BearishEngulfing])
            .build()
            .unwrap();
        assert!(engine.scan(&bars).unwrap().is_empty());
    }

    #[test]
    fn test_detector_from_params() {
        let params: HashMap<&str, f64> = [("min_body_ratio", 2.0)].into_iter().collect();
        let d = BuiltinDetector::from_params("engulfing", &params).unwrap();
        assert_eq!(d.family(), "engulfing");
        assert_eq!(d.kinds(), BuiltinDetector::for_kind(PatternKind::BearishEngulfing).kinds());

        let unknown: HashMap<&str, f64> = [("body", 2.0)].into_iter().collect();
        assert!(BuiltinDetector::from_params("engulfing", &unknown).is_err());
        let out_of_range: HashMap<&str, f64> = [("min_body_ratio", 9.0)].into_iter().collect();
        assert!(BuiltinDetector::from_params("engulfing", &out_of_range).is_err());
        assert!(BuiltinDetector::from_params("pennant", &HashMap::new()).is_err());
        assert_eq!(DETECTOR_FAMILIES.len(), 9);
    }

    #[test]
    fn test_with_kinds_dedups_families() {
        let engine = EngineBuilder::new()
            .with_kinds(&[PatternKind::DoubleTop, PatternKind::DoubleBottom])
            .build()
            .unwrap();
        assert_eq!(engine.detectors.len(), 1);
    }

    #[test]
    fn test_validation_rejects_bad_data() {
        let engine = EngineBuilder::new()
            .with_all_defaults()
            .validate_data(true)
            .build()
            .unwrap();
        let bars = vec![bar(0, 1.0, 2.0, 0.5, f64::NAN)];
        assert!(engine.analyze(&bars).is_err());
    }

    #[test]
    fn test_scan_at_out_of_range() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        let bars = make_downtrend_bars();
        let rows = engine.compute_rows(&bars);
        assert!(engine.scan_at(&bars, &rows, bars.len()).is_empty());
    }

    #[test]
    fn test_signal_accessors() {
        let s = PatternSignal {
            index: 3,
            kind: PatternKind::DoubleTop,
            direction: Direction::Bearish,
            strength: 0.8,
            payload: SignalPayload::Reversal {
                neckline: 95.0,
                target: 90.0,
            },
        };
        assert_eq!(s.neckline(), Some(95.0));
        assert_eq!(s.target(), Some(90.0));
        assert_eq!(s.support(), None);
    }
}
