//! Trade simulation
//!
//! A [`TradeSetup`] becomes at most one settled [`Trade`]:
//!
//! - **Pending**: size the position from the risk budget; a zero or
//!   non-finite stop distance means no trade.
//! - **Open**: walk forward from the candle after entry to the holding
//!   horizon. Stop is checked before target on every candle, so a candle
//!   touching both closes at the stop.
//! - **Closed**: stop loss, take profit, or timeout at the close of the
//!   horizon candle. Settlement updates the capital ledger.
//!
//! Capital is a single owned [`BacktestState`], updated strictly in the order
//! setups are simulated. [`run_signals`] adds the cooldown/overlap policy for a
//! signal stream and [`backtest_by_kind`] runs one independent ledger per
//! pattern kind on the rayon pool.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    filter::QualifiedSignal,
    indicators::{percentile_rank, IndicatorRow},
    stats::{ApprovalCriteria, Statistics},
    Direction, Error, Factor, PatternKind, Period, Result, OHLCV,
};

// ============================================================
// CONFIGURATION
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Percent of current capital risked per trade (1.0 = 1%)
    pub risk_percent: Factor,
    /// Monetary value of one price unit per unit of size
    pub unit_value: Factor,
    pub min_size: f64,
    pub max_size: f64,
    /// Decimal places the size is rounded to
    pub size_precision: u32,
    /// Candles after entry before a timeout exit
    pub max_holding: Period,
    /// Candles after an entry before the next signal may trade
    pub cooldown: usize,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            risk_percent: Factor::new_const(1.0),
            unit_value: Factor::new_const(10.0),
            min_size: 0.01,
            max_size: 10.0,
            size_precision: 2,
            max_holding: Period::new_const(20),
            cooldown: 10,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "initial_capital must be finite and > 0, got {}",
                self.initial_capital
            )));
        }
        if !self.min_size.is_finite() || !self.max_size.is_finite() {
            return Err(Error::InvalidValue("size bounds must be finite"));
        }
        if self.min_size <= 0.0 || self.min_size > self.max_size {
            return Err(Error::InvalidConfig(format!(
                "need 0 < min_size ({}) <= max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.size_precision > 8 {
            return Err(Error::OutOfRange {
                field: "size_precision",
                value: self.size_precision as f64,
                min: 0.0,
                max: 8.0,
            });
        }
        Ok(())
    }
}

// ============================================================
// RECORDS
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            TradeSide::Long => 1.0,
            TradeSide::Short => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Long => "long",
            TradeSide::Short => "short",
        }
    }
}

impl From<Direction> for TradeSide {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Bullish => TradeSide::Long,
            Direction::Bearish => TradeSide::Short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Timeout,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::Timeout => "timeout",
        }
    }
}

/// Indicator values captured at entry, for dataset export
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub rsi: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_medium: Option<f64>,
    pub ema_slow: Option<f64>,
    pub atr: Option<f64>,
    pub atr_percentile: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub body: f64,
    pub upper_wick: f64,
    pub lower_wick: f64,
}

impl FeatureSnapshot {
    pub fn capture(row: &IndicatorRow, atr_percentile: Option<f64>) -> Self {
        Self {
            rsi: row.rsi,
            ema_fast: row.ema_fast,
            ema_medium: row.ema_medium,
            ema_slow: row.ema_slow,
            atr: row.atr,
            atr_percentile,
            volume_ratio: row.volume_ratio,
            body: row.body,
            upper_wick: row.upper_wick,
            lower_wick: row.lower_wick,
        }
    }
}

/// Entry, stop and target for one prospective trade
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeSetup {
    pub kind: Option<PatternKind>,
    pub side: TradeSide,
    pub entry_index: usize,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward: f64,
    pub features: Option<FeatureSnapshot>,
}

impl TradeSetup {
    /// `None` unless all prices are finite and both risk and reward are
    /// strictly positive for `side`.
    pub fn new(
        side: TradeSide,
        entry_index: usize,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Option<Self> {
        let risk = side.sign() * (entry_price - stop_loss);
        let reward = side.sign() * (take_profit - entry_price);
        if !risk.is_finite() || !reward.is_finite() || risk <= 0.0 || reward <= 0.0 {
            return None;
        }
        Some(Self {
            kind: None,
            side,
            entry_index,
            entry_price,
            stop_loss,
            take_profit,
            risk_reward: reward / risk,
            features: None,
        })
    }

    pub fn with_kind(mut self, kind: PatternKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_features(mut self, features: FeatureSnapshot) -> Self {
        self.features = Some(features);
        self
    }

    #[inline]
    pub fn risk(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }
}

/// One settled trade. Never mutated after settlement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub kind: Option<PatternKind>,
    pub side: TradeSide,
    pub entry_index: usize,
    pub exit_index: usize,
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub position_size: f64,
    pub exit_reason: ExitReason,
    pub pnl_amount: f64,
    /// Relative to the initial capital of the run
    pub pnl_percent: f64,
    pub capital_after: f64,
    pub risk_reward: f64,
    pub features: Option<FeatureSnapshot>,
}

impl Trade {
    #[inline]
    pub fn is_win(&self) -> bool {
        self.pnl_amount > 0.0
    }
}

/// Capital ledger of one engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestState {
    pub initial_capital: f64,
    pub current_capital: f64,
    pub trades: Vec<Trade>,
}

impl BacktestState {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            current_capital: initial_capital,
            trades: Vec::new(),
        }
    }
}

// ============================================================
// ENGINE
// ============================================================

/// Sequential simulator owning one capital ledger
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    config: BacktestConfig,
    state: BacktestState,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        let state = BacktestState::new(config.initial_capital);
        Ok(Self { config, state })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn state(&self) -> &BacktestState {
        &self.state
    }

    pub fn trades(&self) -> &[Trade] {
        &self.state.trades
    }

    pub fn into_state(self) -> BacktestState {
        self.state
    }

    pub fn statistics(&self) -> Option<Statistics> {
        Statistics::compute(self.state.initial_capital, &self.state.trades)
    }

    /// Size risking `risk_percent` of current capital between entry and stop,
    /// rounded to `size_precision` then clamped to `[min_size, max_size]`.
    pub fn position_size(&self, entry_price: f64, stop_loss: f64) -> Option<f64> {
        let distance = (entry_price - stop_loss).abs();
        if !distance.is_finite() || distance <= 0.0 {
            return None;
        }
        let c = &self.config;
        let risk_amount = self.state.current_capital * c.risk_percent.get() / 100.0;
        let raw = risk_amount / (distance * c.unit_value.get());
        if !raw.is_finite() {
            return None;
        }
        let scale = 10f64.powi(c.size_precision as i32);
        let rounded = (raw * scale).round() / scale;
        Some(rounded.clamp(c.min_size, c.max_size))
    }

    /// Simulate `setup` against `bars` and append the settled trade.
    ///
    /// Returns `None` (nothing recorded) when the entry is the last candle or
    /// outside the data, or when the position cannot be sized.
    pub fn simulate<T: OHLCV>(&mut self, bars: &[T], setup: &TradeSetup) -> Option<&Trade> {
        let entry = setup.entry_index;
        let last = bars.len().checked_sub(1)?;
        if entry >= last {
            debug!(entry, candles = bars.len(), "no candles after entry");
            return None;
        }

        // Pending
        let Some(size) = self.position_size(setup.entry_price, setup.stop_loss) else {
            debug!(entry, "unsizeable position");
            return None;
        };

        // Open
        let horizon = (entry + self.config.max_holding.get()).min(last);
        let (exit_index, exit_price, exit_reason) = (entry + 1..=horizon)
            .find_map(|i| exit_on(setup, &bars[i]).map(|(price, reason)| (i, price, reason)))
            .unwrap_or((horizon, bars[horizon].close(), ExitReason::Timeout));

        // Closed
        let move_per_unit = setup.side.sign() * (exit_price - setup.entry_price);
        let pnl_amount = move_per_unit * size * self.config.unit_value.get();
        self.state.current_capital += pnl_amount;

        let trade = Trade {
            kind: setup.kind,
            side: setup.side,
            entry_index: entry,
            exit_index,
            entry_time: bars[entry].timestamp(),
            exit_time: bars[exit_index].timestamp(),
            entry_price: setup.entry_price,
            exit_price,
            stop_loss: setup.stop_loss,
            take_profit: setup.take_profit,
            position_size: size,
            exit_reason,
            pnl_amount,
            pnl_percent: pnl_amount / self.state.initial_capital * 100.0,
            capital_after: self.state.current_capital,
            risk_reward: setup.risk_reward,
            features: setup.features,
        };
        self.state.trades.push(trade);
        self.state.trades.last()
    }
}

/// Exit fired by one candle; stop wins over target
fn exit_on<T: OHLCV>(setup: &TradeSetup, bar: &T) -> Option<(f64, ExitReason)> {
    let (stop_hit, target_hit) = match setup.side {
        TradeSide::Long => (bar.low() <= setup.stop_loss, bar.high() >= setup.take_profit),
        TradeSide::Short => (bar.high() >= setup.stop_loss, bar.low() <= setup.take_profit),
    };
    if stop_hit {
        Some((setup.stop_loss, ExitReason::StopLoss))
    } else if target_hit {
        Some((setup.take_profit, ExitReason::TakeProfit))
    } else {
        None
    }
}

// ============================================================
// TRADE PLANNING
// ============================================================

/// Derives entry, stop and target from a qualified signal.
///
/// Long stop: first of {neckline, confluent level, support} minus
/// `atr_stop_multiplier` x ATR; otherwise the lowest low of the previous
/// `fallback_lookback` candles minus the same offset. Shorts mirror with
/// resistance and highs. Target: the signal's own target, else
/// `reward_risk` x risk from entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradePlanner {
    pub atr_stop_multiplier: Factor,
    pub fallback_lookback: Period,
    pub reward_risk: Factor,
}

impl Default for TradePlanner {
    fn default() -> Self {
        Self {
            atr_stop_multiplier: Factor::new_const(0.5),
            fallback_lookback: Period::new_const(20),
            reward_risk: Factor::new_const(2.0),
        }
    }
}

impl TradePlanner {
    pub fn plan<T: OHLCV>(
        &self,
        bars: &[T],
        rows: &[IndicatorRow],
        qualified: &QualifiedSignal,
    ) -> Option<TradeSetup> {
        let atrs: Vec<Option<f64>> = rows.iter().map(|r| r.atr).collect();
        self.plan_with_atrs(bars, rows, &atrs, qualified)
    }

    fn plan_with_atrs<T: OHLCV>(
        &self,
        bars: &[T],
        rows: &[IndicatorRow],
        atrs: &[Option<f64>],
        qualified: &QualifiedSignal,
    ) -> Option<TradeSetup> {
        let signal = &qualified.signal;
        let index = signal.index;
        let (bar, row) = (bars.get(index)?, rows.get(index)?);
        let atr = row.atr?;
        let side = TradeSide::from(signal.direction);
        let entry = bar.close();
        let offset = self.atr_stop_multiplier.get() * atr;

        let anchor = match side {
            TradeSide::Long => signal
                .neckline()
                .or(qualified.level.map(|l| l.price))
                .or(signal.support()),
            TradeSide::Short => signal
                .neckline()
                .or(qualified.level.map(|l| l.price))
                .or(signal.resistance()),
        };
        let anchor = match anchor {
            Some(price) => price,
            None => {
                let lookback = self.fallback_lookback.get().min(index);
                let window = bars.get(index - lookback..index)?;
                match side {
                    TradeSide::Long => window.iter().map(|b| b.low()).reduce(f64::min)?,
                    TradeSide::Short => window.iter().map(|b| b.high()).reduce(f64::max)?,
                }
            },
        };
        let stop = anchor - side.sign() * offset;
        let risk = side.sign() * (entry - stop);
        let target = signal
            .target()
            .unwrap_or(entry + side.sign() * self.reward_risk.get() * risk);

        let features = FeatureSnapshot::capture(row, percentile_rank(atrs, index));
        TradeSetup::new(side, index, entry, stop, target)
            .map(|s| s.with_kind(signal.kind).with_features(features))
    }
}

// ============================================================
// SIGNAL-STREAM RUNNER
// ============================================================

/// Why signals in a stream did not become trades
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    pub out_of_range: usize,
    /// Anchored at or before the previous exit
    pub overlapping: usize,
    pub cooldown: usize,
    /// No valid stop/target could be derived
    pub unplanned: usize,
    /// Planned but not simulated (no candle after entry, unsizeable)
    pub rejected: usize,
}

/// Outcome of one ledger run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub trades: Vec<Trade>,
    pub skipped: SkipCounts,
}

impl BacktestReport {
    pub fn statistics(&self) -> Option<Statistics> {
        Statistics::compute(self.initial_capital, &self.trades)
    }
}

/// Plan and simulate a signal stream on one fresh ledger.
///
/// Signals are processed in ascending anchor order. A signal is skipped when
/// its index is outside the data, at or before the previous trade's exit, or
/// earlier than `cooldown` candles after the previous entry.
pub fn run_signals<T: OHLCV>(
    config: &BacktestConfig,
    planner: &TradePlanner,
    bars: &[T],
    rows: &[IndicatorRow],
    signals: impl IntoIterator<Item = QualifiedSignal>,
) -> Result<BacktestReport> {
    let mut engine = BacktestEngine::new(config.clone())?;
    let mut signals: Vec<QualifiedSignal> = signals.into_iter().collect();
    signals.sort_by_key(|q| q.signal.index);

    let atrs: Vec<Option<f64>> = rows.iter().map(|r| r.atr).collect();
    let mut skipped = SkipCounts::default();
    let mut previous: Option<(usize, usize)> = None;

    for q in &signals {
        let index = q.signal.index;
        if index >= bars.len() || index >= rows.len() {
            warn!(index, candles = bars.len(), "signal outside candle data");
            skipped.out_of_range += 1;
            continue;
        }
        if let Some((entry, exit)) = previous {
            if index <= exit {
                skipped.overlapping += 1;
                continue;
            }
            if index < entry + config.cooldown {
                skipped.cooldown += 1;
                continue;
            }
        }
        let Some(setup) = planner.plan_with_atrs(bars, rows, &atrs, q) else {
            debug!(index, kind = %q.signal.kind, "no valid stop/target");
            skipped.unplanned += 1;
            continue;
        };
        match engine.simulate(bars, &setup) {
            Some(trade) => previous = Some((trade.entry_index, trade.exit_index)),
            None => skipped.rejected += 1,
        }
    }

    let state = engine.into_state();
    info!(
        signals = signals.len(),
        trades = state.trades.len(),
        final_capital = state.current_capital,
        "backtest run complete"
    );
    Ok(BacktestReport {
        initial_capital: state.initial_capital,
        final_capital: state.current_capital,
        trades: state.trades,
        skipped,
    })
}

/// Per-kind result of [`backtest_by_kind`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindReport {
    pub kind: PatternKind,
    pub signals: usize,
    pub report: BacktestReport,
    pub statistics: Option<Statistics>,
    pub approved: bool,
}

/// Group `signals` by pattern kind and run one independent ledger per kind
/// in parallel.
pub fn backtest_by_kind<T: OHLCV + Sync>(
    config: &BacktestConfig,
    planner: &TradePlanner,
    bars: &[T],
    rows: &[IndicatorRow],
    signals: &[QualifiedSignal],
    criteria: &ApprovalCriteria,
) -> Result<BTreeMap<PatternKind, KindReport>> {
    config.validate()?;
    criteria.validate()?;

    let mut groups: BTreeMap<PatternKind, Vec<QualifiedSignal>> = BTreeMap::new();
    for q in signals {
        groups.entry(q.signal.kind).or_default().push(*q);
    }

    groups
        .into_par_iter()
        .map(|(kind, group)| {
            let count = group.len();
            let report = run_signals(config, planner, bars, rows, group)?;
            let statistics = report.statistics();
            let approved = statistics.as_ref().is_some_and(|s| criteria.is_approved(s));
            debug!(
                %kind,
                signals = count,
                trades = report.trades.len(),
                approved,
                "kind backtested"
            );
            Ok((
                kind,
                KindReport {
                    kind,
                    signals: count,
                    report,
                    statistics,
                    approved,
                },
            ))
        })
        .collect()
}

/// Statistics over the trades of approved kinds, re-accumulated from
/// `initial_capital` in kind order.
pub fn combined_statistics(
    initial_capital: f64,
    reports: &BTreeMap<PatternKind, KindReport>,
) -> Option<Statistics> {
    let trades: Vec<Trade> = reports
        .values()
        .filter(|r| r.approved)
        .flat_map(|r| r.report.trades.iter().copied())
        .collect();
    Statistics::compute(initial_capital, &trades)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Candle, PatternSignal, SignalPayload};

    fn flat(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle::new(i as i64 * 60, 100.0, 100.5, 99.5, 100.0, 1000.0))
            .collect()
    }

    fn long_setup(entry_index: usize) -> TradeSetup {
        TradeSetup::new(TradeSide::Long, entry_index, 100.0, 98.0, 104.0).unwrap()
    }

    fn engine() -> BacktestEngine {
        BacktestEngine::new(BacktestConfig::default()).unwrap()
    }

    #[test]
    fn test_position_size_formula() {
        // 1% of 10000 = 100; 100 / (2 * 10) = 5
        assert_eq!(engine().position_size(100.0, 98.0), Some(5.0));
    }

    #[test]
    fn test_position_size_clamps() {
        let e = engine();
        assert_eq!(e.position_size(100.0, 99.999), Some(10.0));
        assert_eq!(e.position_size(100.0, -99_900.0), Some(0.01));
        assert_eq!(e.position_size(100.0, 100.0), None);
        assert_eq!(e.position_size(100.0, f64::NAN), None);
    }

    #[test]
    fn test_position_size_rounds() {
        // 100 / (3 * 10) = 3.333...
        assert_eq!(engine().position_size(100.0, 97.0), Some(3.33));
    }

    #[test]
    fn test_setup_rejects_wrong_side_levels() {
        assert!(TradeSetup::new(TradeSide::Long, 0, 100.0, 101.0, 104.0).is_none());
        assert!(TradeSetup::new(TradeSide::Long, 0, 100.0, 98.0, 99.0).is_none());
        assert!(TradeSetup::new(TradeSide::Short, 0, 100.0, 98.0, 96.0).is_none());
        assert!(TradeSetup::new(TradeSide::Long, 0, 100.0, f64::NAN, 104.0).is_none());
        let s = TradeSetup::new(TradeSide::Short, 0, 100.0, 102.0, 96.0).unwrap();
        assert!((s.risk_reward - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_stop_wins_when_both_hit() {
        let mut bars = flat(30);
        bars[3] = Candle::new(180, 100.0, 104.5, 97.5, 100.0, 1000.0);
        let mut e = engine();
        let t = *e.simulate(&bars, &long_setup(0)).unwrap();
        assert_eq!(t.exit_reason, ExitReason::StopLoss);
        assert_eq!(t.exit_index, 3);
        assert_eq!(t.exit_price, 98.0);
        assert!((t.pnl_amount + 100.0).abs() < 1e-9);
        assert!((t.pnl_percent + 1.0).abs() < 1e-9);
        assert!((t.capital_after - 9_900.0).abs() < 1e-9);
    }

    #[test]
    fn test_take_profit() {
        let mut bars = flat(30);
        bars[5] = Candle::new(300, 100.0, 104.2, 99.0, 104.0, 1000.0);
        let mut e = engine();
        let t = *e.simulate(&bars, &long_setup(0)).unwrap();
        assert_eq!(t.exit_reason, ExitReason::TakeProfit);
        assert_eq!(t.exit_price, 104.0);
        assert_eq!(t.exit_time, 300);
        assert!((t.pnl_amount - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_mirror() {
        let mut bars = flat(30);
        bars[2] = Candle::new(120, 100.0, 100.4, 95.5, 96.0, 1000.0);
        let setup = TradeSetup::new(TradeSide::Short, 0, 100.0, 102.0, 96.0).unwrap();
        let mut e = engine();
        let t = *e.simulate(&bars, &setup).unwrap();
        assert_eq!(t.exit_reason, ExitReason::TakeProfit);
        assert!((t.pnl_amount - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_timeout_exits_at_horizon_close() {
        let mut bars = flat(30);
        bars[20] = Candle::new(1200, 100.0, 100.5, 99.5, 100.3, 1000.0);
        let mut e = engine();
        let t = *e.simulate(&bars, &long_setup(0)).unwrap();
        assert_eq!(t.exit_reason, ExitReason::Timeout);
        assert_eq!(t.exit_index, 20);
        assert_eq!(t.exit_price, 100.3);
        assert!((t.pnl_amount - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_horizon_truncated_by_data_end() {
        let bars = flat(30);
        let mut e = engine();
        let t = *e.simulate(&bars, &long_setup(25)).unwrap();
        assert_eq!(t.exit_reason, ExitReason::Timeout);
        assert_eq!(t.exit_index, 29);
    }

    #[test]
    fn test_entry_on_last_candle_is_no_trade() {
        let bars = flat(10);
        let mut e = engine();
        assert!(e.simulate(&bars, &long_setup(9)).is_none());
        assert!(e.simulate(&bars, &long_setup(12)).is_none());
        assert!(e.trades().is_empty());
        assert_eq!(e.state().current_capital, 10_000.0);
    }

    #[test]
    fn test_capital_chain() {
        let mut bars = flat(60);
        bars[3] = Candle::new(180, 100.0, 100.5, 97.0, 98.0, 1000.0);
        bars[33] = Candle::new(1980, 100.0, 105.0, 99.8, 104.0, 1000.0);
        let mut e = engine();
        e.simulate(&bars, &long_setup(0)).unwrap();
        // Capital is now 9900, so the second size is 99 / 20 = 4.95
        let second = *e.simulate(&bars, &long_setup(30)).unwrap();
        assert_eq!(second.position_size, 4.95);
        let trades = e.trades();
        assert!((trades[0].capital_after - 9_900.0).abs() < 1e-9);
        assert!(
            (trades[1].capital_after - (trades[0].capital_after + trades[1].pnl_amount)).abs()
                < 1e-9
        );
        assert_eq!(e.state().current_capital, trades[1].capital_after);
    }

    fn atr_rows(n: usize, atr: f64) -> Vec<IndicatorRow> {
        (0..n)
            .map(|_| IndicatorRow {
                atr: Some(atr),
                ..Default::default()
            })
            .collect()
    }

    fn qualified(index: usize, direction: Direction, payload: SignalPayload) -> QualifiedSignal {
        QualifiedSignal::unfiltered(PatternSignal {
            index,
            kind: PatternKind::DoubleBottom,
            direction,
            strength: 0.8,
            payload,
        })
    }

    #[test]
    fn test_planner_neckline_stop() {
        let bars = flat(30);
        let rows = atr_rows(30, 1.0);
        let q = qualified(
            25,
            Direction::Bullish,
            SignalPayload::Reversal {
                neckline: 98.0,
                target: 105.0,
            },
        );
        let setup = TradePlanner::default().plan(&bars, &rows, &q).unwrap();
        assert_eq!(setup.side, TradeSide::Long);
        assert_eq!(setup.entry_price, 100.0);
        assert!((setup.stop_loss - 97.5).abs() < 1e-12);
        assert_eq!(setup.take_profit, 105.0);
        assert_eq!(setup.kind, Some(PatternKind::DoubleBottom));
        assert_eq!(setup.features.unwrap().atr, Some(1.0));
    }

    #[test]
    fn test_planner_fallback_extreme_and_default_target() {
        let mut bars = flat(30);
        bars[10] = Candle::new(600, 100.0, 100.5, 97.0, 100.0, 1000.0);
        let rows = atr_rows(30, 1.0);
        let q = qualified(25, Direction::Bullish, SignalPayload::Candle { body_ratio: 2.0 });
        let setup = TradePlanner::default().plan(&bars, &rows, &q).unwrap();
        // Lowest low of candles 5..25 is 97.0
        assert!((setup.stop_loss - 96.5).abs() < 1e-12);
        assert!((setup.take_profit - 107.0).abs() < 1e-12);

        let short = qualified(25, Direction::Bearish, SignalPayload::Candle { body_ratio: 2.0 });
        let setup = TradePlanner::default().plan(&bars, &rows, &short).unwrap();
        assert!((setup.stop_loss - 101.0).abs() < 1e-12);
        assert!((setup.take_profit - 98.0).abs() < 1e-12);
    }

    #[test]
    fn test_planner_requires_atr_and_history() {
        let bars = flat(30);
        let q = qualified(25, Direction::Bullish, SignalPayload::Candle { body_ratio: 2.0 });
        let no_atr = vec![IndicatorRow::default(); 30];
        assert!(TradePlanner::default().plan(&bars, &no_atr, &q).is_none());

        let first = qualified(0, Direction::Bullish, SignalPayload::Candle { body_ratio: 2.0 });
        assert!(TradePlanner::default().plan(&bars, &atr_rows(30, 1.0), &first).is_none());
    }

    #[test]
    fn test_run_signals_cooldown_and_overlap() {
        let mut bars = flat(80);
        // First trade (entry 21) stops out at 23
        bars[23] = Candle::new(23 * 60, 100.0, 100.5, 96.0, 97.0, 1000.0);
        let rows = atr_rows(80, 1.0);
        let payload = SignalPayload::Reversal {
            neckline: 98.5,
            target: 103.0,
        };
        let signals = [
            qualified(40, Direction::Bullish, payload),
            qualified(21, Direction::Bullish, payload),
            qualified(23, Direction::Bullish, payload),
            qualified(26, Direction::Bullish, payload),
            qualified(95, Direction::Bullish, payload),
        ];
        let report = run_signals(
            &BacktestConfig::default(),
            &TradePlanner::default(),
            &bars,
            &rows,
            signals,
        )
        .unwrap();

        let entries: Vec<usize> = report.trades.iter().map(|t| t.entry_index).collect();
        assert_eq!(entries, vec![21, 40]);
        assert_eq!(report.skipped.overlapping, 1);
        assert_eq!(report.skipped.cooldown, 1);
        assert_eq!(report.skipped.out_of_range, 1);
        assert_eq!(report.final_capital, report.trades[1].capital_after);
    }

    #[test]
    fn test_run_signals_rejects_bad_config() {
        let config = BacktestConfig {
            min_size: 20.0,
            ..Default::default()
        };
        let bars = flat(5);
        let result = run_signals(
            &config,
            &TradePlanner::default(),
            &bars,
            &[],
            Vec::<QualifiedSignal>::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_backtest_by_kind_separates_ledgers() {
        let mut bars = flat(80);
        bars[23] = Candle::new(23 * 60, 100.0, 100.5, 96.0, 97.0, 1000.0);
        let rows = atr_rows(80, 1.0);
        let payload = SignalPayload::Reversal {
            neckline: 98.5,
            target: 103.0,
        };
        let mut top = qualified(22, Direction::Bullish, payload);
        top.signal.kind = PatternKind::InverseHeadAndShoulders;
        let signals = [qualified(21, Direction::Bullish, payload), top];

        let reports = backtest_by_kind(
            &BacktestConfig::default(),
            &TradePlanner::default(),
            &bars,
            &rows,
            &signals,
            &ApprovalCriteria::default(),
        )
        .unwrap();

        assert_eq!(reports.len(), 2);
        // Each kind trades on its own ledger, so the overlap does not apply
        for r in reports.values() {
            assert_eq!(r.signals, 1);
            assert_eq!(r.report.trades.len(), 1);
            assert!(!r.approved);
        }
        assert!(combined_statistics(10_000.0, &reports).is_none());
    }
}
