//! Live scanning of the latest candle
//!
//! Each call is a complete, independent pass (indicators, detection, filter,
//! planning) over the snapshot it is given. The scanner only remembers the
//! timestamp of the last candle it scanned, so a repeated snapshot is skipped.
//! It produces recommendations and never places orders.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    backtest::TradePlanner,
    filter::SignalQualityFilter,
    levels::Level,
    validate_candles, Direction, PatternEngine, PatternKind, Result, OHLCV,
};

/// Trade idea for a signal anchored on the latest candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeRecommendation {
    pub kind: PatternKind,
    pub direction: Direction,
    pub timestamp: i64,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward: f64,
    /// 0.0..=1.0, from geometric strength and confirmation score
    pub confidence: f64,
    pub level: Option<Level>,
}

pub struct LiveScanner {
    engine: PatternEngine,
    filter: SignalQualityFilter,
    planner: TradePlanner,
    last_timestamp: Option<i64>,
}

impl LiveScanner {
    pub fn new(engine: PatternEngine, filter: SignalQualityFilter, planner: TradePlanner) -> Self {
        Self {
            engine,
            filter,
            planner,
            last_timestamp: None,
        }
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    /// Forget the last scanned candle so the next snapshot is scanned.
    pub fn reset(&mut self) {
        self.last_timestamp = None;
    }

    /// `Ok(None)` when the snapshot is empty or its latest candle was already
    /// scanned; otherwise the recommendations for that candle (possibly none).
    pub fn scan_latest<T: OHLCV>(
        &mut self,
        bars: &[T],
    ) -> Result<Option<Vec<TradeRecommendation>>> {
        let Some(latest) = bars.last() else {
            return Ok(None);
        };
        let timestamp = latest.timestamp();
        if self.last_timestamp == Some(timestamp) {
            debug!(timestamp, "no new candle");
            return Ok(None);
        }

        validate_candles(bars)?;
        self.last_timestamp = Some(timestamp);

        let index = bars.len() - 1;
        let rows = self.engine.compute_rows(bars);
        let signals = self.engine.scan_at(bars, &rows, index);
        let qualified = self.filter.apply(bars, &rows, &signals);

        let recommendations: Vec<TradeRecommendation> = qualified
            .iter()
            .filter_map(|q| {
                let setup = self.planner.plan(bars, &rows, q)?;
                Some(TradeRecommendation {
                    kind: q.signal.kind,
                    direction: q.signal.direction,
                    timestamp,
                    entry: setup.entry_price,
                    stop_loss: setup.stop_loss,
                    take_profit: setup.take_profit,
                    risk_reward: setup.risk_reward,
                    confidence: q.confidence(),
                    level: q.level,
                })
            })
            .collect();

        if recommendations.is_empty() {
            debug!(timestamp, raw = signals.len(), "no qualified pattern on latest candle");
        } else {
            for r in &recommendations {
                info!(
                    kind = %r.kind,
                    direction = %r.direction,
                    entry = r.entry,
                    stop = r.stop_loss,
                    target = r.take_profit,
                    confidence = r.confidence,
                    "trade recommendation"
                );
            }
        }
        Ok(Some(recommendations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{filter::QualityConfig, Candle, EngineBuilder};

    fn snapshot() -> Vec<Candle> {
        let mut bars: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 130.0 - i as f64;
                Candle::new(i, base, base + 0.3, base - 0.8, base - 0.5, 1000.0)
            })
            .collect();
        bars.push(Candle::new(30, 100.5, 100.8, 99.2, 99.5, 1000.0));
        bars.push(Candle::new(31, 99.3, 101.4, 99.1, 101.2, 2000.0));
        bars
    }

    fn scanner() -> LiveScanner {
        let engine = EngineBuilder::new()
            .with_kinds(&[PatternKind::BullishEngulfing, PatternKind::BearishEngulfing])
            .build()
            .unwrap();
        let filter = SignalQualityFilter::new(QualityConfig::default()).unwrap();
        LiveScanner::new(engine, filter, TradePlanner::default())
    }

    #[test]
    fn test_recommends_on_new_candle() {
        let mut s = scanner();
        let recs = s.scan_latest(&snapshot()).unwrap().unwrap();
        assert_eq!(recs.len(), 1);
        let r = recs[0];
        assert_eq!(r.kind, PatternKind::BullishEngulfing);
        assert_eq!(r.direction, Direction::Bullish);
        assert_eq!(r.timestamp, 31);
        assert_eq!(r.entry, 101.2);
        assert!(r.stop_loss < 99.2);
        assert!((r.risk_reward - 2.0).abs() < 1e-9);
        assert!(r.confidence > 0.0 && r.confidence <= 1.0);
        assert_eq!(s.last_timestamp(), Some(31));
    }

    #[test]
    fn test_same_candle_is_skipped() {
        let mut s = scanner();
        let bars = snapshot();
        assert!(s.scan_latest(&bars).unwrap().is_some());
        assert!(s.scan_latest(&bars).unwrap().is_none());

        let mut next = bars.clone();
        next.push(Candle::new(32, 101.2, 101.5, 101.0, 101.3, 1000.0));
        assert_eq!(s.scan_latest(&next).unwrap(), Some(Vec::new()));

        s.reset();
        assert!(s.scan_latest(&next).unwrap().is_some());
    }

    #[test]
    fn test_empty_and_invalid_snapshots() {
        let mut s = scanner();
        let empty: Vec<Candle> = Vec::new();
        assert!(s.scan_latest(&empty).unwrap().is_none());

        let mut bad = snapshot();
        bad[5].high = bad[5].low - 1.0;
        assert!(s.scan_latest(&bad).is_err());
        assert_eq!(s.last_timestamp(), None);
    }
}
