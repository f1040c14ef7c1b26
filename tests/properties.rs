//! Property tests for the simulation ledger, statistics, and detectors.

use chartscan::{
    backtest::{BacktestConfig, BacktestEngine, ExitReason, Trade, TradeSetup, TradeSide},
    detectors::EngulfingDetector,
    levels::{cluster_levels, cluster_weighted},
    Candle, PatternDetector, Statistics,
};
use proptest::prelude::*;

fn bars_strategy() -> impl Strategy<Value = Vec<Candle>> {
    prop::collection::vec((-2.0f64..2.0, 0.05f64..2.0, 0.05f64..2.0), 25..80).prop_map(|steps| {
        let mut price = 100.0;
        steps
            .into_iter()
            .enumerate()
            .map(|(i, (delta, up, down))| {
                let o = price;
                let c = (price + delta).max(5.0);
                price = c;
                Candle::new(i as i64, o, o.max(c) + up, o.min(c) - down, c, 1000.0)
            })
            .collect()
    })
}

fn side_strategy() -> impl Strategy<Value = TradeSide> {
    prop_oneof![Just(TradeSide::Long), Just(TradeSide::Short)]
}

fn setup_at(bars: &[Candle], entry: usize, side: TradeSide, risk: f64, rr: f64) -> TradeSetup {
    let price = bars[entry].close;
    let stop = price - side.sign() * risk;
    let target = price + side.sign() * risk * rr;
    TradeSetup::new(side, entry, price, stop, target).unwrap()
}

fn stop_hit(side: TradeSide, bar: &Candle, stop: f64) -> bool {
    match side {
        TradeSide::Long => bar.low <= stop,
        TradeSide::Short => bar.high >= stop,
    }
}

fn target_hit(side: TradeSide, bar: &Candle, target: f64) -> bool {
    match side {
        TradeSide::Long => bar.high >= target,
        TradeSide::Short => bar.low <= target,
    }
}

proptest! {
    #[test]
    fn position_size_stays_within_bounds(
        capital in 100.0f64..1_000_000.0,
        entry in 1.0f64..1_000.0,
        offset in -50.0f64..50.0,
    ) {
        let config = BacktestConfig { initial_capital: capital, ..Default::default() };
        let engine = BacktestEngine::new(config).unwrap();
        match engine.position_size(entry, entry + offset) {
            Some(size) => prop_assert!((0.01..=10.0).contains(&size)),
            None => prop_assert_eq!(entry + offset, entry),
        }
    }

    #[test]
    fn first_exit_wins_and_stop_precedes_target(
        bars in bars_strategy(),
        entry_frac in 0.0f64..1.0,
        side in side_strategy(),
        risk in 0.2f64..4.0,
        rr in 0.5f64..4.0,
    ) {
        let entry = ((bars.len() - 1) as f64 * entry_frac) as usize;
        prop_assume!(entry < bars.len() - 1);
        let setup = setup_at(&bars, entry, side, risk, rr);
        let mut engine = BacktestEngine::new(BacktestConfig::default()).unwrap();
        let trade = *engine.simulate(&bars, &setup).unwrap();

        let horizon = (entry + 20).min(bars.len() - 1);
        prop_assert!(trade.exit_index > entry && trade.exit_index <= horizon);
        for bar in &bars[entry + 1..trade.exit_index] {
            prop_assert!(!stop_hit(side, bar, setup.stop_loss));
            prop_assert!(!target_hit(side, bar, setup.take_profit));
        }

        let exit_bar = &bars[trade.exit_index];
        match trade.exit_reason {
            ExitReason::StopLoss => {
                prop_assert!(stop_hit(side, exit_bar, setup.stop_loss));
                prop_assert_eq!(trade.exit_price, setup.stop_loss);
            }
            ExitReason::TakeProfit => {
                prop_assert!(!stop_hit(side, exit_bar, setup.stop_loss));
                prop_assert_eq!(trade.exit_price, setup.take_profit);
            }
            ExitReason::Timeout => {
                prop_assert_eq!(trade.exit_index, horizon);
                prop_assert_eq!(trade.exit_price, exit_bar.close);
            }
        }
    }

    #[test]
    fn capital_after_chains(
        bars in bars_strategy(),
        side in side_strategy(),
        risk in 0.2f64..4.0,
    ) {
        let mut engine = BacktestEngine::new(BacktestConfig::default()).unwrap();
        let mut entry = 0;
        while entry < bars.len() - 1 {
            let setup = setup_at(&bars, entry, side, risk, 2.0);
            let exit = engine.simulate(&bars, &setup).unwrap().exit_index;
            entry = exit + 1;
        }

        let mut capital = 10_000.0;
        for t in engine.trades() {
            capital += t.pnl_amount;
            prop_assert!((t.capital_after - capital).abs() < 1e-6);
            prop_assert!((t.pnl_percent - t.pnl_amount / 100.0).abs() < 1e-9);
        }
        prop_assert!((engine.state().current_capital - capital).abs() < 1e-6);
    }

    #[test]
    fn statistics_are_consistent(pnls in prop::collection::vec(-100.0f64..100.0, 1..60)) {
        let trades: Vec<Trade> = pnls
            .iter()
            .enumerate()
            .map(|(i, &pnl)| Trade {
                kind: None,
                side: TradeSide::Long,
                entry_index: i * 2,
                exit_index: i * 2 + 1,
                entry_time: i as i64,
                exit_time: i as i64 + 1,
                entry_price: 100.0,
                exit_price: 100.0,
                stop_loss: 99.0,
                take_profit: 102.0,
                position_size: 1.0,
                exit_reason: ExitReason::Timeout,
                pnl_amount: pnl,
                pnl_percent: pnl / 100.0,
                capital_after: 0.0,
                risk_reward: 2.0,
                features: None,
            })
            .collect();
        let s = Statistics::compute(10_000.0, &trades).unwrap();
        prop_assert_eq!(s.total_trades, trades.len());
        prop_assert!(s.winning_trades + s.losing_trades <= s.total_trades);
        prop_assert!((0.0..=1.0).contains(&s.win_rate));
        prop_assert!((0.0..1.0).contains(&s.max_drawdown));
        prop_assert!(s.profit_factor >= 0.0);
        prop_assert!(s.avg_loss <= 0.0 && s.avg_win >= 0.0);
        let sum: f64 = pnls.iter().sum();
        prop_assert!((s.final_capital - (10_000.0 + sum)).abs() < 1e-6);
    }

    #[test]
    fn engulfing_is_mirror_symmetric(
        prev_open in 50i32..150,
        prev_close in 50i32..150,
        curr_open in 50i32..150,
        curr_close in 50i32..150,
    ) {
        let candle = |t: i64, o: i32, c: i32| {
            let (o, c) = (o as f64, c as f64);
            Candle::new(t, o, o.max(c) + 1.0, o.min(c) - 1.0, c, 1000.0)
        };
        let mirror = |b: &Candle| Candle::new(
            b.timestamp, 200.0 - b.open, 200.0 - b.low, 200.0 - b.high, 200.0 - b.close, b.volume,
        );

        let bars = [candle(0, prev_open, prev_close), candle(1, curr_open, curr_close)];
        let mirrored = [mirror(&bars[0]), mirror(&bars[1])];
        let detector = EngulfingDetector::default();

        let original = detector.detect(&bars, &[], 1);
        let reflected = detector.detect(&mirrored, &[], 1);
        prop_assert_eq!(original.is_some(), reflected.is_some());
        if let (Some(a), Some(b)) = (original, reflected) {
            prop_assert_eq!(a.direction, b.direction.opposite());
            prop_assert_eq!(a.strength, b.strength);
        }
    }

    #[test]
    fn reclustering_levels_is_stable(
        prices in prop::collection::vec(50.0f64..150.0, 0..60),
        tolerance in 0.05f64..1.0,
    ) {
        let levels = cluster_levels(&prices, tolerance);
        for pair in levels.windows(2) {
            prop_assert!(pair[0].price < pair[1].price);
        }
        prop_assert!(levels.iter().all(|l| l.touches >= 2));

        let weighted: Vec<(f64, usize)> = levels.iter().map(|l| (l.price, l.touches)).collect();
        let again = cluster_weighted(&weighted, tolerance);
        prop_assert_eq!(again.len(), levels.len());
        for (a, b) in again.iter().zip(&levels) {
            prop_assert_eq!(a.touches, b.touches);
            prop_assert!((a.price - b.price).abs() < 1e-9);
        }
    }
}
