//! Performance statistics over completed trades

use serde::{Deserialize, Serialize};

use crate::{backtest::Trade, Error, Factor, Ratio, Result};

/// Aggregate performance of a trade list.
///
/// `win_rate` and `max_drawdown` are fractions (0.0..=1.0); the `*_pct`
/// fields are percentages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    /// Gross profit / gross loss; 0.0 when there are no losing trades
    pub profit_factor: f64,
    pub net_profit: f64,
    pub net_profit_pct: f64,
    /// Largest peak-to-trough decline of the capital curve, relative to the peak
    pub max_drawdown: f64,
    pub avg_win: f64,
    /// Mean of losing pnl amounts (negative)
    pub avg_loss: f64,
    pub avg_risk_reward: f64,
    pub final_capital: f64,
}

impl Statistics {
    /// `None` when `trades` is empty.
    ///
    /// The capital curve starts at `initial_capital` and accumulates each
    /// trade's pnl in order.
    pub fn compute(initial_capital: f64, trades: &[Trade]) -> Option<Self> {
        if trades.is_empty() {
            return None;
        }

        let (mut gross_profit, mut gross_loss) = (0.0, 0.0);
        let (mut wins, mut losses) = (0usize, 0usize);
        let mut capital = initial_capital;
        let mut peak = initial_capital;
        let mut max_drawdown: f64 = 0.0;

        for t in trades {
            if t.pnl_amount > 0.0 {
                wins += 1;
                gross_profit += t.pnl_amount;
            } else if t.pnl_amount < 0.0 {
                losses += 1;
                gross_loss += -t.pnl_amount;
            }

            capital += t.pnl_amount;
            peak = peak.max(capital);
            if peak > 0.0 {
                max_drawdown = max_drawdown.max((peak - capital) / peak);
            }
        }

        let total = trades.len();
        let net_profit = capital - initial_capital;
        Some(Self {
            total_trades: total,
            winning_trades: wins,
            losing_trades: losses,
            win_rate: wins as f64 / total as f64,
            profit_factor: if gross_loss > 0.0 {
                gross_profit / gross_loss
            } else {
                0.0
            },
            net_profit,
            net_profit_pct: if initial_capital > 0.0 {
                net_profit / initial_capital * 100.0
            } else {
                0.0
            },
            max_drawdown,
            avg_win: if wins > 0 { gross_profit / wins as f64 } else { 0.0 },
            avg_loss: if losses > 0 {
                -gross_loss / losses as f64
            } else {
                0.0
            },
            avg_risk_reward: trades.iter().map(|t| t.risk_reward).sum::<f64>() / total as f64,
            final_capital: capital,
        })
    }

    pub fn win_rate_pct(&self) -> f64 {
        self.win_rate * 100.0
    }

    pub fn max_drawdown_pct(&self) -> f64 {
        self.max_drawdown * 100.0
    }
}

/// Thresholds a pattern kind must meet to be approved for live use
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalCriteria {
    pub min_trades: usize,
    pub min_win_rate: Ratio,
    pub min_profit_factor: Factor,
}

impl Default for ApprovalCriteria {
    fn default() -> Self {
        Self {
            min_trades: 20,
            min_win_rate: Ratio::new_const(0.6),
            min_profit_factor: Factor::new_const(1.3),
        }
    }
}

impl ApprovalCriteria {
    pub fn validate(&self) -> Result<()> {
        if self.min_trades == 0 {
            return Err(Error::InvalidConfig("min_trades must be >= 1".to_string()));
        }
        Ok(())
    }

    pub fn is_approved(&self, stats: &Statistics) -> bool {
        stats.total_trades >= self.min_trades
            && stats.win_rate >= self.min_win_rate.get()
            && stats.profit_factor >= self.min_profit_factor.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{ExitReason, TradeSide};

    fn trade(pnl: f64) -> Trade {
        Trade {
            kind: None,
            side: TradeSide::Long,
            entry_index: 0,
            exit_index: 1,
            entry_time: 0,
            exit_time: 1,
            entry_price: 100.0,
            exit_price: 100.0,
            stop_loss: 98.0,
            take_profit: 104.0,
            position_size: 1.0,
            exit_reason: ExitReason::Timeout,
            pnl_amount: pnl,
            pnl_percent: pnl / 100.0,
            capital_after: 0.0,
            risk_reward: 2.0,
            features: None,
        }
    }

    #[test]
    fn test_empty_is_none() {
        assert!(Statistics::compute(10_000.0, &[]).is_none());
    }

    #[test]
    fn test_counts_and_averages() {
        let trades = [trade(100.0), trade(-50.0), trade(200.0), trade(0.0)];
        let s = Statistics::compute(10_000.0, &trades).unwrap();
        assert_eq!(s.total_trades, 4);
        assert_eq!(s.winning_trades, 2);
        // Breakeven is neither a win nor a loss
        assert_eq!(s.losing_trades, 1);
        assert!((s.win_rate - 0.5).abs() < 1e-12);
        assert!((s.profit_factor - 6.0).abs() < 1e-12);
        assert!((s.avg_win - 150.0).abs() < 1e-12);
        assert!((s.avg_loss + 50.0).abs() < 1e-12);
        assert!((s.net_profit - 250.0).abs() < 1e-9);
        assert!((s.net_profit_pct - 2.5).abs() < 1e-9);
        assert!((s.final_capital - 10_250.0).abs() < 1e-9);
        assert!((s.avg_risk_reward - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_profit_factor_zero_without_losses() {
        let s = Statistics::compute(10_000.0, &[trade(10.0), trade(20.0)]).unwrap();
        assert_eq!(s.profit_factor, 0.0);
        assert_eq!(s.avg_loss, 0.0);
    }

    #[test]
    fn test_max_drawdown_from_peak() {
        // 10000 -> 11000 (peak) -> 9900 -> 10400
        let trades = [trade(1_000.0), trade(-1_100.0), trade(500.0)];
        let s = Statistics::compute(10_000.0, &trades).unwrap();
        assert!((s.max_drawdown - 0.1).abs() < 1e-12);
        assert!((s.max_drawdown_pct() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_drawdown_counts_first_trade_loss() {
        let s = Statistics::compute(10_000.0, &[trade(-500.0)]).unwrap();
        assert!((s.max_drawdown - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_approval() {
        let criteria = ApprovalCriteria::default();
        let mut trades: Vec<Trade> = (0..14).map(|_| trade(30.0)).collect();
        trades.extend((0..6).map(|_| trade(-20.0)));
        let s = Statistics::compute(10_000.0, &trades).unwrap();
        // 70% wins, PF 420 / 120 = 3.5
        assert!(criteria.is_approved(&s));

        let few = Statistics::compute(10_000.0, &trades[..10]).unwrap();
        assert!(!criteria.is_approved(&few));
    }
}
