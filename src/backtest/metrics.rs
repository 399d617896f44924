use crate::execution::SettlementRecord;
use crate::models::Outcome;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Complete backtest performance metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    // P&L Metrics
    pub total_pnl: Decimal,
    pub total_return_pct: f64,
    pub initial_balance: Decimal,
    pub final_balance: Decimal,

    // Position Statistics
    pub total_positions: usize,
    pub winning_positions: usize,
    pub losing_positions: usize,
    pub tied_positions: usize,
    pub win_rate: f64,
    pub windows_traded: usize,

    // P&L Distribution
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub profit_factor: f64,

    // Risk Metrics
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,

    pub settlements: Vec<SettlementRecord>,
}

fn pct(part: Decimal, whole: Decimal) -> f64 {
    if whole.is_zero() {
        return 0.0;
    }
    (part / whole * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
}

impl BacktestMetrics {
    /// Calculate metrics from settlement records in settlement order
    pub fn from_settlements(
        settlements: Vec<SettlementRecord>,
        initial_balance: Decimal,
        final_balance: Decimal,
    ) -> Self {
        let total_positions = settlements.len();

        let wins: Vec<Decimal> = settlements
            .iter()
            .filter(|r| r.outcome != Outcome::Tie && r.profit > Decimal::ZERO)
            .map(|r| r.profit)
            .collect();
        let losses: Vec<Decimal> = settlements
            .iter()
            .filter(|r| r.profit < Decimal::ZERO)
            .map(|r| r.profit)
            .collect();
        let tied_positions = settlements.iter().filter(|r| r.outcome == Outcome::Tie).count();

        let total_pnl: Decimal = settlements.iter().map(|r| r.profit).sum();
        let total_wins: Decimal = wins.iter().sum();
        let total_losses: Decimal = losses.iter().map(|l| l.abs()).sum();

        let decided = wins.len() + losses.len();
        let win_rate = if decided > 0 {
            wins.len() as f64 / decided as f64 * 100.0
        } else {
            0.0
        };

        let avg_win = if wins.is_empty() {
            Decimal::ZERO
        } else {
            total_wins / Decimal::from(wins.len())
        };
        let avg_loss = if losses.is_empty() {
            Decimal::ZERO
        } else {
            total_losses / Decimal::from(losses.len())
        };

        let profit_factor = if total_losses > Decimal::ZERO {
            (total_wins / total_losses).to_f64().unwrap_or(0.0)
        } else if total_wins > Decimal::ZERO {
            f64::INFINITY
        } else {
            0.0
        };

        let windows_traded = settlements
            .iter()
            .map(|r| r.session_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let (max_drawdown, peak) = Self::calculate_drawdown(&settlements, initial_balance);

        Self {
            total_pnl,
            total_return_pct: pct(final_balance - initial_balance, initial_balance),
            initial_balance,
            final_balance,
            total_positions,
            winning_positions: wins.len(),
            losing_positions: losses.len(),
            tied_positions,
            win_rate,
            windows_traded,
            avg_win,
            avg_loss,
            largest_win: wins.iter().copied().max().unwrap_or(Decimal::ZERO),
            largest_loss: losses.iter().copied().min().unwrap_or(Decimal::ZERO),
            profit_factor,
            max_drawdown,
            max_drawdown_pct: pct(max_drawdown, peak),
            settlements,
        }
    }

    /// Largest peak-to-trough fall of realized equity, and the peak it fell from
    fn calculate_drawdown(settlements: &[SettlementRecord], initial: Decimal) -> (Decimal, Decimal) {
        let mut peak = initial;
        let mut peak_at_max = initial;
        let mut max_dd = Decimal::ZERO;
        let mut equity = initial;

        for record in settlements {
            equity += record.profit;
            if equity > peak {
                peak = equity;
            }
            let drawdown = peak - equity;
            if drawdown > max_dd {
                max_dd = drawdown;
                peak_at_max = peak;
            }
        }

        (max_dd, peak_at_max)
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║              BACKTEST PERFORMANCE REPORT              ║");
        println!("╚═══════════════════════════════════════════════════════╝\n");

        println!("📊 P&L SUMMARY");
        println!("  Initial Balance:       ${:.2}", self.initial_balance);
        println!("  Final Balance:         ${:.2}", self.final_balance);
        println!(
            "  Realized P&L:          ${:.2} ({:+.2}%)",
            self.total_pnl, self.total_return_pct
        );

        println!("\n📈 POSITION STATISTICS");
        println!("  Windows Traded:        {}", self.windows_traded);
        println!("  Positions Settled:     {}", self.total_positions);
        println!(
            "  Winning:               {} ({:.1}%)",
            self.winning_positions, self.win_rate
        );
        println!("  Losing:                {}", self.losing_positions);
        println!("  Ties (refunded):       {}", self.tied_positions);

        if self.total_positions > 0 {
            println!("\n💰 WIN/LOSS ANALYSIS");
            println!("  Average Win:           ${:.2}", self.avg_win);
            println!("  Average Loss:          ${:.2}", self.avg_loss);
            println!("  Largest Win:           ${:.2}", self.largest_win);
            println!("  Largest Loss:          ${:.2}", self.largest_loss);
            println!("  Profit Factor:         {:.2}", self.profit_factor);

            println!("\n⚠️  RISK METRICS");
            println!(
                "  Max Drawdown:          ${:.2} ({:.2}%)",
                self.max_drawdown, self.max_drawdown_pct
            );
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn settled(session: &str, outcome: Outcome, profit: Decimal) -> SettlementRecord {
        SettlementRecord {
            position_id: Uuid::new_v4(),
            session_id: session.to_string(),
            direction: Direction::Up,
            outcome,
            shares: dec!(200),
            entry_price: dec!(0.5),
            stake: dec!(100),
            payout: dec!(100) + profit,
            profit,
            settled_at: Utc::now(),
        }
    }

    #[test]
    fn test_metrics_from_mixed_settlements() {
        let records = vec![
            settled("a", Outcome::Up, dec!(100)),
            settled("b", Outcome::Down, dec!(-100)),
            settled("b", Outcome::Down, dec!(-50)),
            settled("c", Outcome::Tie, dec!(0)),
            settled("d", Outcome::Up, dec!(200)),
        ];

        let metrics = BacktestMetrics::from_settlements(records, dec!(1000), dec!(1150));

        assert_eq!(metrics.total_positions, 5);
        assert_eq!(metrics.winning_positions, 2);
        assert_eq!(metrics.losing_positions, 2);
        assert_eq!(metrics.tied_positions, 1);
        assert_eq!(metrics.windows_traded, 4);
        assert_eq!(metrics.total_pnl, dec!(150));
        assert_eq!(metrics.avg_win, dec!(150));
        assert_eq!(metrics.avg_loss, dec!(75));
        assert_eq!(metrics.largest_loss, dec!(-100));
        assert!((metrics.win_rate - 50.0).abs() < 1e-9);
        assert!((metrics.profit_factor - 2.0).abs() < 1e-9);
        assert!((metrics.total_return_pct - 15.0).abs() < 1e-9);
        // Peak 1100 after the first win, trough 950
        assert_eq!(metrics.max_drawdown, dec!(150));
    }

    #[test]
    fn test_empty_settlements() {
        let metrics = BacktestMetrics::from_settlements(vec![], dec!(1000), dec!(1000));
        assert_eq!(metrics.total_positions, 0);
        assert_eq!(metrics.win_rate, 0.0);
        assert_eq!(metrics.profit_factor, 0.0);
        assert_eq!(metrics.max_drawdown, Decimal::ZERO);
    }
}
