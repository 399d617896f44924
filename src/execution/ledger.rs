use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

use crate::error::TradingError;
use crate::models::{Direction, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Where a fill came from, which decides who accounts for the stake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOrigin {
    /// Locally simulated execution - the ledger deducts the stake itself
    Simulated,
    /// Confirmed by a live backend - cash is reconciled via `sync_balance`
    Confirmed,
}

/// Settled sessions and closed positions kept in memory
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub session_id: String,
    pub direction: Direction,
    pub shares: Decimal,
    pub entry_price: Decimal,
    pub stake: Decimal,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
    pub realized_pnl: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Result of settling one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub position_id: Uuid,
    pub session_id: String,
    pub direction: Direction,
    pub outcome: Outcome,
    pub shares: Decimal,
    pub entry_price: Decimal,
    pub stake: Decimal,
    /// Amount credited back to cash (0 for a loss)
    pub payout: Decimal,
    pub profit: Decimal,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub cash_balance: Decimal,
    pub open_positions: usize,
    pub open_stake: Decimal,
    pub realized_pnl: Decimal,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
}

/// Ledger state carried across a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub cash_balance: Decimal,
    pub realized_pnl: Decimal,
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub losses: u32,
    #[serde(default)]
    pub ties: u32,
    /// Stake of these is already out of `cash_balance` for simulated fills
    #[serde(default)]
    pub open_positions: Vec<Position>,
}

/// Cash balance and positions. The only writer of either.
///
/// Closed positions and settled session ids are bounded by the history
/// limit; older entries only survive in the audit trail. The rotator's
/// claimed slot keeps evicted sessions from settling again.
pub struct PositionLedger {
    cash_balance: Decimal,
    open: Vec<Position>,
    closed: Vec<Position>,
    settled_sessions: HashSet<String>,
    settled_order: VecDeque<String>,
    history_limit: usize,
    realized_pnl: Decimal,
    wins: u32,
    losses: u32,
    ties: u32,
}

impl PositionLedger {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            cash_balance: initial_balance,
            open: Vec::new(),
            closed: Vec::new(),
            settled_sessions: HashSet::new(),
            settled_order: VecDeque::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            realized_pnl: Decimal::ZERO,
            wins: 0,
            losses: 0,
            ties: 0,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn cash_balance(&self) -> Decimal {
        self.cash_balance
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    pub fn open_positions(&self) -> &[Position] {
        &self.open
    }

    pub fn closed_positions(&self) -> &[Position] {
        &self.closed
    }

    pub fn open_positions_for(&self, session_id: &str) -> Vec<&Position> {
        self.open
            .iter()
            .filter(|p| p.session_id == session_id)
            .collect()
    }

    pub fn is_settled(&self, session_id: &str) -> bool {
        self.settled_sessions.contains(session_id)
    }

    /// Record a fill as a new open position
    ///
    /// Simulated fills deduct the stake here; confirmed fills leave cash to
    /// the backend's reported balance so the stake is never counted twice.
    pub fn apply_fill(
        &mut self,
        session_id: &str,
        direction: Direction,
        price: Decimal,
        stake: Decimal,
        origin: FillOrigin,
        now: DateTime<Utc>,
    ) -> Result<Uuid, TradingError> {
        if price <= Decimal::ZERO {
            return Err(TradingError::InvalidPrice(price));
        }
        if stake <= Decimal::ZERO {
            return Err(TradingError::InvalidInput(format!(
                "stake must be positive, got {}",
                stake
            )));
        }
        if self.settled_sessions.contains(session_id) {
            return Err(TradingError::InvalidInput(format!(
                "session {} already settled",
                session_id
            )));
        }
        if origin == FillOrigin::Simulated && stake > self.cash_balance {
            return Err(TradingError::InvalidInput(format!(
                "stake {} exceeds cash balance {}",
                stake, self.cash_balance
            )));
        }

        let shares = stake / price;
        let id = Uuid::new_v4();

        if origin == FillOrigin::Simulated {
            self.cash_balance -= stake;
        }

        self.open.push(Position {
            id,
            session_id: session_id.to_string(),
            direction,
            shares,
            entry_price: price,
            stake,
            opened_at: now,
            status: PositionStatus::Open,
            realized_pnl: None,
            closed_at: None,
        });

        tracing::info!(
            session = %session_id,
            direction = %direction,
            price = %price,
            stake = %stake,
            shares = %shares,
            "Position opened"
        );

        Ok(id)
    }

    /// Replace cash with the balance reported by a live backend
    pub fn sync_balance(&mut self, balance: Decimal) {
        if balance != self.cash_balance {
            tracing::debug!(old = %self.cash_balance, new = %balance, "Cash balance reconciled");
        }
        self.cash_balance = balance;
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            cash_balance: self.cash_balance,
            realized_pnl: self.realized_pnl,
            wins: self.wins,
            losses: self.losses,
            ties: self.ties,
            open_positions: self.open.clone(),
        }
    }

    /// Resume from a snapshot. Only allowed before any position exists.
    pub fn restore(&mut self, snapshot: LedgerSnapshot) -> Result<(), TradingError> {
        if !self.open.is_empty() || !self.closed.is_empty() {
            return Err(TradingError::InvalidInput(
                "cannot restore a ledger that already holds positions".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        for position in &snapshot.open_positions {
            if position.status != PositionStatus::Open {
                return Err(TradingError::InvalidInput(format!(
                    "restored position {} is not open",
                    position.id
                )));
            }
            if position.stake <= Decimal::ZERO || position.entry_price <= Decimal::ZERO {
                return Err(TradingError::InvalidInput(format!(
                    "restored position {} has non-positive stake or price",
                    position.id
                )));
            }
            if !ids.insert(position.id) {
                return Err(TradingError::InvalidInput(format!(
                    "restored position {} appears twice",
                    position.id
                )));
            }
        }

        self.cash_balance = snapshot.cash_balance;
        self.realized_pnl = snapshot.realized_pnl;
        self.wins = snapshot.wins;
        self.losses = snapshot.losses;
        self.ties = snapshot.ties;
        self.open = snapshot.open_positions;

        tracing::info!(
            cash = %self.cash_balance,
            pnl = %self.realized_pnl,
            open = self.open.len(),
            "Ledger restored"
        );
        Ok(())
    }

    /// Settle every open position of `session_id` against the window outcome
    pub fn settle(
        &mut self,
        session_id: &str,
        final_price: Decimal,
        reference_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Vec<SettlementRecord>, TradingError> {
        let outcome = Outcome::resolve(final_price, reference_price);
        self.settle_with_outcome(session_id, outcome, now)
    }

    /// Settle with an already-resolved outcome
    pub fn settle_with_outcome(
        &mut self,
        session_id: &str,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<Vec<SettlementRecord>, TradingError> {
        if !self.settled_sessions.insert(session_id.to_string()) {
            return Err(TradingError::LedgerCorruption(format!(
                "session {} settled twice",
                session_id
            )));
        }
        self.settled_order.push_back(session_id.to_string());
        while self.settled_order.len() > self.history_limit {
            if let Some(evicted) = self.settled_order.pop_front() {
                self.settled_sessions.remove(&evicted);
            }
        }

        // Snapshot the session's positions out of the open set before touching balances
        let (to_settle, remaining): (Vec<Position>, Vec<Position>) = std::mem::take(&mut self.open)
            .into_iter()
            .partition(|p| p.session_id == session_id);
        self.open = remaining;

        let mut records = Vec::with_capacity(to_settle.len());
        for mut position in to_settle {
            if position.status != PositionStatus::Open {
                return Err(TradingError::LedgerCorruption(format!(
                    "position {} in open set with status {:?}",
                    position.id, position.status
                )));
            }

            let (payout, profit) = match outcome.winner() {
                None => {
                    self.ties += 1;
                    (position.stake, Decimal::ZERO)
                }
                Some(winner) if winner == position.direction => {
                    self.wins += 1;
                    let profit = position.shares - position.stake;
                    (position.stake + profit, profit)
                }
                Some(_) => {
                    self.losses += 1;
                    (Decimal::ZERO, -position.stake)
                }
            };

            self.cash_balance += payout;
            self.realized_pnl += profit;

            position.status = PositionStatus::Closed;
            position.realized_pnl = Some(profit);
            position.closed_at = Some(now);

            tracing::info!(
                session = %session_id,
                direction = %position.direction,
                outcome = %outcome,
                stake = %position.stake,
                profit = %profit,
                "Position settled"
            );

            records.push(SettlementRecord {
                position_id: position.id,
                session_id: session_id.to_string(),
                direction: position.direction,
                outcome,
                shares: position.shares,
                entry_price: position.entry_price,
                stake: position.stake,
                payout,
                profit,
                settled_at: now,
            });
            self.closed.push(position);
        }

        if self.closed.len() > self.history_limit {
            let excess = self.closed.len() - self.history_limit;
            self.closed.drain(..excess);
        }

        Ok(records)
    }

    /// Total stake tied up in open positions
    pub fn open_stake(&self) -> Decimal {
        self.open.iter().map(|p| p.stake).sum()
    }

    /// Cash plus open positions valued at cost
    pub fn equity(&self) -> Decimal {
        self.cash_balance + self.open_stake()
    }

    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            cash_balance: self.cash_balance,
            open_positions: self.open.len(),
            open_stake: self.open_stake(),
            realized_pnl: self.realized_pnl,
            wins: self.wins,
            losses: self.losses,
            ties: self.ties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SESSION: &str = "btc-updown-15m-1700000100";

    fn ledger_with_up_position() -> PositionLedger {
        let mut ledger = PositionLedger::new(dec!(1000));
        ledger
            .apply_fill(SESSION, Direction::Up, dec!(0.5), dec!(100), FillOrigin::Simulated, Utc::now())
            .unwrap();
        ledger
    }

    #[test]
    fn test_apply_fill_computes_shares_and_deducts() {
        let ledger = ledger_with_up_position();
        let position = &ledger.open_positions()[0];
        assert_eq!(position.shares, dec!(200));
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(ledger.cash_balance(), dec!(900));
    }

    #[test]
    fn test_confirmed_fill_does_not_deduct() {
        let mut ledger = PositionLedger::new(dec!(1000));
        ledger
            .apply_fill(SESSION, Direction::Down, dec!(0.4), dec!(100), FillOrigin::Confirmed, Utc::now())
            .unwrap();
        assert_eq!(ledger.cash_balance(), dec!(1000));

        // Backend reports the post-fill balance
        ledger.sync_balance(dec!(900));
        assert_eq!(ledger.cash_balance(), dec!(900));
        assert_eq!(ledger.open_positions()[0].shares, dec!(250));
    }

    #[test]
    fn test_invalid_fill_leaves_ledger_untouched() {
        let mut ledger = PositionLedger::new(dec!(1000));
        let err = ledger
            .apply_fill(SESSION, Direction::Up, dec!(0), dec!(100), FillOrigin::Simulated, Utc::now())
            .unwrap_err();
        assert_eq!(err, TradingError::InvalidPrice(dec!(0)));

        let err = ledger
            .apply_fill(SESSION, Direction::Up, dec!(-0.2), dec!(100), FillOrigin::Simulated, Utc::now())
            .unwrap_err();
        assert!(matches!(err, TradingError::InvalidPrice(_)));

        let err = ledger
            .apply_fill(SESSION, Direction::Up, dec!(0.5), dec!(5000), FillOrigin::Simulated, Utc::now())
            .unwrap_err();
        assert!(matches!(err, TradingError::InvalidInput(_)));

        assert_eq!(ledger.cash_balance(), dec!(1000));
        assert!(ledger.open_positions().is_empty());
    }

    #[test]
    fn test_settle_winning_up_position() {
        let mut ledger = ledger_with_up_position();
        let records = ledger
            .settle(SESSION, dec!(100050), dec!(100000), Utc::now())
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, Outcome::Up);
        assert_eq!(records[0].profit, dec!(100));
        assert_eq!(records[0].payout, dec!(200));
        // 900 after the fill, +200 payout
        assert_eq!(ledger.cash_balance(), dec!(1100));
        assert!(ledger.open_positions().is_empty());
        assert_eq!(ledger.closed_positions()[0].status, PositionStatus::Closed);
        assert_eq!(ledger.closed_positions()[0].realized_pnl, Some(dec!(100)));
    }

    #[test]
    fn test_settle_losing_up_position() {
        let mut ledger = ledger_with_up_position();
        let records = ledger
            .settle(SESSION, dec!(99950), dec!(100000), Utc::now())
            .unwrap();

        assert_eq!(records[0].outcome, Outcome::Down);
        assert_eq!(records[0].profit, dec!(-100));
        assert_eq!(records[0].payout, dec!(0));
        assert_eq!(ledger.cash_balance(), dec!(900));
        assert_eq!(ledger.realized_pnl(), dec!(-100));
    }

    #[test]
    fn test_tie_refunds_full_stake() {
        let mut ledger = ledger_with_up_position();
        let records = ledger
            .settle(SESSION, dec!(100000), dec!(100000), Utc::now())
            .unwrap();

        assert_eq!(records[0].outcome, Outcome::Tie);
        assert_eq!(records[0].profit, dec!(0));
        assert_eq!(records[0].payout, dec!(100));
        assert_eq!(ledger.cash_balance(), dec!(1000));
    }

    #[test]
    fn test_settlement_conserves_value() {
        let mut ledger = PositionLedger::new(dec!(10000));
        let now = Utc::now();
        ledger.apply_fill(SESSION, Direction::Up, dec!(0.5), dec!(100), FillOrigin::Simulated, now).unwrap();
        ledger.apply_fill(SESSION, Direction::Up, dec!(0.25), dec!(40), FillOrigin::Simulated, now).unwrap();
        ledger.apply_fill(SESSION, Direction::Down, dec!(0.6), dec!(60), FillOrigin::Simulated, now).unwrap();

        let records = ledger.settle(SESSION, dec!(101), dec!(100), now).unwrap();
        assert_eq!(records.len(), 3);

        let total_stake: Decimal = records.iter().map(|r| r.stake).sum();
        let total_payout: Decimal = records.iter().map(|r| r.payout).sum();
        let total_profit: Decimal = records.iter().map(|r| r.profit).sum();

        // Every unit of stake is either paid back or absorbed as a loss
        assert_eq!(total_payout - total_profit, total_stake);
        assert_eq!(ledger.cash_balance(), dec!(10000) + total_profit);
        assert_eq!(ledger.summary().wins, 2);
        assert_eq!(ledger.summary().losses, 1);
    }

    #[test]
    fn test_settle_only_touches_given_session() {
        let mut ledger = ledger_with_up_position();
        ledger
            .apply_fill("other", Direction::Down, dec!(0.5), dec!(50), FillOrigin::Simulated, Utc::now())
            .unwrap();

        ledger.settle(SESSION, dec!(1), dec!(2), Utc::now()).unwrap();
        assert_eq!(ledger.open_positions().len(), 1);
        assert_eq!(ledger.open_positions()[0].session_id, "other");
    }

    #[test]
    fn test_double_settlement_is_corruption() {
        let mut ledger = ledger_with_up_position();
        ledger.settle(SESSION, dec!(2), dec!(1), Utc::now()).unwrap();
        let balance = ledger.cash_balance();

        let err = ledger.settle(SESSION, dec!(2), dec!(1), Utc::now()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(ledger.cash_balance(), balance);
    }

    #[test]
    fn test_fill_into_settled_session_rejected() {
        let mut ledger = PositionLedger::new(dec!(1000));
        ledger.settle(SESSION, dec!(2), dec!(1), Utc::now()).unwrap();
        let result =
            ledger.apply_fill(SESSION, Direction::Up, dec!(0.5), dec!(10), FillOrigin::Simulated, Utc::now());
        assert!(result.is_err());
        assert_eq!(ledger.cash_balance(), dec!(1000));
    }

    #[test]
    fn test_summary_and_equity() {
        let ledger = ledger_with_up_position();
        let summary = ledger.summary();
        assert_eq!(summary.open_positions, 1);
        assert_eq!(summary.open_stake, dec!(100));
        assert_eq!(ledger.equity(), dec!(1000));
    }

    #[test]
    fn test_restore_only_on_empty_ledger() {
        let snapshot = LedgerSnapshot {
            cash_balance: dec!(1250),
            realized_pnl: dec!(250),
            wins: 3,
            losses: 1,
            ties: 0,
            open_positions: vec![],
        };

        let mut ledger = PositionLedger::new(dec!(1000));
        ledger.restore(snapshot.clone()).unwrap();
        assert_eq!(ledger.cash_balance(), dec!(1250));
        assert_eq!(ledger.realized_pnl(), dec!(250));
        assert_eq!(ledger.summary().wins, 3);
        assert_eq!(ledger.summary().losses, 1);

        let mut busy = ledger_with_up_position();
        assert!(busy.restore(snapshot).is_err());
        assert_eq!(busy.cash_balance(), dec!(900));
    }

    #[test]
    fn test_snapshot_restore_keeps_open_stake() {
        let before = ledger_with_up_position();
        let snapshot = before.snapshot();
        assert_eq!(snapshot.cash_balance, dec!(900));
        assert_eq!(snapshot.open_positions.len(), 1);

        let mut after = PositionLedger::new(dec!(0));
        after.restore(snapshot).unwrap();
        assert_eq!(after.equity(), dec!(1000));

        let records = after
            .settle(SESSION, dec!(100000), dec!(100000), Utc::now())
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(after.cash_balance(), dec!(1000));
    }

    #[test]
    fn test_restore_rejects_duplicate_or_closed_positions() {
        let mut snapshot = ledger_with_up_position().snapshot();
        snapshot.open_positions.push(snapshot.open_positions[0].clone());
        assert!(PositionLedger::new(dec!(0)).restore(snapshot).is_err());

        let mut snapshot = ledger_with_up_position().snapshot();
        snapshot.open_positions[0].status = PositionStatus::Closed;
        let mut ledger = PositionLedger::new(dec!(7));
        assert!(ledger.restore(snapshot).is_err());
        assert_eq!(ledger.cash_balance(), dec!(7));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut ledger = PositionLedger::new(dec!(1000)).with_history_limit(2);
        for session in ["s-1", "s-2", "s-3"] {
            ledger
                .apply_fill(session, Direction::Up, dec!(0.5), dec!(10), FillOrigin::Simulated, Utc::now())
                .unwrap();
            ledger.settle_with_outcome(session, Outcome::Up, Utc::now()).unwrap();
        }

        assert_eq!(ledger.closed_positions().len(), 2);
        assert_eq!(ledger.closed_positions()[0].session_id, "s-2");
        assert!(!ledger.is_settled("s-1"));
        assert!(ledger.is_settled("s-3"));
        assert_eq!(ledger.summary().wins, 3);
    }
}
