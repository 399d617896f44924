use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{SessionSource, SlotClock};
use crate::error::TradingError;
use crate::execution::{PositionLedger, SettlementRecord};
use crate::models::{Outcome, Session, SessionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotatorState {
    NoActiveSession,
    Active,
    /// No tradable window, but an ended session is waiting to be settled
    AwaitingSettlement,
}

/// What one `rotate` call did
#[derive(Debug, Default)]
pub struct RotationOutcome {
    pub settled: Vec<SettlementRecord>,
    /// Sessions closed by this call
    pub settled_sessions: Vec<String>,
    /// Slot claimed by this call
    pub claimed_slot: Option<DateTime<Utc>>,
    /// Close price of the claimed slot's session, if one was held
    pub final_price: Option<Decimal>,
    /// Session acquired by this call
    pub acquired: Option<String>,
    /// Settlement was due but could not run (a close price is still unknown)
    pub settlement_error: Option<TradingError>,
    pub acquisition_error: Option<TradingError>,
}

impl RotationOutcome {
    pub fn is_noop(&self) -> bool {
        self.claimed_slot.is_none()
            && self.acquired.is_none()
            && self.settlement_error.is_none()
            && self.acquisition_error.is_none()
    }
}

/// Settles closed windows exactly once and keeps the current window acquired
///
/// `last_claimed_slot` only moves forward; a window at or before it is never
/// settled again.
pub struct SessionRotator {
    clock: SlotClock,
    settlement_delay: Duration,
    last_claimed_slot: Option<DateTime<Utc>>,
    sessions: BTreeMap<DateTime<Utc>, Session>,
    ledger: Arc<Mutex<PositionLedger>>,
}

impl SessionRotator {
    pub fn new(
        clock: SlotClock,
        settlement_delay: Duration,
        ledger: Arc<Mutex<PositionLedger>>,
    ) -> Result<Self, TradingError> {
        // The claim for the previous window must fall inside the current one
        if settlement_delay < clock.width() || settlement_delay >= clock.width() * 2 {
            return Err(TradingError::InvalidInput(format!(
                "settlement delay {}s must be in [{}s, {}s)",
                settlement_delay.num_seconds(),
                clock.width().num_seconds(),
                (clock.width() * 2).num_seconds()
            )));
        }

        Ok(Self {
            clock,
            settlement_delay,
            last_claimed_slot: None,
            sessions: BTreeMap::new(),
            ledger,
        })
    }

    pub fn clock(&self) -> &SlotClock {
        &self.clock
    }

    pub fn settlement_delay(&self) -> Duration {
        self.settlement_delay
    }

    pub fn last_claimed_slot(&self) -> Option<DateTime<Utc>> {
        self.last_claimed_slot
    }

    /// Seed the claim guard from a checkpoint. Never moves it backwards.
    pub fn restore_last_claimed_slot(&mut self, slot: DateTime<Utc>) {
        match self.last_claimed_slot {
            Some(current) if current >= slot => {
                tracing::warn!(%slot, %current, "Ignoring stale claimed slot");
            }
            _ => {
                tracing::info!(%slot, "Restored last claimed slot");
                self.last_claimed_slot = Some(slot);
            }
        }
    }

    /// Re-hold sessions from a checkpoint. Windows at or before the claimed
    /// slot, misaligned windows and already held windows are skipped.
    pub fn restore_sessions(&mut self, sessions: Vec<Session>) -> usize {
        let mut restored = 0;
        for session in sessions {
            let ws = session.window_start;
            if self.clock.window_start(ws) != ws {
                tracing::warn!(session = %session.id, "Ignoring restored session off the window grid");
                continue;
            }
            if self.last_claimed_slot.is_some_and(|claimed| ws <= claimed) {
                continue;
            }
            if self.sessions.contains_key(&ws) {
                continue;
            }
            tracing::info!(session = %session.id, status = ?session.status, "Restored session");
            self.sessions.insert(ws, session);
            restored += 1;
        }
        restored
    }

    /// Sessions not yet settled, oldest first
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// The session covering `now`, if it is still tradable
    pub fn active_session(&self, now: DateTime<Utc>) -> Option<&Session> {
        self.sessions
            .get(&self.clock.window_start(now))
            .filter(|s| s.status == SessionStatus::Active)
    }

    pub fn state(&self, now: DateTime<Utc>) -> RotatorState {
        if self.active_session(now).is_some() {
            RotatorState::Active
        } else if self.sessions.keys().any(|ws| *ws + self.clock.width() <= now) {
            RotatorState::AwaitingSettlement
        } else {
            RotatorState::NoActiveSession
        }
    }

    fn lock_ledger(&self) -> Result<MutexGuard<'_, PositionLedger>, TradingError> {
        self.ledger
            .lock()
            .map_err(|_| TradingError::LedgerCorruption("ledger lock poisoned".to_string()))
    }

    /// Advance the state machine to `now`
    ///
    /// Only `LedgerCorruption` is returned as an error; upstream failures are
    /// reported in the outcome and retried on the next call.
    pub async fn rotate(
        &mut self,
        now: DateTime<Utc>,
        sessions: &dyn SessionSource,
    ) -> Result<RotationOutcome, TradingError> {
        let width = self.clock.width();
        let current = self.clock.window_start(now);
        let previous = current - width;
        let claim_trigger = previous + self.settlement_delay;

        // Anything at or before the claimed slot can never settle again
        if let Some(claimed) = self.last_claimed_slot {
            let stale: Vec<DateTime<Utc>> = self.sessions.range(..=claimed).map(|(ws, _)| *ws).collect();
            for ws in stale {
                if let Some(session) = self.sessions.remove(&ws) {
                    tracing::warn!(session = %session.id, "Dropping session behind claimed slot");
                }
            }
        }

        self.observe_closes(now, sessions).await;

        let mut outcome = RotationOutcome::default();

        let claim_due = now >= claim_trigger && self.last_claimed_slot.map_or(true, |s| s < previous);
        if claim_due {
            match self.first_unresolved(previous) {
                Some(session_id) => {
                    tracing::warn!(
                        slot = %previous,
                        session = %session_id,
                        "Close price unknown, settlement deferred"
                    );
                    outcome.settlement_error = Some(TradingError::Unavailable(format!(
                        "close price for {} not yet known",
                        session_id
                    )));
                }
                None => {
                    let final_price = self.sessions.get(&previous).and_then(|s| s.close_price());
                    let (records, settled) = self.settle_through(previous, now)?;
                    self.last_claimed_slot = Some(previous);
                    tracing::info!(
                        slot = %previous,
                        final_price = ?final_price,
                        positions = records.len(),
                        "🏁 Claimed slot"
                    );
                    outcome.settled = records;
                    outcome.settled_sessions = settled;
                    outcome.claimed_slot = Some(previous);
                    outcome.final_price = final_price;
                }
            }
        }

        match self.sessions.get(&current) {
            None => self.acquire(current, sessions, &mut outcome).await,
            Some(session) if session.reference_price().is_none() => {
                let session = session.clone();
                match sessions.fetch_reference_price(&session).await {
                    Ok(price) => {
                        if let Some(held) = self.sessions.get_mut(&current) {
                            if held.set_reference_price(price) {
                                tracing::info!(session = %held.id, reference = %price, "Reference price set");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(session = %session.id, "Reference price still unavailable: {}", e);
                    }
                }
            }
            Some(_) => {}
        }

        Ok(outcome)
    }

    /// Move ended sessions to Settling and record each one's close price
    async fn observe_closes(&mut self, now: DateTime<Utc>, sessions: &dyn SessionSource) {
        let width = self.clock.width();
        let ended: Vec<DateTime<Utc>> = self
            .sessions
            .iter()
            .filter(|(ws, s)| **ws + width <= now && s.close_price().is_none())
            .map(|(ws, _)| *ws)
            .collect();

        for ws in ended {
            let snapshot = match self.sessions.get_mut(&ws) {
                Some(session) => {
                    if session.status == SessionStatus::Active {
                        tracing::info!(session = %session.id, "Window closed, awaiting settlement");
                        session.status = SessionStatus::Settling;
                    }
                    session.clone()
                }
                None => continue,
            };

            match sessions.fetch_final_price(&snapshot).await {
                Ok(price) => {
                    if let Some(held) = self.sessions.get_mut(&ws) {
                        if held.set_close_price(price) {
                            tracing::info!(session = %held.id, close = %price, "Close price recorded");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(session = %snapshot.id, "Close price unavailable: {}", e);
                }
            }
        }
    }

    /// First session due through `through` that has a reference but no close
    fn first_unresolved(&self, through: DateTime<Utc>) -> Option<String> {
        let lower = self.last_claimed_slot;
        self.sessions
            .range(..=through)
            .filter(|(ws, _)| lower.map_or(true, |l| **ws > l))
            .find(|(_, s)| s.reference_price().is_some() && s.close_price().is_none())
            .map(|(_, s)| s.id.clone())
    }

    async fn acquire(
        &mut self,
        window_start: DateTime<Utc>,
        sessions: &dyn SessionSource,
        outcome: &mut RotationOutcome,
    ) {
        let result = sessions.acquire_next(window_start).await.and_then(|session| {
            if session.window_start == window_start {
                Ok(session)
            } else {
                Err(TradingError::InvalidInput(format!(
                    "session {} starts at {}, expected {}",
                    session.id, session.window_start, window_start
                )))
            }
        });

        match result {
            Ok(mut session) => {
                session.status = SessionStatus::Active;
                tracing::info!(
                    session = %session.id,
                    reference = ?session.reference_price(),
                    "🔄 Acquired session"
                );
                outcome.acquired = Some(session.id.clone());
                self.sessions.insert(window_start, session);
            }
            Err(e) => {
                tracing::error!(%window_start, "Session acquisition failed: {}", e);
                outcome.acquisition_error = Some(e);
            }
        }
    }

    /// Settle every held session in `(last_claimed_slot, through]`
    fn settle_through(
        &mut self,
        through: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(Vec<SettlementRecord>, Vec<String>), TradingError> {
        let lower = self.last_claimed_slot;
        let due: Vec<DateTime<Utc>> = self
            .sessions
            .range(..=through)
            .map(|(ws, _)| *ws)
            .filter(|ws| lower.map_or(true, |l| *ws > l))
            .collect();

        let mut records = Vec::new();
        let mut settled = Vec::with_capacity(due.len());
        for ws in due {
            let Some(mut session) = self.sessions.remove(&ws) else {
                continue;
            };

            let mut ledger = self.lock_ledger()?;
            let batch = match (session.reference_price(), session.close_price()) {
                (Some(reference), Some(close)) => ledger.settle(&session.id, close, reference, now)?,
                _ => {
                    tracing::error!(
                        session = %session.id,
                        "Settling without a reference or close price, refunding as a tie"
                    );
                    ledger.settle_with_outcome(&session.id, Outcome::Tie, now)?
                }
            };
            drop(ledger);

            session.status = SessionStatus::Settled;
            records.extend(batch);
            settled.push(session.id);
        }

        Ok((records, settled))
    }
}
