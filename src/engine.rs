use chrono::{DateTime, NaiveDate, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::api::PriceSource;
use crate::config::Settings;
use crate::error::TradingError;
use crate::execution::{
    LedgerSummary, OrderBackend, OrderExecutor, PositionLedger, ReapReport, SubmitOutcome,
};
use crate::models::MarketQuote;
use crate::persistence::Checkpoint;
use crate::session::{RotationOutcome, RotatorState, SessionRotator, SessionSource};
use crate::strategy::{MarketMakingStrategy, StrategyContext, StrategyRunner, TickReport};
use crate::telemetry::{AuditEvent, AuditSink, Notifier};

/// External collaborators the engine drives
#[derive(Clone)]
pub struct Collaborators {
    pub prices: Arc<dyn PriceSource>,
    pub sessions: Arc<dyn SessionSource>,
    pub backend: Arc<dyn OrderBackend>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn Notifier>,
}

/// What one tick did
#[derive(Debug)]
pub struct TickSummary {
    pub rotation: RotationOutcome,
    pub reap: ReapReport,
    pub quote: Option<MarketQuote>,
    /// None when no session was tradable
    pub strategy: Option<TickReport>,
    pub state: RotatorState,
}

impl TickSummary {
    /// Whether ledger or rotation state moved, so a checkpoint is worth saving
    pub fn ledger_changed(&self) -> bool {
        !self.rotation.is_noop()
            || self.reap.purged > 0
            || self.strategy.as_ref().is_some_and(|r| r.filled() > 0)
    }
}

/// One driving-loop iteration: rotate, reap, quote, run strategies
pub struct Engine {
    rotator: SessionRotator,
    runner: StrategyRunner,
    executor: OrderExecutor,
    ledger: Arc<Mutex<PositionLedger>>,
    prices: Arc<dyn PriceSource>,
    sessions: Arc<dyn SessionSource>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn Notifier>,
    last_equity_day: Option<NaiveDate>,
}

impl Engine {
    /// Build the engine with the market making strategy registered
    pub fn new(settings: &Settings, collaborators: Collaborators) -> anyhow::Result<Self> {
        let ledger = Arc::new(Mutex::new(PositionLedger::new(settings.account.initial_balance)));

        let rotator = SessionRotator::new(
            settings.slot_clock()?,
            settings.settlement_delay(),
            ledger.clone(),
        )?;
        let executor = OrderExecutor::new(
            collaborators.backend,
            settings.risk_gate(),
            ledger.clone(),
            settings.executor_config(),
        );

        let mut runner = StrategyRunner::new();
        runner.add_strategy(Box::new(MarketMakingStrategy::new(settings.strategy.clone())));

        Ok(Self {
            rotator,
            runner,
            executor,
            ledger,
            prices: collaborators.prices,
            sessions: collaborators.sessions,
            audit: collaborators.audit,
            notifier: collaborators.notifier,
            last_equity_day: None,
        })
    }

    /// Replace the registered strategies
    pub fn with_runner(mut self, runner: StrategyRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn ledger(&self) -> Arc<Mutex<PositionLedger>> {
        self.ledger.clone()
    }

    pub fn rotator(&self) -> &SessionRotator {
        &self.rotator
    }

    pub fn executor(&self) -> &OrderExecutor {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut OrderExecutor {
        &mut self.executor
    }

    fn lock_ledger(&self) -> Result<MutexGuard<'_, PositionLedger>, TradingError> {
        self.ledger
            .lock()
            .map_err(|_| TradingError::LedgerCorruption("ledger lock poisoned".to_string()))
    }

    pub fn summary(&self) -> Result<LedgerSummary, TradingError> {
        Ok(self.lock_ledger()?.summary())
    }

    pub fn checkpoint(&self, now: DateTime<Utc>) -> Result<Checkpoint, TradingError> {
        let ledger = self.lock_ledger()?.snapshot();
        Ok(Checkpoint {
            ledger,
            last_claimed_slot: self.rotator.last_claimed_slot(),
            sessions: self.rotator.sessions().cloned().collect(),
            saved_at: now,
        })
    }

    /// Resume from a checkpoint before the first tick
    ///
    /// Open positions come back with their sessions, so they settle when the
    /// window's claim comes due.
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<(), TradingError> {
        self.lock_ledger()?.restore(checkpoint.ledger.clone())?;
        if let Some(slot) = checkpoint.last_claimed_slot {
            self.rotator.restore_last_claimed_slot(slot);
        }
        let restored = self.rotator.restore_sessions(checkpoint.sessions.clone());

        let orphaned = checkpoint
            .ledger
            .open_positions
            .iter()
            .filter(|p| !self.rotator.sessions().any(|s| s.id == p.session_id))
            .count();
        if orphaned > 0 {
            tracing::warn!(orphaned, "Restored positions without a held session will not settle");
        }
        tracing::info!(
            sessions = restored,
            positions = checkpoint.ledger.open_positions.len(),
            "♻️  Engine state restored"
        );
        Ok(())
    }

    /// Run one tick. Only a fatal error is returned; it has already been
    /// logged and sent to the notifier.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickSummary, TradingError> {
        match self.tick_inner(now).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                tracing::error!("💥 Fatal engine error: {}", e);
                self.notifier
                    .send(&format!("💥 Trading loop halted: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    async fn tick_inner(&mut self, now: DateTime<Utc>) -> Result<TickSummary, TradingError> {
        let rotation = self
            .rotator
            .rotate(now, self.sessions.as_ref())
            .await?;
        self.record_rotation(&rotation, now).await?;

        let reap = self.executor.reap(now).await;

        let mut quote = None;
        let mut strategy = None;

        if let Some(session) = self.rotator.active_session(now) {
            match session.reference_price() {
                None => {
                    tracing::debug!(session = %session.id, "Reference price unknown, not trading");
                }
                Some(reference_price) => match self.prices.get_quote().await {
                    Err(e) => {
                        tracing::warn!("Quote unavailable, skipping strategies: {}", e);
                    }
                    Ok(q) => {
                        let cash_balance = self
                            .ledger
                            .lock()
                            .map_err(|_| TradingError::LedgerCorruption("ledger lock poisoned".to_string()))?
                            .cash_balance();

                        let ctx = StrategyContext {
                            session,
                            reference_price,
                            quote: &q,
                            cash_balance,
                            now,
                            time_remaining: self.rotator.clock().time_remaining(now),
                        };
                        let report = self.runner.tick(&ctx, &mut self.executor, now).await?;

                        for result in &report.results {
                            let signal = &result.signal;
                            match &result.outcome {
                                Ok(SubmitOutcome::Filled { .. }) => self.audit.record(AuditEvent::fill(
                                    &session.id,
                                    signal.direction,
                                    signal.price,
                                    signal.stake,
                                    now,
                                )),
                                Ok(SubmitOutcome::Resting { .. }) | Err(TradingError::RateLimited) => {}
                                Err(e) => self.audit.record(AuditEvent::order_failed(
                                    &session.id,
                                    signal.direction,
                                    signal.price,
                                    signal.stake,
                                    e.to_string(),
                                    now,
                                )),
                            }
                        }

                        quote = Some(q);
                        strategy = Some(report);
                    }
                },
            }
        }

        self.record_daily_equity(now)?;

        Ok(TickSummary {
            state: self.rotator.state(now),
            rotation,
            reap,
            quote,
            strategy,
        })
    }

    async fn record_rotation(
        &self,
        rotation: &RotationOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), TradingError> {
        for record in &rotation.settled {
            self.audit.record(AuditEvent::settlement(record));
        }

        if let Some(slot) = rotation.claimed_slot {
            let note = match rotation.final_price {
                Some(final_price) => format!("claimed slot {} final={}", slot, final_price),
                None => format!("claimed slot {} final=unknown", slot),
            };
            for session_id in &rotation.settled_sessions {
                self.audit.record(AuditEvent::rotation(session_id, note.clone(), now));
            }

            if !rotation.settled.is_empty() {
                let profit: rust_decimal::Decimal = rotation.settled.iter().map(|r| r.profit).sum();
                let cash = self.lock_ledger()?.cash_balance();
                self.notifier
                    .send(&format!(
                        "🏁 Settled {} position(s), P&L {} | cash {}",
                        rotation.settled.len(),
                        profit,
                        cash
                    ))
                    .await;
            }
        }

        if let Some(session_id) = &rotation.acquired {
            self.audit
                .record(AuditEvent::rotation(session_id, "acquired".to_string(), now));
        }

        Ok(())
    }

    /// One equity row per UTC day
    fn record_daily_equity(&mut self, now: DateTime<Utc>) -> Result<(), TradingError> {
        let today = now.date_naive();
        if self.last_equity_day == Some(today) {
            return Ok(());
        }
        let summary = self.lock_ledger()?.summary();
        self.audit.record(AuditEvent::equity(&summary, now));
        self.last_equity_day = Some(today);
        Ok(())
    }
}
