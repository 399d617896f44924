use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::TradingError;
use crate::execution::backend::{ExecutionMode, OrderBackend};
use crate::execution::ledger::{FillOrigin, PositionLedger};
use crate::models::{Direction, OrderSignal};
use crate::risk::RiskGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Being placed (possibly retrying)
    Submitting,
    /// Acknowledged by the backend, waiting for a fill
    Resting,
    /// Retries exhausted; kept until reaped
    Failed,
}

#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub id: Uuid,
    pub session_id: String,
    pub direction: Direction,
    pub price: Decimal,
    /// Shares requested
    pub size: Decimal,
    pub stake: Decimal,
    pub retry_count: u32,
    pub submitted_at: DateTime<Utc>,
    pub backend_id: Option<String>,
    pub status: OrderStatus,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_retries: u32,
    pub retry_backoff: std::time::Duration,
    pub order_lifetime: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: std::time::Duration::from_millis(500),
            order_lifetime: Duration::seconds(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Filled on placement and booked in the ledger
    Filled {
        order_id: Uuid,
        backend_id: String,
        position_id: Uuid,
    },
    /// Acknowledged and resting on the book
    Resting { order_id: Uuid, backend_id: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReapReport {
    pub cancelled: usize,
    pub cancel_failures: usize,
    pub purged: usize,
}

/// Places orders through the risk gate and tracks them until filled or reaped
pub struct OrderExecutor {
    backend: Arc<dyn OrderBackend>,
    gate: RiskGate,
    ledger: Arc<Mutex<PositionLedger>>,
    config: ExecutorConfig,
    pending: Vec<PendingOrder>,
}

impl OrderExecutor {
    pub fn new(
        backend: Arc<dyn OrderBackend>,
        gate: RiskGate,
        ledger: Arc<Mutex<PositionLedger>>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            backend,
            gate,
            ledger,
            config,
            pending: Vec::new(),
        }
    }

    pub fn pending(&self) -> &[PendingOrder] {
        &self.pending
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn lock_ledger(&self) -> Result<MutexGuard<'_, PositionLedger>, TradingError> {
        self.ledger
            .lock()
            .map_err(|_| TradingError::LedgerCorruption("ledger lock poisoned".to_string()))
    }

    /// Submit one signal for `session_id`
    ///
    /// Denied by the gate → `RateLimited`, nothing queued. Retryable backend
    /// errors are retried up to `max_retries` times with a fixed backoff;
    /// past that the order is kept as `Failed` and `Exhausted` is returned.
    pub async fn submit(
        &mut self,
        session_id: &str,
        signal: &OrderSignal,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, TradingError> {
        if signal.price <= Decimal::ZERO || signal.price > Decimal::ONE {
            return Err(TradingError::InvalidPrice(signal.price));
        }
        if signal.stake <= Decimal::ZERO {
            return Err(TradingError::InvalidInput(format!(
                "stake must be positive, got {}",
                signal.stake
            )));
        }

        if !self.gate.allow(now) {
            tracing::debug!(direction = %signal.direction, "Order dropped by risk gate");
            return Err(TradingError::RateLimited);
        }

        let mut order = PendingOrder {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            direction: signal.direction,
            price: signal.price,
            size: signal.stake / signal.price,
            stake: signal.stake,
            retry_count: 0,
            submitted_at: now,
            backend_id: None,
            status: OrderStatus::Submitting,
        };

        let placement = loop {
            match self
                .backend
                .place(order.direction, order.price, order.size)
                .await
            {
                Ok(placement) => break placement,
                Err(e) if e.is_retryable() && order.retry_count < self.config.max_retries => {
                    order.retry_count += 1;
                    tracing::warn!(
                        order_id = %order.id,
                        "Order placement failed: {}. Retry {}/{} in {:?}",
                        e,
                        order.retry_count,
                        self.config.max_retries,
                        self.config.retry_backoff
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(e) if e.is_retryable() => {
                    let attempts = order.retry_count + 1;
                    tracing::error!(
                        order_id = %order.id,
                        "Order exhausted after {} attempts: {}",
                        attempts,
                        e
                    );
                    order.status = OrderStatus::Failed;
                    let order_id = order.id;
                    self.pending.push(order);
                    return Err(TradingError::Exhausted {
                        order_id,
                        attempts,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        };

        order.backend_id = Some(placement.backend_id.clone());

        if placement.filled {
            let origin = match self.backend.mode() {
                ExecutionMode::Simulated => FillOrigin::Simulated,
                ExecutionMode::Live => FillOrigin::Confirmed,
            };
            let position_id = self.lock_ledger()?.apply_fill(
                &order.session_id,
                order.direction,
                order.price,
                order.stake,
                origin,
                now,
            )?;
            return Ok(SubmitOutcome::Filled {
                order_id: order.id,
                backend_id: placement.backend_id,
                position_id,
            });
        }

        order.status = OrderStatus::Resting;
        let order_id = order.id;
        tracing::info!(%order_id, backend_id = %placement.backend_id, "Order resting");
        self.pending.push(order);

        Ok(SubmitOutcome::Resting {
            order_id,
            backend_id: placement.backend_id,
        })
    }

    /// Retire a resting order whose fill the live backend confirmed
    pub fn confirm_fill(&mut self, backend_id: &str, now: DateTime<Utc>) -> Result<Uuid, TradingError> {
        let idx = self
            .pending
            .iter()
            .position(|o| o.backend_id.as_deref() == Some(backend_id))
            .ok_or_else(|| {
                TradingError::InvalidInput(format!("no pending order with backend id {}", backend_id))
            })?;

        let order = &self.pending[idx];
        let position_id = self.lock_ledger()?.apply_fill(
            &order.session_id,
            order.direction,
            order.price,
            order.stake,
            FillOrigin::Confirmed,
            now,
        )?;

        self.pending.remove(idx);
        Ok(position_id)
    }

    /// Cancel and drop orders past their lifetime that have used up their retries
    pub async fn reap(&mut self, now: DateTime<Utc>) -> ReapReport {
        let lifetime = self.config.order_lifetime;
        let max_retries = self.config.max_retries;

        let (expired, kept): (Vec<PendingOrder>, Vec<PendingOrder>) =
            std::mem::take(&mut self.pending).into_iter().partition(|o| {
                now - o.submitted_at > lifetime && o.retry_count >= max_retries
            });
        self.pending = kept;

        let mut report = ReapReport::default();
        for order in expired {
            if let Some(backend_id) = &order.backend_id {
                match self.backend.cancel(backend_id).await {
                    Ok(()) => report.cancelled += 1,
                    Err(e) => {
                        report.cancel_failures += 1;
                        tracing::warn!(order_id = %order.id, %backend_id, "Cancel failed: {}", e);
                    }
                }
            }
            report.purged += 1;
        }

        if report.purged > 0 {
            tracing::info!(
                purged = report.purged,
                cancelled = report.cancelled,
                "Reaped expired orders"
            );
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::backend::{PaperBackend, Placement};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend that replays a script of placement results
    struct ScriptedBackend {
        mode: ExecutionMode,
        script: Mutex<VecDeque<Result<Placement, TradingError>>>,
        places: AtomicU32,
        cancels: Mutex<Vec<String>>,
        fail_cancel: bool,
    }

    impl ScriptedBackend {
        fn new(mode: ExecutionMode, script: Vec<Result<Placement, TradingError>>) -> Self {
            Self {
                mode,
                script: Mutex::new(script.into()),
                places: AtomicU32::new(0),
                cancels: Mutex::new(Vec::new()),
                fail_cancel: false,
            }
        }

        fn always_down(mode: ExecutionMode) -> Self {
            Self::new(mode, Vec::new())
        }
    }

    #[async_trait]
    impl OrderBackend for ScriptedBackend {
        fn mode(&self) -> ExecutionMode {
            self.mode
        }

        async fn place(
            &self,
            _direction: Direction,
            _price: Decimal,
            _size: Decimal,
        ) -> Result<Placement, TradingError> {
            self.places.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TradingError::BackendUnavailable("503".into())))
        }

        async fn cancel(&self, backend_id: &str) -> Result<(), TradingError> {
            self.cancels.lock().unwrap().push(backend_id.to_string());
            if self.fail_cancel {
                Err(TradingError::BackendUnavailable("cancel timeout".into()))
            } else {
                Ok(())
            }
        }
    }

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            max_retries: 3,
            retry_backoff: std::time::Duration::from_millis(0),
            order_lifetime: Duration::seconds(60),
        }
    }

    fn executor_with(backend: Arc<dyn OrderBackend>) -> (OrderExecutor, Arc<Mutex<PositionLedger>>) {
        let ledger = Arc::new(Mutex::new(PositionLedger::new(dec!(1000))));
        let executor = OrderExecutor::new(backend, RiskGate::from_millis(500), ledger.clone(), config());
        (executor, ledger)
    }

    fn signal() -> OrderSignal {
        OrderSignal::new(Direction::Up, dec!(0.5), dec!(100))
    }

    #[tokio::test]
    async fn test_paper_fill_books_position() {
        let (mut executor, ledger) = executor_with(Arc::new(PaperBackend::new()));
        let outcome = executor.submit("s1", &signal(), Utc::now()).await.unwrap();

        assert!(matches!(outcome, SubmitOutcome::Filled { .. }));
        assert!(executor.pending().is_empty());

        let ledger = ledger.lock().unwrap();
        assert_eq!(ledger.cash_balance(), dec!(900));
        assert_eq!(ledger.open_positions()[0].shares, dec!(200));
    }

    #[tokio::test]
    async fn test_rate_limited_order_is_dropped() {
        let backend = Arc::new(PaperBackend::new());
        let (mut executor, _ledger) = executor_with(backend.clone());
        let now = Utc::now();

        executor.submit("s1", &signal(), now).await.unwrap();
        let err = executor
            .submit("s1", &signal(), now + Duration::milliseconds(100))
            .await
            .unwrap_err();

        assert_eq!(err, TradingError::RateLimited);
        assert_eq!(backend.placed(), 1);
        assert!(executor.pending().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_price_rejected_before_gate() {
        let backend = Arc::new(PaperBackend::new());
        let (mut executor, _ledger) = executor_with(backend.clone());
        let now = Utc::now();

        let bad = OrderSignal::new(Direction::Up, dec!(0), dec!(100));
        assert!(matches!(
            executor.submit("s1", &bad, now).await,
            Err(TradingError::InvalidPrice(_))
        ));
        // Gate token still available
        assert!(executor.submit("s1", &signal(), now).await.is_ok());
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let backend = Arc::new(ScriptedBackend::new(
            ExecutionMode::Simulated,
            vec![
                Err(TradingError::BackendUnavailable("timeout".into())),
                Err(TradingError::BackendRejected("stale".into())),
                Ok(Placement {
                    backend_id: "b-1".into(),
                    filled: true,
                }),
            ],
        ));
        let (mut executor, ledger) = executor_with(backend.clone());

        let outcome = executor.submit("s1", &signal(), Utc::now()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Filled { ref backend_id, .. } if backend_id == "b-1"));
        assert_eq!(backend.places.load(Ordering::SeqCst), 3);
        assert_eq!(ledger.lock().unwrap().open_positions().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_cap_is_never_exceeded() {
        let backend = Arc::new(ScriptedBackend::always_down(ExecutionMode::Simulated));
        let (mut executor, ledger) = executor_with(backend.clone());

        let err = executor.submit("s1", &signal(), Utc::now()).await.unwrap_err();

        match err {
            TradingError::Exhausted { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("expected Exhausted, got {:?}", other),
        }
        // Initial attempt + max_retries resubmissions
        assert_eq!(backend.places.load(Ordering::SeqCst), 4);

        let failed = &executor.pending()[0];
        assert_eq!(failed.status, OrderStatus::Failed);
        assert_eq!(failed.retry_count, 3);
        assert_eq!(ledger.lock().unwrap().cash_balance(), dec!(1000));
    }

    #[tokio::test]
    async fn test_non_retryable_error_surfaces_immediately() {
        let backend = Arc::new(ScriptedBackend::new(
            ExecutionMode::Simulated,
            vec![Err(TradingError::MalformedResponse("no id".into()))],
        ));
        let (mut executor, _ledger) = executor_with(backend.clone());

        let err = executor.submit("s1", &signal(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, TradingError::MalformedResponse(_)));
        assert_eq!(backend.places.load(Ordering::SeqCst), 1);
        assert!(executor.pending().is_empty());
    }

    #[tokio::test]
    async fn test_live_resting_order_then_confirmed_fill() {
        let backend = Arc::new(ScriptedBackend::new(
            ExecutionMode::Live,
            vec![Ok(Placement {
                backend_id: "live-9".into(),
                filled: false,
            })],
        ));
        let (mut executor, ledger) = executor_with(backend);
        let now = Utc::now();

        let outcome = executor.submit("s1", &signal(), now).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Resting { .. }));
        assert_eq!(executor.pending()[0].status, OrderStatus::Resting);

        executor.confirm_fill("live-9", now).unwrap();
        assert!(executor.pending().is_empty());

        let ledger = ledger.lock().unwrap();
        assert_eq!(ledger.open_positions().len(), 1);
        // Confirmed fills leave cash to backend reconciliation
        assert_eq!(ledger.cash_balance(), dec!(1000));
    }

    #[tokio::test]
    async fn test_confirm_unknown_order_fails() {
        let (mut executor, _ledger) = executor_with(Arc::new(PaperBackend::new()));
        assert!(executor.confirm_fill("nope", Utc::now()).is_err());
    }

    #[tokio::test]
    async fn test_reap_keeps_orders_within_lifetime() {
        let backend = Arc::new(ScriptedBackend::always_down(ExecutionMode::Simulated));
        let (mut executor, _ledger) = executor_with(backend);
        let now = Utc::now();

        let _ = executor.submit("s1", &signal(), now).await;
        assert_eq!(executor.pending().len(), 1);

        let report = executor.reap(now + Duration::seconds(30)).await;
        assert_eq!(report.purged, 0);
        assert_eq!(executor.pending().len(), 1);

        let report = executor.reap(now + Duration::seconds(61)).await;
        assert_eq!(report.purged, 1);
        assert!(executor.pending().is_empty());
    }

    #[tokio::test]
    async fn test_reap_keeps_expired_orders_still_retrying() {
        let backend = Arc::new(ScriptedBackend::new(
            ExecutionMode::Live,
            vec![Ok(Placement {
                backend_id: "live-1".into(),
                filled: false,
            })],
        ));
        let (mut executor, _ledger) = executor_with(backend.clone());
        let now = Utc::now();

        executor.submit("s1", &signal(), now).await.unwrap();
        let report = executor.reap(now + Duration::minutes(10)).await;

        assert_eq!(report.purged, 0);
        assert_eq!(executor.pending().len(), 1);
        assert!(backend.cancels.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reap_cancels_acknowledged_orders_best_effort() {
        let mut backend = ScriptedBackend::new(
            ExecutionMode::Live,
            vec![
                Err(TradingError::BackendUnavailable("a".into())),
                Err(TradingError::BackendUnavailable("b".into())),
                Err(TradingError::BackendUnavailable("c".into())),
                Ok(Placement {
                    backend_id: "live-2".into(),
                    filled: false,
                }),
            ],
        );
        backend.fail_cancel = true;
        let backend = Arc::new(backend);
        let (mut executor, _ledger) = executor_with(backend.clone());
        let now = Utc::now();

        executor.submit("s1", &signal(), now).await.unwrap();
        assert_eq!(executor.pending()[0].retry_count, 3);

        let report = executor.reap(now + Duration::seconds(120)).await;
        assert_eq!(report.purged, 1);
        assert_eq!(report.cancel_failures, 1);
        assert!(executor.pending().is_empty());
        assert_eq!(backend.cancels.lock().unwrap().as_slice(), ["live-2".to_string()]);
    }
}
