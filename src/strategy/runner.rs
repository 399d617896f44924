use chrono::{DateTime, Utc};
use std::panic::{catch_unwind, AssertUnwindSafe};

use super::{Strategy, StrategyContext};
use crate::error::TradingError;
use crate::execution::{OrderExecutor, SubmitOutcome};
use crate::models::OrderSignal;

/// What happened to one forwarded signal
#[derive(Debug, Clone)]
pub struct SignalResult {
    pub strategy: String,
    pub signal: OrderSignal,
    pub outcome: Result<SubmitOutcome, TradingError>,
}

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub results: Vec<SignalResult>,
    pub strategy_errors: usize,
}

impl TickReport {
    pub fn filled(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Ok(SubmitOutcome::Filled { .. })))
            .count()
    }

    pub fn rate_limited(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Err(TradingError::RateLimited)))
            .count()
    }

    pub fn exhausted(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Err(TradingError::Exhausted { .. })))
            .count()
    }
}

/// Runs every registered strategy once per tick and forwards their signals
#[derive(Default)]
pub struct StrategyRunner {
    strategies: Vec<Box<dyn Strategy>>,
}

impl StrategyRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_strategy(&mut self, strategy: Box<dyn Strategy>) {
        tracing::info!(strategy = strategy.name(), "Strategy registered");
        self.strategies.push(strategy);
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// One pass over all strategies
    ///
    /// A failing or panicking strategy is logged and skipped. Only a fatal
    /// executor error (ledger corruption) is returned.
    pub async fn tick(
        &self,
        ctx: &StrategyContext<'_>,
        executor: &mut OrderExecutor,
        now: DateTime<Utc>,
    ) -> Result<TickReport, TradingError> {
        let mut report = TickReport::default();

        for strategy in &self.strategies {
            let generated = catch_unwind(AssertUnwindSafe(|| strategy.generate_signals(ctx)));

            let signals = match generated {
                Ok(Ok(signals)) => signals,
                Ok(Err(e)) => {
                    report.strategy_errors += 1;
                    tracing::warn!(strategy = strategy.name(), "Strategy failed: {}", e);
                    continue;
                }
                Err(_) => {
                    report.strategy_errors += 1;
                    tracing::error!(strategy = strategy.name(), "Strategy panicked");
                    continue;
                }
            };

            for signal in signals {
                let outcome = executor.submit(&ctx.session.id, &signal, now).await;

                match &outcome {
                    Err(e) if e.is_fatal() => return Err(e.clone()),
                    Err(TradingError::RateLimited) => {}
                    Err(e) => {
                        tracing::warn!(strategy = strategy.name(), "Order not placed: {}", e);
                    }
                    Ok(_) => {}
                }

                report.results.push(SignalResult {
                    strategy: strategy.name().to_string(),
                    signal,
                    outcome,
                });
            }
        }

        Ok(report)
    }
}
