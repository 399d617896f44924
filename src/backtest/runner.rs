use crate::api::PriceSource;
use crate::backtest::metrics::BacktestMetrics;
use crate::backtest::synthetic::PriceTick;
use crate::config::Settings;
use crate::engine::{Collaborators, Engine};
use crate::error::TradingError;
use crate::execution::{PaperBackend, SettlementRecord};
use crate::models::MarketQuote;
use crate::session::WindowSessionSource;
use crate::telemetry::{LogNotifier, MemoryAuditSink};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

/// Price source that serves whichever tick the replay loop last set
#[derive(Default)]
pub struct ReplayPriceSource {
    current: Mutex<Option<PriceTick>>,
}

impl ReplayPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, tick: PriceTick) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current = Some(tick);
    }

    fn current(&self) -> Result<PriceTick, TradingError> {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        (*current).ok_or_else(|| TradingError::Unavailable("no replay tick yet".to_string()))
    }
}

#[async_trait]
impl PriceSource for ReplayPriceSource {
    async fn get_price(&self) -> Result<Decimal, TradingError> {
        Ok(self.current()?.price)
    }

    async fn get_quote(&self) -> Result<MarketQuote, TradingError> {
        let tick = self.current()?;
        Ok(MarketQuote::from_book(
            tick.price,
            Some(tick.bid),
            Some(tick.ask),
            tick.timestamp,
        ))
    }
}

/// Replays a price path through the live engine under simulated time
pub struct BacktestRunner {
    settings: Settings,
}

impl BacktestRunner {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Run the engine once per tick and collect every settlement
    pub async fn run(&self, ticks: Vec<PriceTick>) -> anyhow::Result<BacktestMetrics> {
        if ticks.is_empty() {
            anyhow::bail!("Not enough ticks for backtest: got 0");
        }

        let replay = Arc::new(ReplayPriceSource::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let collaborators = Collaborators {
            prices: replay.clone(),
            sessions: Arc::new(WindowSessionSource::new(
                self.settings.window.session_prefix.clone(),
                replay.clone(),
            )),
            backend: Arc::new(PaperBackend::new()),
            audit: audit.clone(),
            notifier: Arc::new(LogNotifier),
        };

        let mut engine = Engine::new(&self.settings, collaborators)?;
        let initial_balance = self.settings.account.initial_balance;

        tracing::info!(
            "Starting backtest: {} ticks from {} to {}",
            ticks.len(),
            ticks[0].timestamp,
            ticks[ticks.len() - 1].timestamp
        );

        let mut settlements: Vec<SettlementRecord> = Vec::new();
        for tick in ticks {
            replay.set(tick);
            let summary = engine.tick(tick.timestamp).await?;
            settlements.extend(summary.rotation.settled);
        }

        let ledger = engine.summary()?;
        let final_balance = ledger.cash_balance + ledger.open_stake;

        tracing::info!(
            "Backtest complete: {} settlements, {} audit events, {} positions still open",
            settlements.len(),
            audit.events().len(),
            ledger.open_positions
        );

        Ok(BacktestMetrics::from_settlements(
            settlements,
            initial_balance,
            final_balance,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::synthetic::{MarketScenario, SyntheticPriceGenerator};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.risk.min_order_interval_ms = 60_000;
        settings
    }

    #[tokio::test]
    async fn test_replay_source_requires_a_tick() {
        let replay = ReplayPriceSource::new();
        assert!(replay.get_price().await.is_err());

        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        replay.set(PriceTick {
            timestamp: at,
            price: dec!(100),
            bid: dec!(99),
            ask: dec!(103),
        });
        assert_eq!(replay.get_price().await.unwrap(), dec!(100));
        let quote = replay.get_quote().await.unwrap();
        assert_eq!(quote.mid, dec!(101));
        assert_eq!(quote.observed_at, at);
    }

    #[tokio::test]
    async fn test_empty_ticks_rejected() {
        let runner = BacktestRunner::new(settings());
        assert!(runner.run(vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_backtest_settles_windows() {
        // Aligned to a 15 minute boundary, 3 hours of 10s ticks
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ticks = SyntheticPriceGenerator::new(42).generate(MarketScenario::Volatile, start, 1080, 10);

        let settings = settings();
        let initial = settings.account.initial_balance;
        let metrics = BacktestRunner::new(settings).run(ticks).await.unwrap();

        assert_eq!(metrics.initial_balance, initial);
        assert_eq!(
            metrics.total_positions,
            metrics.winning_positions + metrics.losing_positions + metrics.tied_positions
        );
        assert!(metrics.windows_traded <= 12);
        let realized: Decimal = metrics.settlements.iter().map(|r| r.profit).sum();
        assert_eq!(realized, metrics.total_pnl);
    }
}
