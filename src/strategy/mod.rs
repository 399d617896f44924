// Trading strategy module
pub mod market_making;
pub mod runner;

pub use market_making::{MarketMakingConfig, MarketMakingStrategy, SizingBucket};
pub use runner::{SignalResult, StrategyRunner, TickReport};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::error::TradingError;
use crate::models::{MarketQuote, OrderSignal, Session};

/// Everything a strategy may look at on one tick
#[derive(Debug, Clone)]
pub struct StrategyContext<'a> {
    pub session: &'a Session,
    pub reference_price: Decimal,
    pub quote: &'a MarketQuote,
    pub cash_balance: Decimal,
    pub now: DateTime<Utc>,
    pub time_remaining: Duration,
}

/// Base trait for all signal generators
pub trait Strategy: Send + Sync {
    /// Produce zero or more order signals for this tick
    fn generate_signals(&self, ctx: &StrategyContext<'_>) -> Result<Vec<OrderSignal>, TradingError>;

    /// Get strategy name
    fn name(&self) -> &str;
}
