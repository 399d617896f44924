pub mod metrics;
pub mod runner;
pub mod synthetic;

pub use metrics::BacktestMetrics;
pub use runner::{BacktestRunner, ReplayPriceSource};
pub use synthetic::{MarketScenario, PriceTick, SyntheticPriceGenerator};
