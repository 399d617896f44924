use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::{Strategy, StrategyContext};
use crate::error::TradingError;
use crate::models::{Direction, OrderSignal};

/// Edge threshold → fraction of the per-trade budget to commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingBucket {
    pub min_edge: Decimal,
    pub stake_ratio: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketMakingConfig {
    /// Fraction of cash available to a single trade
    pub trade_ratio: Decimal,
    /// Discount below fair value the bid is quoted at
    pub half_spread: Decimal,
    /// Probability shift per unit of relative drift from the reference price
    pub sensitivity: Decimal,
    /// Stop quoting when less than this many seconds remain in the window
    pub min_time_remaining_secs: i64,
    /// Ascending by `min_edge`
    pub sizing: Vec<SizingBucket>,
}

impl Default for MarketMakingConfig {
    fn default() -> Self {
        Self {
            trade_ratio: dec!(0.1),
            half_spread: dec!(0.02),
            sensitivity: dec!(100),
            min_time_remaining_secs: 60,
            sizing: vec![
                SizingBucket {
                    min_edge: dec!(0.05),
                    stake_ratio: dec!(0.25),
                },
                SizingBucket {
                    min_edge: dec!(0.10),
                    stake_ratio: dec!(0.5),
                },
                SizingBucket {
                    min_edge: dec!(0.20),
                    stake_ratio: dec!(1),
                },
            ],
        }
    }
}

const MAX_SHIFT: Decimal = dec!(0.45);
const MIN_QUOTE: Decimal = dec!(0.01);
const MAX_QUOTE: Decimal = dec!(0.99);

/// Quotes the side the underlying is drifting toward, below its fair value
#[derive(Debug, Clone, Default)]
pub struct MarketMakingStrategy {
    config: MarketMakingConfig,
}

impl MarketMakingStrategy {
    pub fn new(config: MarketMakingConfig) -> Self {
        Self { config }
    }

    /// Fair probability that the window resolves Up
    pub fn fair_up(&self, mid: Decimal, reference: Decimal) -> Decimal {
        if reference <= Decimal::ZERO {
            return dec!(0.5);
        }
        let drift = (mid - reference) / reference;
        let shift = (drift * self.config.sensitivity).clamp(-MAX_SHIFT, MAX_SHIFT);
        dec!(0.5) + shift
    }

    /// Stake ratio of the highest bucket the edge reaches
    fn stake_ratio(&self, edge: Decimal) -> Option<Decimal> {
        self.config
            .sizing
            .iter()
            .filter(|b| edge >= b.min_edge)
            .map(|b| b.stake_ratio)
            .last()
    }
}

impl Strategy for MarketMakingStrategy {
    fn generate_signals(&self, ctx: &StrategyContext<'_>) -> Result<Vec<OrderSignal>, TradingError> {
        if ctx.time_remaining < Duration::seconds(self.config.min_time_remaining_secs) {
            return Ok(Vec::new());
        }
        if ctx.quote.mid <= Decimal::ZERO {
            return Err(TradingError::InvalidPrice(ctx.quote.mid));
        }

        let fair_up = self.fair_up(ctx.quote.mid, ctx.reference_price);
        let (direction, fair) = match fair_up.cmp(&dec!(0.5)) {
            std::cmp::Ordering::Greater => (Direction::Up, fair_up),
            std::cmp::Ordering::Less => (Direction::Down, Decimal::ONE - fair_up),
            std::cmp::Ordering::Equal => return Ok(Vec::new()),
        };

        let edge = fair - dec!(0.5);
        let Some(ratio) = self.stake_ratio(edge) else {
            return Ok(Vec::new());
        };

        let price = (fair - self.config.half_spread)
            .clamp(MIN_QUOTE, MAX_QUOTE)
            .round_dp(2);
        let stake = (ctx.cash_balance * self.config.trade_ratio * ratio).round_dp(2);
        if stake <= Decimal::ZERO {
            return Ok(Vec::new());
        }

        tracing::debug!(
            session = %ctx.session.id,
            %direction,
            fair = %fair,
            %price,
            %stake,
            "Market making quote"
        );

        Ok(vec![OrderSignal::new(direction, price, stake)])
    }

    fn name(&self) -> &str {
        "MarketMaking"
    }
}
