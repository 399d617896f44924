use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend with noise (+2% daily average)
    Uptrend,
    /// Steady downtrend with noise (-2% daily average)
    Downtrend,
    /// Mean-reverting chop around the start price
    Sideways,
    /// Large random swings
    Volatile,
}

impl std::str::FromStr for MarketScenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uptrend" | "up" => Ok(Self::Uptrend),
            "downtrend" | "down" => Ok(Self::Downtrend),
            "sideways" => Ok(Self::Sideways),
            "volatile" => Ok(Self::Volatile),
            other => Err(format!("unknown scenario: {}", other)),
        }
    }
}

/// One observation of the underlying
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceTick {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Generates a seeded underlying price path for back-testing
pub struct SyntheticPriceGenerator {
    rng: StdRng,
    base_price: f64,
    /// Half of the quoted bid/ask spread, as a fraction of price
    half_spread: f64,
}

impl SyntheticPriceGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 100_000.0,
            half_spread: 0.00005,
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    pub fn base_price(&self) -> f64 {
        self.base_price
    }

    /// Generate `num_ticks` ticks every `tick_secs` seconds from `start`
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        start: DateTime<Utc>,
        num_ticks: usize,
        tick_secs: i64,
    ) -> Vec<PriceTick> {
        let ticks_per_day = 86_400.0 / tick_secs as f64;
        let mut ticks = Vec::with_capacity(num_ticks);
        let mut price = self.base_price;

        for i in 0..num_ticks {
            let timestamp = start + Duration::seconds(i as i64 * tick_secs);

            price += match scenario {
                MarketScenario::Uptrend => {
                    price * (0.02 / ticks_per_day) + price * self.rng.gen_range(-0.0001..0.0001)
                }
                MarketScenario::Downtrend => {
                    price * (-0.02 / ticks_per_day) + price * self.rng.gen_range(-0.0001..0.0001)
                }
                MarketScenario::Sideways => {
                    (self.base_price - price) * 0.05 + price * self.rng.gen_range(-0.0005..0.0005)
                }
                MarketScenario::Volatile => price * self.rng.gen_range(-0.002..0.002),
            };

            // Prevent price from going too low
            price = price.max(self.base_price * 0.5);

            if let Some(tick) = self.make_tick(timestamp, price) {
                ticks.push(tick);
            }
        }

        ticks
    }

    fn make_tick(&self, timestamp: DateTime<Utc>, price: f64) -> Option<PriceTick> {
        let spread = price * self.half_spread;
        Some(PriceTick {
            timestamp,
            price: Decimal::from_f64(price)?.round_dp(2),
            bid: Decimal::from_f64(price - spread)?.round_dp(2),
            ask: Decimal::from_f64(price + spread)?.round_dp(2),
        })
    }
}
