use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of a binary up/down market
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// Resolved result of a window
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Outcome {
    Up,
    Down,
    Tie,
}

impl Outcome {
    /// Compare the final price against the window's reference price
    pub fn resolve(final_price: Decimal, reference_price: Decimal) -> Self {
        match final_price.cmp(&reference_price) {
            std::cmp::Ordering::Greater => Outcome::Up,
            std::cmp::Ordering::Less => Outcome::Down,
            std::cmp::Ordering::Equal => Outcome::Tie,
        }
    }

    pub fn winner(self) -> Option<Direction> {
        match self {
            Outcome::Up => Some(Direction::Up),
            Outcome::Down => Some(Direction::Down),
            Outcome::Tie => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Up => write!(f, "UP"),
            Outcome::Down => write!(f, "DOWN"),
            Outcome::Tie => write!(f, "TIE"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Settling,
    Settled,
}

/// One trading window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub window_start: DateTime<Utc>,
    reference_price: Option<Decimal>,
    /// Underlying price the window resolved at
    #[serde(default)]
    close_price: Option<Decimal>,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(id: String, window_start: DateTime<Utc>, reference_price: Option<Decimal>) -> Self {
        Self {
            id,
            window_start,
            reference_price,
            close_price: None,
            status: SessionStatus::Active,
        }
    }

    pub fn reference_price(&self) -> Option<Decimal> {
        self.reference_price
    }

    /// Set the reference price once. Returns false if it was already known.
    pub fn set_reference_price(&mut self, price: Decimal) -> bool {
        if self.reference_price.is_some() {
            return false;
        }
        self.reference_price = Some(price);
        true
    }

    pub fn close_price(&self) -> Option<Decimal> {
        self.close_price
    }

    /// Record the close once. Returns false if it was already known.
    pub fn set_close_price(&mut self, price: Decimal) -> bool {
        if self.close_price.is_some() {
            return false;
        }
        self.close_price = Some(price);
        true
    }
}

/// Best bid/ask snapshot of the reference market
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketQuote {
    pub mid: Decimal,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub observed_at: DateTime<Utc>,
}

impl MarketQuote {
    /// Build a quote, deriving mid from both sides when available
    pub fn from_book(
        last: Decimal,
        bid: Option<Decimal>,
        ask: Option<Decimal>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let mid = match (bid, ask) {
            (Some(b), Some(a)) => (b + a) / Decimal::TWO,
            _ => last,
        };
        Self {
            mid,
            bid,
            ask,
            observed_at,
        }
    }

    pub fn last_only(price: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self::from_book(price, None, None, observed_at)
    }
}

/// Order intent produced by a strategy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSignal {
    pub direction: Direction,
    /// Share price in (0, 1]
    pub price: Decimal,
    /// USD committed
    pub stake: Decimal,
}

impl OrderSignal {
    pub fn new(direction: Direction, price: Decimal, stake: Decimal) -> Self {
        Self {
            direction,
            price,
            stake,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_outcome_resolution() {
        assert_eq!(Outcome::resolve(dec!(100050), dec!(100000)), Outcome::Up);
        assert_eq!(Outcome::resolve(dec!(99950), dec!(100000)), Outcome::Down);
        assert_eq!(Outcome::resolve(dec!(100000), dec!(100000)), Outcome::Tie);
        assert_eq!(Outcome::Tie.winner(), None);
        assert_eq!(Outcome::Down.winner(), Some(Direction::Down));
    }

    #[test]
    fn test_reference_price_is_set_once() {
        let mut session = Session::new("btc-updown-15m-0".to_string(), Utc::now(), None);
        assert!(session.set_reference_price(dec!(100000)));
        assert!(!session.set_reference_price(dec!(99999)));
        assert_eq!(session.reference_price(), Some(dec!(100000)));
        assert_eq!(session.close_price(), None);

        assert!(session.set_close_price(dec!(100050)));
        assert!(!session.set_close_price(dec!(90000)));
        assert_eq!(session.close_price(), Some(dec!(100050)));
    }

    #[test]
    fn test_quote_mid_from_book() {
        let quote = MarketQuote::from_book(dec!(101), Some(dec!(99)), Some(dec!(100)), Utc::now());
        assert_eq!(quote.mid, dec!(99.5));

        let quote = MarketQuote::from_book(dec!(101), Some(dec!(99)), None, Utc::now());
        assert_eq!(quote.mid, dec!(101));
    }
}
