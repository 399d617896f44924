// Window clock, session acquisition and rotation
pub mod clock;
pub mod rotator;
pub mod source;

pub use clock::{window_start, SlotClock};
pub use rotator::{RotationOutcome, RotatorState, SessionRotator};
pub use source::WindowSessionSource;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::TradingError;
use crate::models::Session;

/// Resolves window identities and their reference prices
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Session for the window starting at `window_start`. The reference
    /// price may still be missing if it could not be read yet.
    async fn acquire_next(&self, window_start: DateTime<Utc>) -> Result<Session, TradingError>;

    async fn fetch_reference_price(&self, session: &Session) -> Result<Decimal, TradingError>;

    /// Price the window resolved at. Only asked once the window has ended;
    /// the first successful answer is kept for settlement.
    async fn fetch_final_price(&self, session: &Session) -> Result<Decimal, TradingError>;
}
