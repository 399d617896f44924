use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use super::SessionSource;
use crate::api::PriceSource;
use crate::error::TradingError;
use crate::models::Session;

pub const DEFAULT_SESSION_PREFIX: &str = "btc-updown-15m";

/// Sessions named after their window start, priced from the underlying feed
///
/// The reference price is the feed's price at acquisition time and the close
/// is the feed's price when first asked after the window ends, so both are
/// only exact when ticks land near the boundaries.
pub struct WindowSessionSource {
    prefix: String,
    prices: Arc<dyn PriceSource>,
}

impl WindowSessionSource {
    pub fn new(prefix: impl Into<String>, prices: Arc<dyn PriceSource>) -> Self {
        Self {
            prefix: prefix.into(),
            prices,
        }
    }

    /// `{prefix}-{window_start_unix}`
    pub fn session_id(&self, window_start: DateTime<Utc>) -> String {
        format!("{}-{}", self.prefix, window_start.timestamp())
    }
}

#[async_trait]
impl SessionSource for WindowSessionSource {
    async fn acquire_next(&self, window_start: DateTime<Utc>) -> Result<Session, TradingError> {
        let id = self.session_id(window_start);

        let reference = match self.prices.get_price().await {
            Ok(price) => Some(price),
            Err(e) => {
                tracing::warn!(session = %id, "Reference price unavailable at acquisition: {}", e);
                None
            }
        };

        Ok(Session::new(id, window_start, reference))
    }

    async fn fetch_reference_price(&self, _session: &Session) -> Result<Decimal, TradingError> {
        self.prices.get_price().await
    }

    /// First feed price observed after the window closed
    async fn fetch_final_price(&self, _session: &Session) -> Result<Decimal, TradingError> {
        self.prices.get_price().await
    }
}
