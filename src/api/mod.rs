pub mod coinbase;
pub mod telegram;

pub use coinbase::CoinbasePriceClient;
pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::error::TradingError;
use crate::models::MarketQuote;

/// Current price of the underlying the windows are keyed to
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn get_price(&self) -> Result<Decimal, TradingError>;

    /// Top of book when the source has one, otherwise the last price as mid
    async fn get_quote(&self) -> Result<MarketQuote, TradingError> {
        let price = self.get_price().await?;
        Ok(MarketQuote::last_only(price, Utc::now()))
    }
}
