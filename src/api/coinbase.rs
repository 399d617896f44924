use async_trait::async_trait;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::PriceSource;
use crate::error::TradingError;
use crate::models::MarketQuote;

pub const COINBASE_API_BASE: &str = "https://api.exchange.coinbase.com";
const DEFAULT_PRODUCT: &str = "BTC-USD";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

type TickerRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Response from /products/{id}/ticker
#[derive(Debug, Deserialize)]
struct TickerResponse {
    price: String,
    #[serde(default)]
    bid: Option<String>,
    #[serde(default)]
    ask: Option<String>,
}

/// Coinbase Exchange ticker client
///
/// Clones share the same rate limiter.
#[derive(Clone)]
pub struct CoinbasePriceClient {
    client: Client,
    base_url: String,
    product: String,
    rate_limiter: Arc<TickerRateLimiter>,
    initial_backoff: Duration,
}

impl CoinbasePriceClient {
    pub fn new(
        base_url: impl Into<String>,
        product: impl Into<String>,
        requests_per_minute: u32,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("updownbot")
            .build()?;

        let rpm = NonZeroU32::new(requests_per_minute)
            .ok_or_else(|| anyhow::anyhow!("requests_per_minute must be positive"))?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            product: product.into(),
            rate_limiter,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// BTC-USD against the public endpoint
    pub fn btc_usd() -> anyhow::Result<Self> {
        Self::new(COINBASE_API_BASE, DEFAULT_PRODUCT, 300)
    }

    pub fn with_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    /// Fetch the ticker, retrying 429/5xx/network failures with exponential backoff
    async fn fetch_ticker(&self) -> Result<TickerResponse, TradingError> {
        let url = format!("{}/products/{}/ticker", self.base_url, self.product);
        let mut last_error = String::new();

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    let body = response
                        .text()
                        .await
                        .map_err(|e| TradingError::Unavailable(e.to_string()))?;
                    return serde_json::from_str(&body)
                        .map_err(|e| TradingError::MalformedResponse(format!("ticker: {}", e)));
                }
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() != 429 && !status.is_server_error() {
                        return Err(TradingError::Unavailable(format!(
                            "Coinbase API error ({})",
                            status
                        )));
                    }
                    last_error = format!("HTTP {}", status);
                }
                Err(e) => last_error = e.to_string(),
            }

            if attempt < MAX_RETRIES {
                let backoff = self.initial_backoff * 2_u32.pow(attempt - 1);
                tracing::warn!(
                    "Ticker attempt {}/{} failed: {}. Retrying in {:?}...",
                    attempt,
                    MAX_RETRIES,
                    last_error,
                    backoff
                );
                tokio::time::sleep(backoff).await;
            }
        }

        Err(TradingError::Unavailable(format!(
            "ticker failed after {} attempts: {}",
            MAX_RETRIES, last_error
        )))
    }
}

fn parse_price(field: &str, raw: &str) -> Result<Decimal, TradingError> {
    let price = Decimal::from_str(raw)
        .map_err(|_| TradingError::MalformedResponse(format!("{} is not a decimal: {:?}", field, raw)))?;
    if price <= Decimal::ZERO {
        return Err(TradingError::InvalidPrice(price));
    }
    Ok(price)
}

fn parse_side(field: &str, raw: Option<&str>) -> Result<Option<Decimal>, TradingError> {
    raw.map(|r| parse_price(field, r)).transpose()
}

#[async_trait]
impl PriceSource for CoinbasePriceClient {
    async fn get_price(&self) -> Result<Decimal, TradingError> {
        let ticker = self.fetch_ticker().await?;
        parse_price("price", &ticker.price)
    }

    async fn get_quote(&self) -> Result<MarketQuote, TradingError> {
        let ticker = self.fetch_ticker().await?;
        let last = parse_price("price", &ticker.price)?;
        let bid = parse_side("bid", ticker.bid.as_deref())?;
        let ask = parse_side("ask", ticker.ask.as_deref())?;
        Ok(MarketQuote::from_book(last, bid, ask, Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const TICKER_PATH: &str = "/products/BTC-USD/ticker";

    fn client(server: &mockito::ServerGuard) -> CoinbasePriceClient {
        CoinbasePriceClient::new(server.url(), "BTC-USD", 6000)
            .unwrap()
            .with_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_get_quote_uses_book_mid() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", TICKER_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"price":"100010.5","bid":"100000.00","ask":"100001.00","volume":"1.2"}"#)
            .create_async()
            .await;

        let quote = client(&server).get_quote().await.unwrap();

        mock.assert_async().await;
        assert_eq!(quote.mid, dec!(100000.5));
        assert_eq!(quote.bid, Some(dec!(100000)));
    }

    #[tokio::test]
    async fn test_get_price_reads_last_trade() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", TICKER_PATH)
            .with_status(200)
            .with_body(r#"{"price":"99950.25"}"#)
            .create_async()
            .await;

        let price = client(&server).get_price().await.unwrap();
        assert_eq!(price, dec!(99950.25));
    }

    #[tokio::test]
    async fn test_unexpected_shape_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", TICKER_PATH)
            .with_status(200)
            .with_body(r#"{"message":"NotFound"}"#)
            .create_async()
            .await;

        let err = client(&server).get_price().await.unwrap_err();
        assert!(matches!(err, TradingError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_non_numeric_price_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", TICKER_PATH)
            .with_status(200)
            .with_body(r#"{"price":"NaN"}"#)
            .create_async()
            .await;

        let err = client(&server).get_price().await.unwrap_err();
        assert!(matches!(err, TradingError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_server_errors_retried_then_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", TICKER_PATH)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let err = client(&server).get_price().await.unwrap_err();

        mock.assert_async().await;
        assert!(matches!(err, TradingError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_client_errors_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", TICKER_PATH)
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        assert!(client(&server).get_price().await.is_err());
        mock.assert_async().await;
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(CoinbasePriceClient::new(COINBASE_API_BASE, "BTC-USD", 0).is_err());
    }

    #[tokio::test]
    #[ignore] // Hits the live Coinbase API
    async fn test_get_quote_live() {
        let client = CoinbasePriceClient::btc_usd().unwrap();
        let quote = client.get_quote().await.unwrap();
        assert!(quote.mid > Decimal::ZERO);
    }
}
