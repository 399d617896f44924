use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Failure taxonomy shared by the rotation, ledger and execution paths
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TradingError {
    /// Upstream data source or backend temporarily unreachable - retry next tick
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("invalid price: {0}")]
    InvalidPrice(Decimal),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Expected control flow, the order was dropped
    #[error("rate limited")]
    RateLimited,

    #[error("backend rejected order: {0}")]
    BackendRejected(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("order {order_id} exhausted after {attempts} attempts: {last_error}")]
    Exhausted {
        order_id: Uuid,
        attempts: u32,
        last_error: String,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Ledger or rotation invariant broken (e.g. a session settled twice)
    #[error("ledger corruption: {0}")]
    LedgerCorruption(String),
}

impl TradingError {
    /// Errors the executor resubmits on, up to the retry cap
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TradingError::BackendRejected(_) | TradingError::BackendUnavailable(_)
        )
    }

    /// Errors that must halt the driving loop
    pub fn is_fatal(&self) -> bool {
        matches!(self, TradingError::LedgerCorruption(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TradingError::BackendRejected("price".into()).is_retryable());
        assert!(TradingError::BackendUnavailable("timeout".into()).is_retryable());
        assert!(!TradingError::RateLimited.is_retryable());
        assert!(!TradingError::InvalidPrice(Decimal::ZERO).is_retryable());
    }

    #[test]
    fn test_only_corruption_is_fatal() {
        assert!(TradingError::LedgerCorruption("double settle".into()).is_fatal());
        assert!(!TradingError::Unavailable("feed".into()).is_fatal());
        assert!(!TradingError::Exhausted {
            order_id: Uuid::new_v4(),
            attempts: 4,
            last_error: "down".into(),
        }
        .is_fatal());
    }

    #[test]
    fn test_exhausted_message() {
        let id = Uuid::nil();
        let err = TradingError::Exhausted {
            order_id: id,
            attempts: 3,
            last_error: "backend unavailable: 503".into(),
        };
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
