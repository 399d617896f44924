use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::TradingError;
use crate::models::Direction;

/// How a backend's fills must be accounted for in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Fills are simulated in-process and the ledger owns the stake deduction
    Simulated,
    /// Fills are confirmed by a live venue which reports balances
    Live,
}

/// Backend acknowledgement of a placed order
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub backend_id: String,
    /// True when the order filled immediately on placement
    pub filled: bool,
}

/// Execution venue the executor talks to
#[async_trait]
pub trait OrderBackend: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Place a limit order for `size` shares at `price`
    async fn place(
        &self,
        direction: Direction,
        price: Decimal,
        size: Decimal,
    ) -> Result<Placement, TradingError>;

    async fn cancel(&self, backend_id: &str) -> Result<(), TradingError>;
}

/// Simulated execution: every order fills immediately at its limit price
#[derive(Debug, Default)]
pub struct PaperBackend {
    next_id: AtomicU64,
}

impl PaperBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of orders placed so far
    pub fn placed(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderBackend for PaperBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Simulated
    }

    async fn place(
        &self,
        direction: Direction,
        price: Decimal,
        size: Decimal,
    ) -> Result<Placement, TradingError> {
        if price <= Decimal::ZERO || price > Decimal::ONE {
            return Err(TradingError::BackendRejected(format!(
                "price {} outside (0, 1]",
                price
            )));
        }
        if size <= Decimal::ZERO {
            return Err(TradingError::BackendRejected(format!("size {} not positive", size)));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let backend_id = format!("paper-{}", n);
        tracing::debug!(%backend_id, %direction, %price, %size, "Paper order filled");

        Ok(Placement {
            backend_id,
            filled: true,
        })
    }

    async fn cancel(&self, backend_id: &str) -> Result<(), TradingError> {
        tracing::debug!(%backend_id, "Paper order cancelled");
        Ok(())
    }
}
