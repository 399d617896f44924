// Order execution and position accounting
pub mod backend;
pub mod executor;
pub mod ledger;

pub use backend::{ExecutionMode, OrderBackend, PaperBackend, Placement};
pub use executor::{ExecutorConfig, OrderExecutor, OrderStatus, PendingOrder, ReapReport, SubmitOutcome};
pub use ledger::{
    FillOrigin, LedgerSnapshot, LedgerSummary, Position, PositionLedger, PositionStatus, SettlementRecord,
};
