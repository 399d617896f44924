// Core modules
pub mod api;
pub mod backtest;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod models;
pub mod persistence;
pub mod risk;
pub mod session;
pub mod strategy;
pub mod telemetry;

// Re-export commonly used types
pub use api::PriceSource;
pub use config::Settings;
pub use engine::{Collaborators, Engine, TickSummary};
pub use error::TradingError;
pub use models::*;
pub use session::SessionSource;
pub use strategy::Strategy;
pub use telemetry::{AuditSink, Notifier};

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
