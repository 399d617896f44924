// Audit trail and alerting
pub mod csv_sink;

pub use csv_sink::CsvAuditSink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::execution::{LedgerSummary, SettlementRecord};
use crate::models::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditKind {
    Fill,
    Settlement,
    OrderFailed,
    Rotation,
    Equity,
}

/// One audit trail row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub kind: AuditKind,
    pub session_id: String,
    pub direction: Option<Direction>,
    pub shares: Decimal,
    pub price: Decimal,
    pub stake: Decimal,
    pub profit: Option<Decimal>,
    pub note: String,
}

impl AuditEvent {
    fn bare(kind: AuditKind, session_id: &str, note: String, at: DateTime<Utc>) -> Self {
        Self {
            at,
            kind,
            session_id: session_id.to_string(),
            direction: None,
            shares: Decimal::ZERO,
            price: Decimal::ZERO,
            stake: Decimal::ZERO,
            profit: None,
            note,
        }
    }

    pub fn fill(
        session_id: &str,
        direction: Direction,
        price: Decimal,
        stake: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            direction: Some(direction),
            shares: stake / price,
            price,
            stake,
            ..Self::bare(AuditKind::Fill, session_id, String::new(), at)
        }
    }

    pub fn settlement(record: &SettlementRecord) -> Self {
        Self {
            direction: Some(record.direction),
            shares: record.shares,
            price: record.entry_price,
            stake: record.stake,
            profit: Some(record.profit),
            ..Self::bare(
                AuditKind::Settlement,
                &record.session_id,
                format!("outcome={}", record.outcome),
                record.settled_at,
            )
        }
    }

    pub fn order_failed(
        session_id: &str,
        direction: Direction,
        price: Decimal,
        stake: Decimal,
        reason: String,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            direction: Some(direction),
            price,
            stake,
            ..Self::bare(AuditKind::OrderFailed, session_id, reason, at)
        }
    }

    pub fn rotation(session_id: &str, note: String, at: DateTime<Utc>) -> Self {
        Self::bare(AuditKind::Rotation, session_id, note, at)
    }

    /// Equity snapshot; `stake` carries open stake and `profit` realized P&L
    pub fn equity(summary: &LedgerSummary, at: DateTime<Utc>) -> Self {
        Self {
            stake: summary.open_stake,
            profit: Some(summary.realized_pnl),
            ..Self::bare(
                AuditKind::Equity,
                "",
                format!("cash={}", summary.cash_balance),
                at,
            )
        }
    }
}

/// Fire-and-forget audit trail. Implementations swallow their own failures.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Best-effort alerting
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}

/// Keeps events in memory (tests, back-tests)
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, kind: AuditKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "updownbot::audit",
            kind = ?event.kind,
            session = %event.session_id,
            direction = ?event.direction,
            price = %event.price,
            stake = %event.stake,
            profit = ?event.profit,
            note = %event.note,
            "audit"
        );
    }
}

/// Fans one event out to several sinks
#[derive(Default)]
pub struct CompositeAuditSink {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for CompositeAuditSink {
    fn record(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }
}

/// Notifier that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) {
        tracing::info!("📣 {}", text);
    }
}
