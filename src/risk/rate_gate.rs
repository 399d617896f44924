use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Single-token, fixed-interval order limiter
///
/// At most one order per `min_interval`; bursts are serialized, never queued.
#[derive(Debug)]
pub struct RiskGate {
    min_interval: Duration,
    last_order_time: Mutex<Option<DateTime<Utc>>>,
}

impl RiskGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_order_time: Mutex::new(None),
        }
    }

    pub fn from_millis(min_interval_ms: i64) -> Self {
        Self::new(Duration::milliseconds(min_interval_ms))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Take the token at `now` if the interval has elapsed
    pub fn allow(&self, now: DateTime<Utc>) -> bool {
        // A poisoned lock still holds a valid timestamp
        let mut last = self
            .last_order_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match *last {
            Some(prev) if now - prev < self.min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    pub fn last_order_time(&self) -> Option<DateTime<Utc>> {
        *self
            .last_order_time
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
