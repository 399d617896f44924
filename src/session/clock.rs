use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::error::TradingError;

/// Align `t` down to the start of its enclosing `width`-wide window (UTC).
///
/// Works on whole seconds since the epoch so alignment never depends on
/// calendar fields. Sub-second precision is dropped.
pub fn window_start(t: DateTime<Utc>, width: Duration) -> Result<DateTime<Utc>, TradingError> {
    let width_secs = width.num_seconds();
    if width_secs <= 0 {
        return Err(TradingError::InvalidInput(format!(
            "window width must be positive, got {}s",
            width_secs
        )));
    }

    let aligned = t.timestamp().div_euclid(width_secs) * width_secs;
    Utc.timestamp_opt(aligned, 0)
        .single()
        .ok_or_else(|| TradingError::InvalidInput(format!("timestamp {} out of range", aligned)))
}

/// Fixed-width window arithmetic
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotClock {
    width: Duration,
}

impl SlotClock {
    pub fn new(width: Duration) -> Result<Self, TradingError> {
        if width.num_seconds() <= 0 {
            return Err(TradingError::InvalidInput(format!(
                "window width must be positive, got {}s",
                width.num_seconds()
            )));
        }
        Ok(Self { width })
    }

    pub fn from_minutes(minutes: i64) -> Result<Self, TradingError> {
        Self::new(Duration::minutes(minutes))
    }

    pub fn width(&self) -> Duration {
        self.width
    }

    pub fn window_start(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        // Width validated in the constructor, so alignment only fails for
        // timestamps chrono cannot represent; fall back to t itself.
        window_start(t, self.width).unwrap_or(t)
    }

    pub fn window_end(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        self.window_start(t) + self.width
    }

    pub fn previous_window(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        self.window_start(t) - self.width
    }

    /// Next window boundary strictly after `t`
    pub fn next_boundary(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        self.window_end(t)
    }

    /// Time left in the window containing `t`
    pub fn time_remaining(&self, t: DateTime<Utc>) -> Duration {
        self.window_end(t) - t
    }

    /// Whether `t` falls inside the window starting at `start`
    pub fn contains(&self, start: DateTime<Utc>, t: DateTime<Utc>) -> bool {
        t >= start && t < start + self.width
    }
}
