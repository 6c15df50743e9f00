//! Time source for server-assigned message timestamps.

use chrono::{DateTime, Duration, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock, truncated to millisecond precision so timestamps survive storage unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        truncate_millis(Utc::now())
    }
}

pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// Timestamp for the next message: `now`, unless the clock went backwards
/// past `previous`, in which case one millisecond after `previous`.
pub fn monotonic_after(now: DateTime<Utc>, previous: DateTime<Utc>) -> DateTime<Utc> {
    if now < previous {
        previous + Duration::milliseconds(1)
    } else {
        now
    }
}
