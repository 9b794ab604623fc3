//! Wall-clock port used for outbound frame timestamps.
//!
//! Scheduling (heartbeat, batching, backoff) runs on `tokio::time::Instant`;
//! this port only supplies the RFC 3339 `timestamp` field of outbound frames.

use chrono::{DateTime, SecondsFormat, Utc};

#[cfg_attr(test, mockall::automock)]
pub trait ClockPort: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock - uses real time.
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPort for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Format a timestamp the way outbound frames carry it.
pub fn wire_timestamp(clock: &dyn ClockPort) -> String {
    clock.now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
