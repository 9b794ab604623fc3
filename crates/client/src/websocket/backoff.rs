//! Reconnect policy: attempt counting and backoff delay math.
//!
//! Free of any socket or runtime concerns; the connection task asks it for the
//! next delay and arms its own timer.

use std::time::Duration;

use rand::Rng;

use crate::config::{BackoffStrategy, ClientConfig};

/// Backoff state shared by reconnect logic.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    strategy: BackoffStrategy,
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    jitter_factor: f64,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            strategy: config.backoff,
            base_delay: config.reconnect_interval(),
            max_delay: config.max_reconnect_delay(),
            max_attempts: config.max_reconnect_attempts,
            jitter_factor: config.reconnect_jitter,
            attempts: 0,
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Delay before attempt number `attempt` (1-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self.strategy {
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            // Exponential: base * 2^(attempt-1)
            BackoffStrategy::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1)),
        };
        raw.min(self.max_delay)
    }

    /// Advance to the next attempt and return the delay to wait before it.
    ///
    /// Returns `None` once `max_attempts` retries have been scheduled.
    pub fn next_delay_and_advance(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempts += 1;
        Some(self.apply_jitter(self.delay_for(self.attempts)))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        // Delays are bounded by `validate`, so milliseconds fit in an i64
        let millis = delay.as_millis() as i64;
        let jitter_range = (millis as f64 * self.jitter_factor) as i64;
        if jitter_range <= 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        let jittered = (millis + jitter).max(0) as u64;
        Duration::from_millis(jittered).min(self.max_delay)
    }
}
