//! Heartbeat monitor.
//!
//! Holds the keep-alive deadline; the connection task sleeps until
//! [`HeartbeatMonitor::deadline`] and calls [`HeartbeatMonitor::on_tick`].
//! With a timeout configured, inbound traffic doubles as the liveness signal.

use std::time::Duration;

use tokio::time::Instant;

/// What the connection task should do for a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatTick {
    /// Write a heartbeat frame
    Send,
    /// Not connected any more; the monitor stopped itself
    Stop,
    /// Nothing was received within the timeout; the connection is presumed dead
    Expired { silent_for: Duration },
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Option<Duration>,
    next_tick: Option<Instant>,
    last_inbound: Option<Instant>,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            interval,
            timeout,
            next_tick: None,
            last_inbound: None,
        }
    }

    /// Arm the timer; called the moment the connection becomes `Connected`.
    pub fn start(&mut self, now: Instant) {
        self.next_tick = Some(now + self.interval);
        self.last_inbound = Some(now);
    }

    pub fn stop(&mut self) {
        self.next_tick = None;
        self.last_inbound = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    pub fn record_inbound(&mut self, now: Instant) {
        if self.is_running() {
            self.last_inbound = Some(now);
        }
    }

    pub fn on_tick(&mut self, now: Instant, connected: bool) -> HeartbeatTick {
        if !connected {
            self.stop();
            return HeartbeatTick::Stop;
        }

        if let (Some(timeout), Some(last)) = (self.timeout, self.last_inbound) {
            let silent_for = now.saturating_duration_since(last);
            if silent_for > timeout {
                self.stop();
                return HeartbeatTick::Expired { silent_for };
            }
        }

        self.next_tick = Some(now + self.interval);
        HeartbeatTick::Send
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn test_tick_rearms_while_connected() {
        let mut monitor = HeartbeatMonitor::new(INTERVAL, None);
        assert_eq!(monitor.deadline(), None);

        let start = Instant::now();
        monitor.start(start);
        assert_eq!(monitor.deadline(), Some(start + INTERVAL));

        let tick_at = start + INTERVAL;
        assert_eq!(monitor.on_tick(tick_at, true), HeartbeatTick::Send);
        assert_eq!(monitor.deadline(), Some(tick_at + INTERVAL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_while_disconnected_stops() {
        let mut monitor = HeartbeatMonitor::new(INTERVAL, None);
        let start = Instant::now();
        monitor.start(start);

        assert_eq!(monitor.on_tick(start + INTERVAL, false), HeartbeatTick::Stop);
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_traffic_keeps_connection_alive() {
        let mut monitor = HeartbeatMonitor::new(INTERVAL, Some(Duration::from_secs(45)));
        let start = Instant::now();
        monitor.start(start);

        monitor.record_inbound(start + Duration::from_secs(20));
        assert_eq!(monitor.on_tick(start + INTERVAL, true), HeartbeatTick::Send);
        // 40s of silence is still inside the 45s window
        assert_eq!(monitor.on_tick(start + INTERVAL * 2, true), HeartbeatTick::Send);
        assert_eq!(
            monitor.on_tick(start + INTERVAL * 3, true),
            HeartbeatTick::Expired {
                silent_for: Duration::from_secs(70)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_after_silence() {
        let mut monitor = HeartbeatMonitor::new(INTERVAL, Some(Duration::from_secs(45)));
        let start = Instant::now();
        monitor.start(start);

        assert_eq!(monitor.on_tick(start + INTERVAL, true), HeartbeatTick::Send);
        assert_eq!(
            monitor.on_tick(start + INTERVAL * 2, true),
            HeartbeatTick::Expired {
                silent_for: INTERVAL * 2
            }
        );
        assert!(!monitor.is_running());
    }
}
