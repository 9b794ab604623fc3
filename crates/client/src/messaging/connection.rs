//! Connection lifecycle state.
//!
//! The connection task is the only writer; handles and UI code observe the
//! state through a `watch` channel so a status indicator can always be derived.

use tokio::sync::watch;

/// Lifecycle state of the client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected to the server
    Disconnected,
    /// Attempting to establish connection
    Connecting,
    /// Successfully connected
    Connected,
    /// Connection lost, waiting for the next reconnect attempt
    Reconnecting,
    /// Connection failed (max retries exceeded)
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable connection state for UI binding.
///
/// Multiple observers can share the same underlying state.
#[derive(Clone)]
pub struct ConnectionStateObserver {
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionStateObserver {
    pub fn new(state: watch::Receiver<ConnectionState>) -> Self {
        Self { state }
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Wait until the state satisfies `predicate`.
    ///
    /// Returns `None` if the connection task has shut down first.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(ConnectionState) -> bool,
    ) -> Option<ConnectionState> {
        self.state
            .wait_for(|state| predicate(*state))
            .await
            .ok()
            .map(|state| *state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_observer_follows_sender() {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        let mut observer = ConnectionStateObserver::new(rx);
        assert!(!observer.is_connected());

        tx.send_replace(ConnectionState::Connected);
        assert_eq!(
            observer.wait_for(|s| s == ConnectionState::Connected).await,
            Some(ConnectionState::Connected)
        );
        assert!(observer.is_connected());

        drop(tx);
        assert_eq!(
            observer.wait_for(|s| s == ConnectionState::Failed).await,
            None
        );
    }
}
