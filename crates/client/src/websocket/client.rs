//! Client handle.
//!
//! `RealtimeClient` is a cheap, cloneable front for the connection task. It
//! owns no session state itself: commands go over a channel, state is read
//! from a `watch`, and events are published through the shared
//! [`EventEmitter`].

use std::sync::Arc;
use std::time::Duration;

use kefu_protocol::{ClientFrame, PresenceUser};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use super::session::{Command, SendOutcome, Session, SessionSnapshot};
use super::transport::Connector;
use crate::clock::{wire_timestamp, ClockPort, SystemClock};
use crate::config::{ClientConfig, ConfigError, ConnectionTarget};
use crate::error::ClientError;
use crate::messaging::{
    ClientEvent, ConnectionState, ConnectionStateObserver, EventEmitter, EventKind,
    SubscriptionId,
};

/// Normal closure code used by [`RealtimeClient::disconnect`].
pub const NORMAL_CLOSURE: u16 = 1000;

/// Handle to one realtime session.
///
/// Clones share the same connection. The connection task stops, and the
/// socket is closed, once every clone has been dropped.
#[derive(Clone)]
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    emitter: EventEmitter,
    state: watch::Receiver<ConnectionState>,
    clock: Arc<dyn ClockPort>,
    request_timeout: Duration,
}

impl RealtimeClient {
    /// Validate `config` and spawn the connection task.
    ///
    /// Must be called from within a Tokio runtime. Does not connect; call
    /// [`RealtimeClient::connect`].
    pub fn new(
        config: ClientConfig,
        target: ConnectionTarget,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(config, target, connector, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(
        config: ClientConfig,
        target: ConnectionTarget,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn ClockPort>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let emitter = EventEmitter::new();
        let request_timeout = config.request_timeout();

        let session = Session::new(
            config,
            target,
            connector,
            Arc::clone(&clock),
            emitter.clone(),
            state_tx,
            cmd_rx,
        );
        tokio::spawn(session.run());

        Ok(Self {
            commands: cmd_tx,
            emitter,
            state: state_rx,
            clock,
            request_timeout,
        })
    }

    fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::TaskGone)
    }

    /// Open the connection. A no-op while connected or connecting.
    pub fn connect(&self) -> Result<(), ClientError> {
        self.command(Command::Connect)
    }

    /// Retry immediately, resetting the attempt counter. Intended for a
    /// "retry" button once the client reached `Failed`.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Reconnect)
    }

    /// Send a fire-and-forget frame of the given type.
    pub async fn send(&self, kind: &str, payload: Value) -> Result<SendOutcome, ClientError> {
        let frame = ClientFrame::new(kind, payload, wire_timestamp(self.clock.as_ref()));
        self.send_frame(frame).await
    }

    pub async fn send_frame(&self, frame: ClientFrame) -> Result<SendOutcome, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send { frame, reply })?;
        rx.await.map_err(|_| ClientError::TaskGone)
    }

    /// Send a frame tagged with a fresh `request_id` and wait for the frame
    /// that echoes it.
    ///
    /// Times out after `request_timeout_ms`; the pending entry is removed so a
    /// late response is ignored.
    pub async fn request(&self, kind: &str, payload: Value) -> Result<Value, ClientError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let frame = ClientFrame::new(kind, payload, wire_timestamp(self.clock.as_ref()))
            .with_request_id(request_id.clone());
        let (reply, rx) = oneshot::channel();

        self.command(Command::Request {
            request_id: request_id.clone(),
            frame,
            reply,
        })?;

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::TaskGone),
            Err(_) => {
                let _ = self.command(Command::CancelRequest {
                    request_id: request_id.clone(),
                });
                tracing::debug!(
                    request_id = %request_id,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Request timed out - cleaned up pending request entry"
                );
                Err(ClientError::RequestTimeout {
                    request_id,
                    timeout: self.request_timeout,
                })
            }
        }
    }

    /// Close the connection and wait until teardown has finished.
    ///
    /// Suppresses reconnection; pending requests fail with `ClientError::Closed`.
    pub async fn close(&self, code: u16, reason: &str) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Close {
            code,
            reason: reason.to_string(),
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| ClientError::TaskGone)
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.close(NORMAL_CLOSURE, "client disconnect").await
    }

    /// Request a close without waiting. Usable from `Drop`.
    pub fn begin_close(&self, code: u16, reason: &str) {
        let _ = self.command(Command::Close {
            code,
            reason: reason.to_string(),
            reply: None,
        });
    }

    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.emitter.on(kind, callback)
    }

    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.emitter.off(kind, id)
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn state_observer(&self) -> ConnectionStateObserver {
        ConnectionStateObserver::new(self.state.clone())
    }

    /// Current presence list, sorted by user id.
    pub async fn presence(&self) -> Result<Vec<PresenceUser>, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Presence(reply))?;
        rx.await.map_err(|_| ClientError::TaskGone)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Snapshot(reply))?;
        rx.await.map_err(|_| ClientError::TaskGone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Identity;
    use crate::testing::{EventLog, FakeConnector, FakeServer};
    use crate::websocket::transport::MockConnector;
    use crate::TransportError;
    use kefu_protocol::PresenceStatus;
    use serde_json::json;

    fn target() -> ConnectionTarget {
        ConnectionTarget::new(
            "ws://chat.test/ws",
            Identity::User {
                user_id: "agent-1".into(),
                user_type: "agent".into(),
            },
        )
        .unwrap()
    }

    fn config() -> ClientConfig {
        ClientConfig {
            max_reconnect_attempts: 3,
            ..ClientConfig::default()
        }
    }

    fn client_with(config: ClientConfig, connector: &FakeConnector) -> (RealtimeClient, EventLog) {
        let client = RealtimeClient::new(config, target(), Arc::new(connector.clone())).unwrap();
        let log = EventLog::attach(client.emitter());
        (client, log)
    }

    async fn connected(connector: &FakeConnector, client: &RealtimeClient) -> FakeServer {
        client.connect().unwrap();
        let server = connector.next_server().await;
        client
            .state_observer()
            .wait_for(|s| s == ConnectionState::Connected)
            .await
            .unwrap();
        server
    }

    /// Let the connection task drain everything already in flight.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_encodes_identity_in_url() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(config(), &connector);
        let _server = connected(&connector, &client).await;

        let urls = connector.urls();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].query(), Some("user_id=agent-1&user_type=agent"));
        assert_eq!(
            log.states(),
            vec![ConnectionState::Connecting, ConnectionState::Connected]
        );
        assert_eq!(log.count(|e| matches!(e, ClientEvent::Opened)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connected_is_noop() {
        let connector = FakeConnector::new();
        let (client, _log) = client_with(config(), &connector);
        let _server = connected(&connector, &client).await;

        client.connect().unwrap();
        settle().await;
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_scenario() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(config(), &connector);
        let server = connected(&connector, &client).await;

        connector.refuse_next(3);
        let start = tokio::time::Instant::now();
        server.drop_abruptly();

        let mut observer = client.state_observer();
        observer
            .wait_for(|s| s == ConnectionState::Failed)
            .await
            .unwrap();

        // 1000 + 2000 + 3000 ms of backoff elapsed on the virtual clock
        assert!(start.elapsed() >= Duration::from_millis(6_000));
        assert_eq!(
            log.reconnect_delays(),
            vec![
                Duration::from_millis(1_000),
                Duration::from_millis(2_000),
                Duration::from_millis(3_000)
            ]
        );
        assert_eq!(connector.connect_count(), 4);

        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(
            log.count(|e| matches!(e, ClientEvent::ReconnectExhausted { attempts: 3 })),
            1
        );
        assert_eq!(connector.connect_count(), 4);
        assert_eq!(client.state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_reconnect_resets_attempts() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(config(), &connector);
        let server = connected(&connector, &client).await;

        connector.refuse_next(1);
        server.drop_abruptly();
        let _second = connector.next_server().await;
        client
            .state_observer()
            .wait_for(|s| s == ConnectionState::Connected)
            .await
            .unwrap();

        let snapshot = client.snapshot().await.unwrap();
        assert_eq!(snapshot.reconnect_attempts, 0);
        assert_eq!(snapshot.last_error, None);
        assert_eq!(log.count(|e| matches!(e, ClientEvent::Opened)), 2);
        assert_eq!(log.reconnect_delays().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_server_close_does_not_reconnect() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(config(), &connector);
        let server = connected(&connector, &client).await;

        server.close_clean(1000, "maintenance");
        client
            .state_observer()
            .wait_for(|s| s == ConnectionState::Disconnected)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;

        assert_eq!(connector.connect_count(), 1);
        assert!(log.reconnect_delays().is_empty());
        assert_eq!(
            log.count(|e| matches!(
                e,
                ClientEvent::Closed {
                    was_clean: true,
                    code: Some(1000),
                    ..
                }
            )),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_schedules_single_reconnect() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(config(), &connector);
        let server = connected(&connector, &client).await;

        server.fail("connection reset");
        let _second = connector.next_server().await;
        client
            .state_observer()
            .wait_for(|s| s == ConnectionState::Connected)
            .await
            .unwrap();

        assert_eq!(log.count(|e| matches!(e, ClientEvent::Error { .. })), 1);
        assert_eq!(log.reconnect_delays(), vec![Duration::from_millis(1_000)]);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_transport_is_ever_live() {
        let connector = FakeConnector::new();
        let (client, _log) = client_with(config(), &connector);
        let first = connected(&connector, &client).await;

        first.fail("connection reset");
        let second = connector.next_server().await;
        client
            .state_observer()
            .wait_for(|s| s == ConnectionState::Connected)
            .await
            .unwrap();

        assert!(first.is_detached());
        assert!(!second.is_detached());

        client.reconnect().unwrap();
        settle().await;
        // Already connected: nothing new was opened
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_burst_delivered_in_one_ordered_flush() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(config(), &connector);
        let server = connected(&connector, &client).await;

        for i in 1..=5 {
            server.send_json(json!({
                "type": "Chat", "message_id": format!("m{i}"), "sender_id": "c1", "content": format!("m{i}")
            }));
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        settle().await;
        assert!(log.chats().is_empty(), "nothing delivered before the window closes");

        tokio::time::sleep(Duration::from_millis(20)).await;
        settle().await;
        assert_eq!(log.chats(), vec!["m1", "m2", "m3", "m4", "m5"]);
        assert_eq!(log.count(|e| matches!(e, ClientEvent::RawFrame(_))), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivered_chat_is_dropped() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(config(), &connector);
        let server = connected(&connector, &client).await;

        let chat = json!({"type": "Chat", "message_id": "m1", "sender_id": "c1", "content": "hello"});
        server.send_json(chat.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.send_json(chat);
        tokio::time::sleep(Duration::from_millis(50)).await;
        settle().await;

        assert_eq!(log.chats(), vec!["hello"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_snapshot_then_status_change() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(config(), &connector);
        let server = connected(&connector, &client).await;

        // Both frames land in the same batch window
        server.send_json(json!({
            "type": "OnlineUsers",
            "users": [
                {"user_id": "A", "status": "online"},
                {"user_id": "B", "status": "offline"}
            ]
        }));
        server.send_json(json!({"type": "UserStatusChange", "user_id": "B", "status": "online"}));
        settle().await;
        assert!(log.presence_updates().is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        settle().await;

        let updates = log.presence_updates();
        assert_eq!(updates.len(), 2);
        let updated: Vec<&str> = updates[1].updated.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(updated, vec!["B"]);

        let presence = client.presence().await.unwrap();
        assert_eq!(presence.len(), 2);
        assert!(presence.iter().all(|u| u.status == PresenceStatus::Online));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_change_in_join_window_keeps_profile() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(config(), &connector);
        let server = connected(&connector, &client).await;

        server.send_json(json!({
            "type": "UserJoined", "user_id": "B", "name": "Bob", "user_type": "customer"
        }));
        server.send_json(json!({"type": "UserStatusChange", "user_id": "B", "status": "away"}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        settle().await;

        assert_eq!(log.presence_updates().len(), 1);
        let presence = client.presence().await.unwrap();
        assert_eq!(presence.len(), 1);
        assert_eq!(presence[0].name.as_deref(), Some("Bob"));
        assert_eq!(presence[0].user_type.as_deref(), Some("customer"));
        assert_eq!(presence[0].status, PresenceStatus::Away);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_join_in_one_window_emits_one_update() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(config(), &connector);
        let server = connected(&connector, &client).await;

        server.send_json(json!({"type": "UserJoined", "user_id": "A", "name": "Ann"}));
        server.send_json(json!({"type": "UserJoined", "user_id": "A", "name": "Annie"}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        settle().await;

        let updates = log.presence_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].added.len(), 1);
        assert_eq!(updates[0].added[0].name.as_deref(), Some("Annie"));
        assert_eq!(log.count(|e| matches!(e, ClientEvent::RawFrame(_))), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_keeps_connection_open() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(config(), &connector);
        let server = connected(&connector, &client).await;

        server.send_text("{not json");
        server.send_json(json!({"type": "UserLeft"}));
        server.send_json(json!({"type": "System", "message": "still here"}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        settle().await;

        assert_eq!(log.count(|e| matches!(e, ClientEvent::ParseError { .. })), 2);
        assert_eq!(log.count(|e| matches!(e, ClientEvent::System { .. })), 1);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_frames_sent_on_interval() {
        let connector = FakeConnector::new();
        let (client, _log) = client_with(config(), &connector);
        let mut server = connected(&connector, &client).await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;

        let frames = server.drain_frames();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f["type"] == "heartbeat"));
        assert!(frames[0]["timestamp"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_heartbeats_trigger_reconnect() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(
            ClientConfig {
                heartbeat_timeout_ms: Some(45_000),
                ..config()
            },
            &connector,
        );
        let _silent = connected(&connector, &client).await;

        let _second = connector.next_server().await;
        assert_eq!(log.count(|e| matches!(e, ClientEvent::Closed { was_clean: false, .. })), 1);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_queued_while_connecting_flush_on_open() {
        let connector = FakeConnector::new();
        connector.hold_next();
        let (client, _log) = client_with(config(), &connector);

        client.connect().unwrap();
        settle().await;
        assert_eq!(client.state(), ConnectionState::Connecting);
        assert_eq!(
            client.send("chat", json!({"content": "one"})).await.unwrap(),
            SendOutcome::Queued
        );
        assert_eq!(
            client.send("chat", json!({"content": "two"})).await.unwrap(),
            SendOutcome::Queued
        );

        connector.release();
        let mut server = connector.next_server().await;
        let first = server.next_frame().await.unwrap();
        let second = server.next_frame().await.unwrap();
        assert_eq!(first["payload"]["content"], "one");
        assert_eq!(second["payload"]["content"], "two");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_policy_outside_connected() {
        let connector = FakeConnector::new();
        connector.hold_next();
        let (client, _log) = client_with(
            ClientConfig {
                outbound_queue_capacity: 1,
                ..config()
            },
            &connector,
        );

        assert_eq!(
            client.send("chat", json!({})).await.unwrap(),
            SendOutcome::NotConnected
        );

        client.connect().unwrap();
        assert_eq!(client.send("chat", json!({})).await.unwrap(), SendOutcome::Queued);
        assert_eq!(client.send("chat", json!({})).await.unwrap(), SendOutcome::Dropped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_resolved_by_echoed_id() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(config(), &connector);
        let mut server = connected(&connector, &client).await;

        let responder = tokio::spawn(async move {
            let frame = server.next_frame().await.unwrap();
            let request_id = frame["request_id"].as_str().unwrap().to_string();
            server.send_json(json!({"type": "Status", "status": "ok", "request_id": request_id}));
            server
        });

        let response = client.request("get_status", json!({})).await.unwrap();
        assert_eq!(response["status"], "ok");
        let _server = responder.await.unwrap();

        settle().await;
        // Responses bypass the batcher and dispatcher
        assert_eq!(log.count(|e| matches!(e, ClientEvent::Status { .. })), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_error_frame_maps_to_server_error() {
        let connector = FakeConnector::new();
        let (client, _log) = client_with(config(), &connector);
        let mut server = connected(&connector, &client).await;

        tokio::spawn(async move {
            let frame = server.next_frame().await.unwrap();
            server.send_json(json!({
                "type": "Error", "message": "denied", "code": "403",
                "request_id": frame["request_id"]
            }));
            server
        });

        let err = client.request("transfer", json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::Server { message, .. } if message == "denied"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_and_is_cleaned_up() {
        let connector = FakeConnector::new();
        let (client, _log) = client_with(config(), &connector);
        let _server = connected(&connector, &client).await;

        let err = client.request("get_status", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::RequestTimeout { timeout, .. } if timeout == Duration::from_secs(10)
        ));
        assert_eq!(client.snapshot().await.unwrap().pending_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_everything() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(
            ClientConfig {
                heartbeat_timeout_ms: Some(45_000),
                ..config()
            },
            &connector,
        );
        let mut server = connected(&connector, &client).await;

        server.send_json(json!({"type": "Chat", "sender_id": "c1", "content": "pending"}));
        settle().await;

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.request("get_status", json!({})).await })
        };
        settle().await;

        client.close(1000, "bye").await.unwrap();
        assert!(matches!(waiting.await.unwrap(), Err(ClientError::Closed)));
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let before = log.len();
        tokio::time::sleep(Duration::from_secs(300)).await;
        settle().await;

        // No heartbeat, batch flush or reconnect fired after close
        assert_eq!(log.len(), before);
        assert!(log.chats().is_empty());
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(server.close_frame().await, Some((1000, "bye".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_every_handle_closes_socket() {
        let connector = FakeConnector::new();
        let (client, _log) = client_with(config(), &connector);
        let mut server = connected(&connector, &client).await;

        drop(client);
        assert_eq!(server.close_frame().await, Some((1000, "client dropped".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_subscriber_does_not_stop_delivery() {
        let connector = FakeConnector::new();
        let (client, log) = client_with(config(), &connector);
        client.on(EventKind::Chat, |_| panic!("subscriber bug"));
        let server = connected(&connector, &client).await;

        server.send_json(json!({"type": "Chat", "sender_id": "c1", "content": "survives"}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        settle().await;

        assert_eq!(log.chats(), vec!["survives"]);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reconnect_from_failed() {
        let connector = FakeConnector::new();
        connector.refuse_next(4);
        let (client, _log) = client_with(config(), &connector);

        client.connect().unwrap();
        client
            .state_observer()
            .wait_for(|s| s == ConnectionState::Failed)
            .await
            .unwrap();

        client.reconnect().unwrap();
        let _server = connector.next_server().await;
        client
            .state_observer()
            .wait_for(|s| s == ConnectionState::Connected)
            .await
            .unwrap();
        assert_eq!(connector.connect_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_from_failed_reports_no_socket_close() {
        let connector = FakeConnector::new();
        connector.refuse_next(4);
        let (client, log) = client_with(config(), &connector);

        client.connect().unwrap();
        client
            .state_observer()
            .wait_for(|s| s == ConnectionState::Failed)
            .await
            .unwrap();
        let closed_before = log.count(|e| matches!(e, ClientEvent::Closed { .. }));

        client.disconnect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(
            log.count(|e| matches!(e, ClientEvent::Closed { .. })),
            closed_before
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_connector_refusal_surfaces_error() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_| Err(TransportError::Connect("refused".into())));

        let client = RealtimeClient::new(
            ClientConfig {
                max_reconnect_attempts: 0,
                ..ClientConfig::default()
            },
            target(),
            Arc::new(connector),
        )
        .unwrap();
        let log = EventLog::attach(client.emitter());

        client.connect().unwrap();
        client
            .state_observer()
            .wait_for(|s| s == ConnectionState::Failed)
            .await
            .unwrap();

        assert_eq!(log.count(|e| matches!(e, ClientEvent::Error { detail } if detail.contains("refused"))), 1);
        assert_eq!(
            log.count(|e| matches!(e, ClientEvent::ReconnectExhausted { attempts: 0 })),
            1
        );
        assert_eq!(
            client.snapshot().await.unwrap().last_error.as_deref(),
            Some("Connect failed: refused")
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let connector = FakeConnector::new();
        let result = RealtimeClient::new(
            ClientConfig {
                heartbeat_interval_ms: 0,
                ..ClientConfig::default()
            },
            target(),
            Arc::new(connector),
        );
        assert!(result.is_err());
    }
}
