//! Connection task.
//!
//! One task per client owns every piece of mutable session state: the live
//! transport, reconnect policy, heartbeat, batcher, dispatcher, outbound queue
//! and pending requests. Handles talk to it through [`Command`]s. Timers are
//! stored deadlines raced in a single `select!`, so tearing down is a matter of
//! clearing fields.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use kefu_protocol::{decode_frame, ClientFrame, PresenceUser, ServerMessage};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

use super::backoff::ReconnectPolicy;
use super::batcher::{BatcherConfig, InboundMessage, MessageBatcher, PushOutcome};
use super::dispatcher::Dispatcher;
use super::heartbeat::{HeartbeatMonitor, HeartbeatTick};
use super::transport::{Connector, Socket, SocketEvent, TransportConnection, ABNORMAL_CLOSURE};
use crate::clock::{wire_timestamp, ClockPort};
use crate::config::{ClientConfig, ConnectionTarget};
use crate::error::{ClientError, TransportError};
use crate::messaging::{ClientEvent, ConnectionState, EventEmitter, PendingRequests, RequestResult};

/// What happened to a frame handed to [`crate::RealtimeClient::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the live socket
    Sent,
    /// Held until the connection opens
    Queued,
    /// The outbound queue was full; the frame was discarded
    Dropped,
    /// Not connected and not about to be; the frame was discarded
    NotConnected,
}

/// Point-in-time view of the session, for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    pub queued_frames: usize,
    pub pending_requests: usize,
}

/// Messages from client handles to the connection task.
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Reconnect,
    Send {
        frame: ClientFrame,
        reply: oneshot::Sender<SendOutcome>,
    },
    Request {
        request_id: String,
        frame: ClientFrame,
        reply: oneshot::Sender<RequestResult>,
    },
    CancelRequest {
        request_id: String,
    },
    Close {
        code: u16,
        reason: String,
        reply: Option<oneshot::Sender<()>>,
    },
    Presence(oneshot::Sender<Vec<PresenceUser>>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

type ConnectFuture = Pin<Box<dyn Future<Output = (u64, Result<Socket, TransportError>)> + Send>>;

/// One iteration's worth of work, produced by the `select!` in [`Session::run`].
enum Step {
    Command(Command),
    Shutdown,
    ConnectResult(u64, Result<Socket, TransportError>),
    Socket(u64, SocketEvent),
    FlushBatch,
    HeartbeatTick,
    ReconnectDue,
}

pub(crate) struct Session {
    config: ClientConfig,
    target: ConnectionTarget,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn ClockPort>,
    emitter: EventEmitter,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedReceiver<Command>,

    /// Bumped for every connect attempt; events from older transports are ignored.
    generation: u64,
    connecting: Option<ConnectFuture>,
    transport: Option<TransportConnection>,

    policy: ReconnectPolicy,
    reconnect_at: Option<Instant>,
    heartbeat: HeartbeatMonitor,
    batcher: MessageBatcher,
    dispatcher: Dispatcher,
    outbound: VecDeque<ClientFrame>,
    pending: PendingRequests,
    last_error: Option<String>,
}

impl Session {
    pub(crate) fn new(
        config: ClientConfig,
        target: ConnectionTarget,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn ClockPort>,
        emitter: EventEmitter,
        state: watch::Sender<ConnectionState>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            policy: ReconnectPolicy::from_config(&config),
            heartbeat: HeartbeatMonitor::new(config.heartbeat_interval(), config.heartbeat_timeout()),
            batcher: MessageBatcher::new(BatcherConfig::from_config(&config)),
            dispatcher: Dispatcher::new(),
            outbound: VecDeque::new(),
            pending: PendingRequests::default(),
            config,
            target,
            connector,
            clock,
            emitter,
            state,
            commands,
            generation: 0,
            connecting: None,
            transport: None,
            reconnect_at: None,
            last_error: None,
        }
    }

    /// Drive the session until every handle has been dropped.
    pub(crate) async fn run(mut self) {
        loop {
            let step = {
                let batch_at = self.batcher.deadline();
                let heartbeat_at = self.heartbeat.deadline();
                let reconnect_at = self.reconnect_at;

                tokio::select! {
                    biased;

                    command = self.commands.recv() => match command {
                        Some(command) => Step::Command(command),
                        None => Step::Shutdown,
                    },
                    (generation, result) = poll_connect(&mut self.connecting) => {
                        Step::ConnectResult(generation, result)
                    }
                    (generation, event) = next_socket_event(&mut self.transport) => {
                        Step::Socket(generation, event)
                    }
                    _ = sleep_until_deadline(batch_at) => Step::FlushBatch,
                    _ = sleep_until_deadline(heartbeat_at) => Step::HeartbeatTick,
                    _ = sleep_until_deadline(reconnect_at) => Step::ReconnectDue,
                }
            };

            match step {
                Step::Command(command) => self.handle_command(command),
                Step::Shutdown => {
                    tracing::debug!("All client handles dropped, shutting down connection task");
                    self.shutdown();
                    break;
                }
                Step::ConnectResult(generation, result) => {
                    self.connecting = None;
                    self.on_connect_result(generation, result);
                }
                Step::Socket(generation, event) => self.on_socket_event(generation, event),
                Step::FlushBatch => self.flush_batch(),
                Step::HeartbeatTick => self.on_heartbeat_tick(),
                Step::ReconnectDue => {
                    self.reconnect_at = None;
                    self.start_connect();
                }
            }
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.open(),
            Command::Reconnect => self.manual_reconnect(),
            Command::Send { frame, reply } => {
                let outcome = self.send(frame);
                let _ = reply.send(outcome);
            }
            Command::Request {
                request_id,
                frame,
                reply,
            } => {
                self.pending.insert(request_id.clone(), reply);
                let failure = match self.send(frame) {
                    SendOutcome::Sent | SendOutcome::Queued => None,
                    SendOutcome::Dropped => Some(ClientError::QueueFull),
                    SendOutcome::NotConnected => Some(ClientError::NotConnected),
                };
                if let Some(error) = failure {
                    self.pending.resolve(&request_id, Err(error));
                }
            }
            Command::CancelRequest { request_id } => {
                self.pending.remove(&request_id);
            }
            Command::Close {
                code,
                reason,
                reply,
            } => {
                self.close(code, reason);
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            Command::Presence(reply) => {
                let _ = reply.send(self.dispatcher.presence().users());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(SessionSnapshot {
                    state: self.current_state(),
                    reconnect_attempts: self.policy.attempts(),
                    last_error: self.last_error.clone(),
                    queued_frames: self.outbound.len(),
                    pending_requests: self.pending.len(),
                });
            }
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&mut self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Connection state changed");
            self.emitter.emit(&ClientEvent::StateChanged(next));
        }
    }

    fn open(&mut self) {
        match self.current_state() {
            ConnectionState::Connected | ConnectionState::Connecting => {
                tracing::debug!("Connect requested while already connected or connecting");
            }
            ConnectionState::Reconnecting => {
                self.reconnect_at = None;
                self.start_connect();
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.policy.reset();
                self.start_connect();
            }
        }
    }

    fn manual_reconnect(&mut self) {
        match self.current_state() {
            ConnectionState::Connected | ConnectionState::Connecting => {
                tracing::debug!("Reconnect requested while already connected or connecting");
            }
            ConnectionState::Reconnecting
            | ConnectionState::Disconnected
            | ConnectionState::Failed => {
                tracing::info!("Manual reconnect requested");
                self.policy.reset();
                self.reconnect_at = None;
                self.start_connect();
            }
        }
    }

    fn start_connect(&mut self) {
        // At most one live transport per client.
        self.connecting = None;
        self.transport = None;

        self.generation += 1;
        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let url = self.target.url();
        tracing::info!(
            generation,
            attempt = self.policy.attempts(),
            url = %self.target.base_url(),
            "Connecting to realtime server"
        );

        self.connecting = Some(Box::pin(async move {
            let result = connector.connect(&url).await;
            (generation, result)
        }));
        self.set_state(ConnectionState::Connecting);
    }

    fn on_connect_result(&mut self, generation: u64, result: Result<Socket, TransportError>) {
        if generation != self.generation {
            tracing::debug!(generation, current = self.generation, "Ignoring stale connect result");
            return;
        }

        match result {
            Ok(socket) => {
                self.transport = Some(TransportConnection::new(generation, socket));
                self.policy.reset();
                self.last_error = None;
                tracing::info!(generation, "Connected to realtime server");
                self.set_state(ConnectionState::Connected);
                self.emitter.emit(&ClientEvent::Opened);
                self.heartbeat.start(Instant::now());
                self.flush_outbound();
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt = self.policy.attempts(), "Connect failed");
                let detail = e.to_string();
                self.last_error = Some(detail.clone());
                self.emitter.emit(&ClientEvent::Error { detail });
                self.schedule_reconnect();
            }
        }
    }

    fn on_socket_event(&mut self, generation: u64, event: SocketEvent) {
        if generation != self.generation {
            tracing::debug!(generation, current = self.generation, "Ignoring event from discarded transport");
            return;
        }

        match event {
            SocketEvent::Text(raw) => self.on_text(raw),
            SocketEvent::Closed {
                was_clean,
                code,
                reason,
            } => {
                self.drop_connection();
                self.emitter.emit(&ClientEvent::Closed {
                    was_clean,
                    code,
                    reason,
                });
                if was_clean {
                    tracing::info!(code = ?code, "Server closed the connection");
                    self.outbound.clear();
                    self.set_state(ConnectionState::Disconnected);
                } else {
                    tracing::warn!(code = ?code, "Connection lost");
                    self.schedule_reconnect();
                }
            }
            SocketEvent::Error(detail) => {
                tracing::warn!(error = %detail, "Transport error");
                self.last_error = Some(detail.clone());
                self.emitter.emit(&ClientEvent::Error {
                    detail: detail.clone(),
                });
                // The transport is discarded here, so its trailing close is never seen.
                self.drop_connection();
                self.emitter.emit(&ClientEvent::Closed {
                    was_clean: false,
                    code: Some(ABNORMAL_CLOSURE),
                    reason: detail,
                });
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        match self.policy.next_delay_and_advance() {
            Some(delay) => {
                let attempt = self.policy.attempts();
                tracing::info!(
                    attempt,
                    max_attempts = self.policy.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                self.reconnect_at = Some(Instant::now() + delay);
                self.set_state(ConnectionState::Reconnecting);
                self.emitter
                    .emit(&ClientEvent::ReconnectScheduled { attempt, delay });
            }
            None => {
                let attempts = self.policy.attempts();
                tracing::error!(attempts, "Reconnect attempts exhausted");
                self.reconnect_at = None;
                if !self.outbound.is_empty() {
                    tracing::debug!(discarded = self.outbound.len(), "Discarding queued frames");
                    self.outbound.clear();
                }
                self.set_state(ConnectionState::Failed);
                self.emitter
                    .emit(&ClientEvent::ReconnectExhausted { attempts });
            }
        }
    }

    /// Forget the live transport after it failed or closed. Anything already
    /// buffered is still delivered.
    fn drop_connection(&mut self) {
        self.transport = None;
        self.connecting = None;
        self.heartbeat.stop();
        self.flush_batch();
    }

    fn close(&mut self, code: u16, reason: String) {
        tracing::info!(code, reason = %reason, "Closing connection");
        let released = self.teardown(Some((code, reason.as_str())));
        self.set_state(ConnectionState::Disconnected);
        // Nothing to report when no socket or connect attempt was live
        if released {
            self.emitter.emit(&ClientEvent::Closed {
                was_clean: true,
                code: Some(code),
                reason,
            });
        }
    }

    fn shutdown(&mut self) {
        self.teardown(Some((1000, "client dropped")));
        self.set_state(ConnectionState::Disconnected);
    }

    /// Release every resource and cancel every timer. Returns whether a
    /// transport or pending connect attempt was released.
    fn teardown(&mut self, close_frame: Option<(u16, &str)>) -> bool {
        let mut released = self.connecting.take().is_some();
        if let Some(transport) = self.transport.take() {
            released = true;
            if let Some((code, reason)) = close_frame {
                transport.close(code, reason);
            }
        }
        self.heartbeat.stop();
        self.reconnect_at = None;
        self.policy.reset();
        self.batcher.clear();
        self.outbound.clear();
        self.dispatcher.reset();
        let cancelled = self.pending.fail_all(|| ClientError::Closed);
        if cancelled > 0 {
            tracing::debug!(cancelled, "Cancelled pending requests");
        }
        released
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    fn send(&mut self, frame: ClientFrame) -> SendOutcome {
        match self.current_state() {
            ConnectionState::Connected => {
                if self.write_frame(&frame) {
                    SendOutcome::Sent
                } else {
                    self.enqueue(frame)
                }
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => self.enqueue(frame),
            ConnectionState::Disconnected | ConnectionState::Failed => {
                tracing::debug!(kind = %frame.kind, "Send while not connected");
                SendOutcome::NotConnected
            }
        }
    }

    fn enqueue(&mut self, frame: ClientFrame) -> SendOutcome {
        let capacity = self.config.outbound_queue_capacity;
        if capacity == 0 {
            return SendOutcome::NotConnected;
        }
        if self.outbound.len() >= capacity {
            tracing::warn!(capacity, kind = %frame.kind, "Outbound queue full, dropping frame");
            return SendOutcome::Dropped;
        }
        self.outbound.push_back(frame);
        SendOutcome::Queued
    }

    fn write_frame(&mut self, frame: &ClientFrame) -> bool {
        let Some(transport) = self.transport.as_ref() else {
            return false;
        };
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(kind = %frame.kind, "Failed to serialize frame: {}", e);
                return false;
            }
        };
        match transport.send_text(text) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(kind = %frame.kind, error = %e, "Failed to write frame");
                false
            }
        }
    }

    fn flush_outbound(&mut self) {
        if self.outbound.is_empty() {
            return;
        }
        tracing::debug!(queued = self.outbound.len(), "Flushing outbound queue");
        while let Some(frame) = self.outbound.pop_front() {
            if !self.write_frame(&frame) {
                self.outbound.push_front(frame);
                break;
            }
        }
    }

    fn on_heartbeat_tick(&mut self) {
        let connected = self.current_state() == ConnectionState::Connected;
        match self.heartbeat.on_tick(Instant::now(), connected) {
            HeartbeatTick::Send => {
                let frame = ClientFrame::heartbeat(wire_timestamp(self.clock.as_ref()));
                if !self.write_frame(&frame) {
                    tracing::debug!("Heartbeat not written");
                }
            }
            HeartbeatTick::Stop => {}
            HeartbeatTick::Expired { silent_for } => {
                tracing::warn!(
                    silent_ms = silent_for.as_millis() as u64,
                    "No inbound traffic within heartbeat timeout, treating connection as lost"
                );
                self.drop_connection();
                self.emitter.emit(&ClientEvent::Closed {
                    was_clean: false,
                    code: None,
                    reason: "heartbeat timeout".to_string(),
                });
                self.schedule_reconnect();
            }
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    fn on_text(&mut self, raw: String) {
        let now = Instant::now();
        self.heartbeat.record_inbound(now);
        self.emitter.emit(&ClientEvent::RawFrame(raw.clone()));

        let frame = match decode_frame(&raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                self.emitter.emit(&ClientEvent::ParseError {
                    detail: e.to_string(),
                    raw,
                });
                return;
            }
        };

        if let Some(request_id) = frame.request_id.as_deref() {
            if self.pending.contains(request_id) {
                let result = match frame.typed() {
                    Some(ServerMessage::Error { message, code }) => Err(ClientError::Server {
                        message: message.clone(),
                        code: code.clone(),
                    }),
                    _ => Ok(frame.to_value()),
                };
                self.pending.resolve(request_id, result);
                return;
            }
        }

        match self.batcher.push(InboundMessage::new(frame, now), now) {
            PushOutcome::Dispatch(message) => self.dispatch(message),
            PushOutcome::Flush => self.flush_batch(),
            PushOutcome::Buffered | PushOutcome::Duplicate => {}
        }
    }

    fn flush_batch(&mut self) {
        let batch = self.batcher.flush();
        if batch.is_empty() {
            return;
        }
        tracing::trace!(size = batch.len(), "Flushing inbound batch");
        for message in batch {
            self.dispatch(message);
        }
    }

    fn dispatch(&mut self, message: InboundMessage) {
        for event in self.dispatcher.dispatch(message.frame) {
            self.emitter.emit(&event);
        }
    }
}

async fn poll_connect(connecting: &mut Option<ConnectFuture>) -> (u64, Result<Socket, TransportError>) {
    match connecting {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn next_socket_event(transport: &mut Option<TransportConnection>) -> (u64, SocketEvent) {
    match transport {
        Some(transport) => (transport.generation(), transport.next_event().await),
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
