//! In-memory test doubles.
//!
//! [`FakeConnector`] hands out channel-backed sockets and gives the test a
//! [`FakeServer`] for each accepted connection, so lifecycle scenarios run on
//! paused virtual time without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use url::Url;

use crate::error::TransportError;
use crate::messaging::{ClientEvent, ConnectionState, EventEmitter, EventKind, PresenceUpdate};
use crate::websocket::{Connector, Socket, SocketEvent, WireFrame};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy)]
enum Scripted {
    Refuse,
    Hold,
}

struct ConnectorInner {
    script: Mutex<VecDeque<Scripted>>,
    urls: Mutex<Vec<Url>>,
    connects: AtomicUsize,
    release: Notify,
    servers_tx: mpsc::UnboundedSender<FakeServer>,
    servers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeServer>>,
}

/// Scriptable connector. Connections are accepted unless a refusal or hold
/// has been queued for the next attempts.
#[derive(Clone)]
pub struct FakeConnector {
    inner: Arc<ConnectorInner>,
}

impl FakeConnector {
    pub fn new() -> Self {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ConnectorInner {
                script: Mutex::new(VecDeque::new()),
                urls: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
                release: Notify::new(),
                servers_tx,
                servers_rx: tokio::sync::Mutex::new(servers_rx),
            }),
        }
    }

    /// Refuse the next `count` connect attempts.
    pub fn refuse_next(&self, count: usize) {
        let mut script = lock(&self.inner.script);
        script.extend(std::iter::repeat(Scripted::Refuse).take(count));
    }

    /// Keep the next connect attempt pending until [`FakeConnector::release`].
    pub fn hold_next(&self) {
        lock(&self.inner.script).push_back(Scripted::Hold);
    }

    pub fn release(&self) {
        self.inner.release.notify_one();
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<Url> {
        lock(&self.inner.urls).clone()
    }

    /// Wait for the next accepted connection.
    pub async fn next_server(&self) -> FakeServer {
        let mut servers = self.inner.servers_rx.lock().await;
        match servers.recv().await {
            Some(server) => server,
            None => unreachable!("the connector owns the sending half"),
        }
    }
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, url: &Url) -> Result<Socket, TransportError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.urls).push(url.clone());

        let next = lock(&self.inner.script).pop_front();
        match next {
            Some(Scripted::Refuse) => {
                return Err(TransportError::Connect("refused by fake server".into()));
            }
            Some(Scripted::Hold) => self.inner.release.notified().await,
            None => {}
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = self.inner.servers_tx.send(FakeServer {
            frames: out_rx,
            events: in_tx,
        });
        Ok(Socket {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Server side of one fake connection.
pub struct FakeServer {
    frames: mpsc::UnboundedReceiver<WireFrame>,
    events: mpsc::UnboundedSender<SocketEvent>,
}

impl FakeServer {
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.events.send(SocketEvent::Text(text.into()));
    }

    pub fn send_json(&self, value: Value) {
        self.send_text(value.to_string());
    }

    pub fn close_clean(&self, code: u16, reason: &str) {
        let _ = self.events.send(SocketEvent::Closed {
            was_clean: true,
            code: Some(code),
            reason: reason.to_string(),
        });
    }

    /// Report a transport error, as a reset connection would.
    pub fn fail(&self, detail: &str) {
        let _ = self.events.send(SocketEvent::Error(detail.to_string()));
    }

    /// Vanish without a close frame.
    pub fn drop_abruptly(self) {}

    /// True once the client discarded this connection.
    pub fn is_detached(&self) -> bool {
        self.events.is_closed()
    }

    /// Next text frame written by the client, parsed as JSON.
    ///
    /// Returns `None` on a close frame or when the client is gone.
    pub async fn next_frame(&mut self) -> Option<Value> {
        loop {
            match self.frames.recv().await? {
                WireFrame::Text(text) => match serde_json::from_str(&text) {
                    Ok(value) => return Some(value),
                    Err(e) => tracing::warn!("Client wrote invalid JSON: {}", e),
                },
                WireFrame::Close { .. } => return None,
            }
        }
    }

    /// Every text frame written so far.
    pub fn drain_frames(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            if let WireFrame::Text(text) = frame {
                if let Ok(value) = serde_json::from_str(&text) {
                    frames.push(value);
                }
            }
        }
        frames
    }

    /// Skip text frames until the client's close frame.
    pub async fn close_frame(&mut self) -> Option<(u16, String)> {
        loop {
            match self.frames.recv().await? {
                WireFrame::Text(_) => continue,
                WireFrame::Close { code, reason } => return Some((code, reason)),
            }
        }
    }
}

/// Records every event an emitter publishes.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ClientEvent>>>,
}

impl EventLog {
    pub fn attach(emitter: &EventEmitter) -> Self {
        let log = Self::default();
        let events = Arc::clone(&log.events);
        emitter.on(EventKind::All, move |event| lock(&events).push(event.clone()));
        log
    }

    pub fn events(&self) -> Vec<ClientEvent> {
        lock(&self.events).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }

    pub fn count(&self, predicate: impl Fn(&ClientEvent) -> bool) -> usize {
        lock(&self.events).iter().filter(|e| predicate(e)).count()
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                ClientEvent::StateChanged(state) => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn reconnect_delays(&self) -> Vec<Duration> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                ClientEvent::ReconnectScheduled { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect()
    }

    /// Contents of delivered chat messages, in delivery order.
    pub fn chats(&self) -> Vec<String> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Chat(message) => Some(message.content.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn presence_updates(&self) -> Vec<PresenceUpdate> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                ClientEvent::UserUpdate(update) => Some(update.clone()),
                _ => None,
            })
            .collect()
    }
}
