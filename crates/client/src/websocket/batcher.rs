//! Inbound message batcher.
//!
//! Coalesces inbound frames so the UI is updated at most once per batch
//! window. Flushing is debounced (`interval` after the most recent arrival)
//! with a hard ceiling (`max_wait` after the first buffered arrival), so
//! sustained traffic can delay a flush but never starve it.
//!
//! Within a batch, state messages (presence, typing, status) are folded per
//! identity key: a newer message absorbs an older one when a single message
//! has the same effect as both, and the result takes the newer arrival
//! position, so survivors stay in transport order. Event messages carrying a delivery id are checked against a bounded
//! set of recently seen ids and dropped on redelivery.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use kefu_protocol::{DecodedFrame, FrameBody};
use tokio::time::Instant;

use crate::config::ClientConfig;

/// One inbound frame waiting for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub frame: DecodedFrame,
    pub received_at: Instant,
}

impl InboundMessage {
    pub fn new(frame: DecodedFrame, received_at: Instant) -> Self {
        Self { frame, received_at }
    }

    fn state_key(&self) -> Option<String> {
        self.frame.typed().and_then(|message| message.state_key())
    }

    fn event_id(&self) -> Option<&str> {
        self.frame.typed().and_then(|message| message.event_id())
    }
}

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub max_wait: Duration,
    pub max_size: usize,
    pub recent_id_capacity: usize,
}

impl BatcherConfig {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            enabled: config.enable_batching,
            interval: config.batch_interval(),
            max_wait: config.max_batch_wait(),
            max_size: config.max_batch_size,
            recent_id_capacity: config.recent_id_capacity,
        }
    }
}

/// Result of offering one message to the batcher.
#[derive(Debug, PartialEq)]
pub enum PushOutcome {
    /// Batching is disabled: dispatch this message now
    Dispatch(InboundMessage),
    /// Held until the flush deadline
    Buffered,
    /// The batch reached `max_size`; flush now
    Flush,
    /// Redelivery of an event id seen recently; dropped
    Duplicate,
}

/// Bounded FIFO set of recently seen event ids.
#[derive(Debug, Default)]
struct RecentIds {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Record `id`; returns false if it was already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

#[derive(Debug)]
pub struct MessageBatcher {
    config: BatcherConfig,
    /// Arrival-ordered slots; superseded state messages leave a `None`
    slots: Vec<Option<InboundMessage>>,
    live: usize,
    state_slots: HashMap<String, usize>,
    recent_ids: RecentIds,
    first_at: Option<Instant>,
    last_at: Option<Instant>,
}

impl MessageBatcher {
    pub fn new(config: BatcherConfig) -> Self {
        let recent_ids = RecentIds::new(config.recent_id_capacity);
        Self {
            config,
            slots: Vec::new(),
            live: 0,
            state_slots: HashMap::new(),
            recent_ids,
            first_at: None,
            last_at: None,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn push(&mut self, mut message: InboundMessage, now: Instant) -> PushOutcome {
        if let Some(id) = message.event_id() {
            if !self.recent_ids.insert(id) {
                tracing::debug!(event_id = %id, kind = %message.frame.kind, "Dropping duplicate delivery");
                return PushOutcome::Duplicate;
            }
        }

        if !self.config.enabled {
            return PushOutcome::Dispatch(message);
        }

        if let Some(key) = message.state_key() {
            if let Some(previous) = self.state_slots.remove(&key) {
                self.fold_into(previous, &mut message);
            }
            self.state_slots.insert(key, self.slots.len());
        }
        self.slots.push(Some(message));
        self.live += 1;

        self.first_at.get_or_insert(now);
        self.last_at = Some(now);

        if self.live >= self.config.max_size {
            PushOutcome::Flush
        } else {
            PushOutcome::Buffered
        }
    }

    /// Fold the buffered message at `previous` into `later` when one message
    /// can stand for both. Otherwise both stay in the batch.
    fn fold_into(&mut self, previous: usize, later: &mut InboundMessage) {
        let Some(earlier) = self.slots[previous].as_ref() else {
            return;
        };
        let combined = match (earlier.frame.typed(), later.frame.typed()) {
            (Some(earlier), Some(newer)) => newer.supersede(earlier),
            _ => None,
        };
        if let Some(combined) = combined {
            self.slots[previous] = None;
            self.live -= 1;
            later.frame.kind = combined.kind().to_string();
            later.frame.body = FrameBody::Typed(combined);
        }
    }

    /// When the pending batch must be flushed, if anything is pending.
    pub fn deadline(&self) -> Option<Instant> {
        if self.live == 0 {
            return None;
        }
        let debounced = self.last_at.map(|last| last + self.config.interval);
        let ceiling = self.first_at.map(|first| first + self.config.max_wait);
        match (debounced, ceiling) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Take the pending batch in arrival order and reset the buffers.
    pub fn flush(&mut self) -> Vec<InboundMessage> {
        let batch: Vec<InboundMessage> = self.slots.drain(..).flatten().collect();
        self.reset_window();
        batch
    }

    /// Discard anything pending. Recently seen ids are kept so a redelivery
    /// after reconnect is still recognised.
    pub fn clear(&mut self) {
        if self.live > 0 {
            tracing::debug!(discarded = self.live, "Discarding pending batch");
        }
        self.slots.clear();
        self.reset_window();
    }

    fn reset_window(&mut self) {
        self.live = 0;
        self.state_slots.clear();
        self.first_at = None;
        self.last_at = None;
    }
}
