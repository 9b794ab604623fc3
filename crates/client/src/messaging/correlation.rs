//! Request/response correlation.
//!
//! A request registers a oneshot sender under a generated id before the frame
//! is written. The connection task resolves it when a frame echoing the id
//! arrives; the caller removes it on timeout so entries never outlive the wait.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::ClientError;

pub type RequestResult = Result<Value, ClientError>;

/// Pending request tracker keyed by request id
#[derive(Default)]
pub struct PendingRequests {
    inner: HashMap<String, oneshot::Sender<RequestResult>>,
}

impl PendingRequests {
    pub fn insert(&mut self, request_id: String, tx: oneshot::Sender<RequestResult>) {
        self.inner.insert(request_id, tx);
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.inner.contains_key(request_id)
    }

    /// Resolve a pending request with a response.
    ///
    /// Returns true if the request was found and resolved, false if no pending
    /// request exists for this ID (e.g., already timed out and cleaned up).
    pub fn resolve(&mut self, request_id: &str, result: RequestResult) -> bool {
        if let Some(tx) = self.inner.remove(request_id) {
            let _ = tx.send(result);
            true
        } else {
            tracing::debug!(
                request_id = %request_id,
                "Response received for unknown request ID - request may have timed out"
            );
            false
        }
    }

    pub fn remove(&mut self, request_id: &str) -> bool {
        self.inner.remove(request_id).is_some()
    }

    /// Fail every pending request. Returns how many were pending.
    pub fn fail_all(&mut self, error: impl Fn() -> ClientError) -> usize {
        let count = self.inner.len();
        for (_, tx) in self.inner.drain() {
            let _ = tx.send(Err(error()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
