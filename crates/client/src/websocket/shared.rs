//! Reference-counted sharing of one client across independent consumers.
//!
//! Each consumer holds a [`ClientLease`]. The first lease opens the
//! connection, every lease cleans up its own subscriptions when dropped, and
//! the socket is closed once the last lease is gone.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::client::{RealtimeClient, NORMAL_CLOSURE};
use super::transport::Connector;
use crate::config::{ClientConfig, ConfigError, ConnectionTarget};
use crate::error::ClientError;
use crate::messaging::{ClientEvent, EventKind, SubscriptionId};

struct LeaseCount {
    active: Mutex<usize>,
}

impl LeaseCount {
    fn active(&self) -> MutexGuard<'_, usize> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner of a shared [`RealtimeClient`]; hands out leases.
#[derive(Clone)]
pub struct SharedClient {
    client: RealtimeClient,
    leases: Arc<LeaseCount>,
}

impl SharedClient {
    pub fn new(
        config: ClientConfig,
        target: ConnectionTarget,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::from_client(RealtimeClient::new(config, target, connector)?))
    }

    pub fn from_client(client: RealtimeClient) -> Self {
        Self {
            client,
            leases: Arc::new(LeaseCount {
                active: Mutex::new(0),
            }),
        }
    }

    /// Take a lease, connecting if this is the only one.
    pub fn acquire(&self) -> Result<ClientLease, ClientError> {
        let mut active = self.leases.active();
        if *active == 0 {
            tracing::debug!("First lease acquired, connecting");
            self.client.connect()?;
        }
        *active += 1;
        Ok(ClientLease {
            client: self.client.clone(),
            leases: Arc::clone(&self.leases),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn lease_count(&self) -> usize {
        *self.leases.active()
    }

    pub fn client(&self) -> &RealtimeClient {
        &self.client
    }
}

/// One consumer's share of a [`SharedClient`].
pub struct ClientLease {
    client: RealtimeClient,
    leases: Arc<LeaseCount>,
    subscriptions: Mutex<Vec<(EventKind, SubscriptionId)>>,
}

impl ClientLease {
    fn subscriptions(&self) -> MutexGuard<'_, Vec<(EventKind, SubscriptionId)>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn client(&self) -> &RealtimeClient {
        &self.client
    }

    /// Subscribe for the lifetime of this lease.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = self.client.on(kind, callback);
        self.subscriptions().push((kind, id));
        id
    }

    pub fn off(&self, kind: EventKind, id: SubscriptionId) -> bool {
        self.subscriptions()
            .retain(|(k, existing)| !(*k == kind && *existing == id));
        self.client.off(kind, id)
    }
}

impl Drop for ClientLease {
    fn drop(&mut self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions());
        for (kind, id) in subscriptions {
            self.client.off(kind, id);
        }

        let mut active = self.leases.active();
        *active = active.saturating_sub(1);
        if *active == 0 {
            tracing::debug!("Last lease released, closing connection");
            self.client.begin_close(NORMAL_CLOSURE, "last lease released");
        }
    }
}
