//! The live client set and broadcast fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use relay_core::{ClientId, Payload};
use tracing::{debug, info, warn};

use crate::client::{ClientHandle, Mailbox};
use crate::telemetry;

/// Mailbox capacity used by [`Hub::default`].
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Outcome of one broadcast, for logging and metrics only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Clients the payload was enqueued for.
    pub delivered: usize,
    /// Clients removed because their mailbox was full or closed.
    pub evicted: Vec<ClientId>,
}

impl BroadcastReport {
    /// Number of evicted clients.
    pub fn evicted_count(&self) -> usize {
        self.evicted.len()
    }
}

/// Registry of connected clients.
///
/// Membership changes and fan-out go through the same lock, so a broadcast
/// sees exactly the set that was live when it started. The lock is never held
/// across an await point.
pub struct Hub {
    clients: Mutex<HashMap<ClientId, Arc<ClientHandle>>>,
    mailbox_capacity: usize,
}

impl Hub {
    /// Create an empty hub whose clients get mailboxes of `mailbox_capacity`.
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            mailbox_capacity: mailbox_capacity.max(1),
        }
    }

    /// Mint a new client handle sized for this hub. Not registered yet.
    pub fn client(&self) -> (Arc<ClientHandle>, Mailbox) {
        ClientHandle::new(self.mailbox_capacity)
    }

    /// Add a client to the live set.
    ///
    /// A handle that is already closed is not inserted.
    pub fn register(&self, handle: Arc<ClientHandle>) {
        let mut clients = self.clients.lock();
        if handle.is_closed() {
            debug!(client_id = %handle.id(), "skipping registration of closed client");
            return;
        }
        let id = handle.id().clone();
        if clients.insert(id.clone(), handle).is_some() {
            warn!(client_id = %id, "client re-registered, previous entry replaced");
        }
        let active = clients.len();
        drop(clients);
        record_active(active);
        debug!(client_id = %id, active, "client registered");
    }

    /// Remove a client and close its mailbox.
    ///
    /// Returns whether this call removed it; repeated calls are no-ops.
    pub fn unregister(&self, id: &ClientId) -> bool {
        let mut clients = self.clients.lock();
        let Some(handle) = clients.remove(id) else {
            return false;
        };
        let active = clients.len();
        drop(clients);
        let _ = handle.close();
        record_active(active);
        debug!(client_id = %id, active, "client unregistered");
        true
    }

    /// Enqueue `payload` for every live client without waiting.
    ///
    /// A client whose mailbox is full (or already closed) is evicted: removed
    /// from the set and closed so its session tears down.
    pub fn broadcast(&self, payload: Payload) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut clients = self.clients.lock();
        clients.retain(|id, handle| match handle.try_send(payload.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(reason) => {
                let _ = handle.close();
                warn!(client_id = %id, %reason, "evicting client from broadcast");
                report.evicted.push(id.clone());
                false
            }
        });
        let active = clients.len();
        drop(clients);

        counter!(telemetry::BROADCASTS_TOTAL).increment(1);
        counter!(telemetry::BROADCAST_DELIVERIES_TOTAL).increment(report.delivered as u64);
        if !report.evicted.is_empty() {
            counter!(telemetry::BROADCAST_EVICTIONS_TOTAL)
                .increment(report.evicted.len() as u64);
            record_active(active);
        }
        report
    }

    /// Fire-and-forget broadcast.
    pub fn broadcast_message(&self, payload: impl Into<Payload>) {
        let payload = payload.into();
        let bytes = payload.len();
        let report = self.broadcast(payload);
        debug!(
            bytes,
            recipients = report.delivered,
            evicted = report.evicted_count(),
            "broadcast"
        );
    }

    /// Remove and close every client.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = self.clients.lock().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            let _ = handle.close();
        }
        record_active(0);
        if !drained.is_empty() {
            info!(count = drained.len(), "closed all clients");
        }
        drained.len()
    }

    /// Number of live clients.
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Whether no clients are live.
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.lock().contains_key(id)
    }

    /// Snapshot of live client ids.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.lock().keys().cloned().collect()
    }

    /// Capacity given to each new client's mailbox.
    pub fn mailbox_capacity(&self) -> usize {
        self.mailbox_capacity
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_MAILBOX_CAPACITY)
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("clients", &self.len())
            .field("mailbox_capacity", &self.mailbox_capacity)
            .finish()
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_active(active: usize) {
    gauge!(telemetry::CLIENTS_ACTIVE).set(active as f64);
}
