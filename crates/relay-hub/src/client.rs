//! Per-peer client handle and its bounded outbound mailbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use relay_core::{ClientId, Payload};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a payload could not be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The mailbox is at capacity: the consumer is not keeping up.
    #[error("mailbox full")]
    Full,
    /// The mailbox was closed or its reader is gone.
    #[error("mailbox closed")]
    Closed,
}

/// The hub-side half of one connected peer.
///
/// Holds the sending side of a bounded mailbox. Producing into it never
/// blocks: a full mailbox is reported as [`SendError::Full`] and left to the
/// caller's policy.
pub struct ClientHandle {
    id: ClientId,
    /// `None` once closed; dropping the sender closes the channel.
    tx: Mutex<Option<mpsc::Sender<Payload>>>,
    closed: CancellationToken,
    capacity: usize,
    connected_at: Instant,
    last_seen: Mutex<Instant>,
    dropped: AtomicU64,
}

impl ClientHandle {
    /// Create a handle with a fresh [`ClientId`] and a mailbox of `capacity`
    /// payloads (at least 1).
    pub fn new(capacity: usize) -> (Arc<Self>, Mailbox) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let closed = CancellationToken::new();
        let now = Instant::now();
        let handle = Arc::new(Self {
            id: ClientId::new(),
            tx: Mutex::new(Some(tx)),
            closed: closed.clone(),
            capacity,
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped: AtomicU64::new(0),
        });
        (handle, Mailbox { rx, closed })
    }

    /// This peer's identity.
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Mailbox capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue a payload without waiting.
    pub fn try_send(&self, payload: Payload) -> Result<(), SendError> {
        let result = match self.tx.lock().as_ref() {
            Some(tx) => tx.try_send(payload).map_err(|e| match e {
                TrySendError::Full(_) => SendError::Full,
                TrySendError::Closed(_) => SendError::Closed,
            }),
            None => Err(SendError::Closed),
        };
        if result.is_err() {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Close the mailbox and signal both session loops.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        let was_open = self.tx.lock().take().is_some();
        self.closed.cancel();
        was_open
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the handle is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Record inbound activity from the peer.
    pub fn mark_alive(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Time since the last inbound activity (or since connecting).
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Time since the handle was created.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Payloads refused because the mailbox was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Receiving side of a client's mailbox, owned by its write loop.
pub struct Mailbox {
    rx: mpsc::Receiver<Payload>,
    closed: CancellationToken,
}

impl Mailbox {
    /// Next payload in FIFO order.
    ///
    /// Returns `None` once the handle is closed; payloads still queued at
    /// that point are discarded.
    pub async fn recv(&mut self) -> Option<Payload> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => None,
            payload = self.rx.recv() => payload,
        }
    }

    /// Next payload if one is queued and the handle is still open.
    pub fn try_recv(&mut self) -> Option<Payload> {
        if self.closed.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Number of payloads currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
