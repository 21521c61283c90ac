//! In-process [`Connection`] backed by channels.
//!
//! [`MemoryConnection::pair`] returns the server-side connection plus a
//! [`MemoryPeer`] that plays the remote end: it injects inbound events, reads
//! what the session wrote, and can make the transport misbehave.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use relay_core::{Payload, TransportError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, ConnectionSink, ConnectionSource, Inbound};

type InboundItem = Result<Inbound, TransportError>;

#[derive(Default)]
struct Shared {
    fail_writes: AtomicBool,
    stalled: AtomicBool,
    hung: AtomicBool,
    closes: AtomicUsize,
    pings: AtomicUsize,
    closed: CancellationToken,
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    outbound: mpsc::UnboundedSender<Payload>,
    inbound: mpsc::UnboundedReceiver<InboundItem>,
    shared: Arc<Shared>,
}

impl MemoryConnection {
    /// Create a connected pair.
    pub fn pair() -> (Self, MemoryPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        let conn = Self {
            outbound: out_tx,
            inbound: in_rx,
            shared: shared.clone(),
        };
        let peer = MemoryPeer {
            inbound: Some(in_tx),
            outbound: out_rx,
            shared,
        };
        (conn, peer)
    }
}

impl Connection for MemoryConnection {
    type Sink = MemorySink;
    type Source = MemorySource;

    fn split(self) -> (MemorySink, MemorySource) {
        let sink = MemorySink {
            tx: self.outbound,
            shared: self.shared,
        };
        let source = MemorySource { rx: self.inbound };
        (sink, source)
    }
}

/// Write half of a [`MemoryConnection`].
pub struct MemorySink {
    tx: mpsc::UnboundedSender<Payload>,
    shared: Arc<Shared>,
}

#[async_trait]
impl ConnectionSink for MemorySink {
    async fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::send("injected write failure"));
        }
        if self.shared.stalled.load(Ordering::SeqCst) {
            self.shared.closed.cancelled().await;
            return Err(TransportError::Closed);
        }
        self.tx.send(payload).map_err(|_| TransportError::Closed)
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::send("injected ping failure"));
        }
        let _ = self.shared.pings.fetch_add(1, Ordering::SeqCst);
        if self.shared.hung.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let _ = self.shared.closes.fetch_add(1, Ordering::SeqCst);
        if self.shared.hung.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.shared.closed.cancel();
        Ok(())
    }
}

/// Read half of a [`MemoryConnection`].
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<InboundItem>,
}

#[async_trait]
impl ConnectionSource for MemorySource {
    async fn next_event(&mut self) -> Option<Result<Inbound, TransportError>> {
        self.rx.recv().await
    }
}

/// The remote end of a [`MemoryConnection`].
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<InboundItem>>,
    outbound: mpsc::UnboundedReceiver<Payload>,
    shared: Arc<Shared>,
}

impl MemoryPeer {
    fn push(&self, item: InboundItem) -> bool {
        self.inbound.as_ref().is_some_and(|tx| tx.send(item).is_ok())
    }

    /// Send an application message to the server.
    pub fn send(&self, payload: impl Into<Payload>) -> bool {
        self.push(Ok(Inbound::Message(payload.into())))
    }

    /// Send a keepalive frame.
    pub fn heartbeat(&self) -> bool {
        self.push(Ok(Inbound::Heartbeat))
    }

    /// Initiate a close from the peer side.
    pub fn close(&self) -> bool {
        self.push(Ok(Inbound::Close))
    }

    /// Make the server's next read fail.
    pub fn fail_read(&self, message: &str) -> bool {
        self.push(Err(TransportError::receive(message)))
    }

    /// End the inbound stream without a close frame.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Next payload written by the server; `None` once its sink is gone.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.outbound.recv().await
    }

    /// Next already-written payload, if any.
    pub fn try_recv(&mut self) -> Option<Payload> {
        self.outbound.try_recv().ok()
    }

    /// Make every subsequent write and ping fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make writes hang until the connection is closed.
    pub fn set_stalled(&self, stalled: bool) {
        self.shared.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Make pings and close never complete, like a peer that stopped reading.
    pub fn set_hung(&self, hung: bool) {
        self.shared.hung.store(hung, Ordering::SeqCst);
    }

    /// Times the server closed its write half.
    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Pings written by the server.
    pub fn pings(&self) -> usize {
        self.shared.pings.load(Ordering::SeqCst)
    }

    /// Whether the server has closed the connection.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Wait until the server closes the connection.
    pub async fn wait_closed(&self) {
        self.shared.closed.cancelled().await;
    }
}
