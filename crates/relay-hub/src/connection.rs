//! Duplex connection abstraction.
//!
//! A [`Connection`] is split once into a write half ([`ConnectionSink`]) and a
//! read half ([`ConnectionSource`]). The halves fail independently: a broken
//! sink ends the write loop, a broken source ends the read loop, and the
//! session's teardown gate reconciles the two.

use async_trait::async_trait;
use relay_core::{Payload, TransportError};

/// An event observed on the read half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// An application message from the peer.
    Message(Payload),
    /// A transport-level keepalive (ping or pong).
    Heartbeat,
    /// The peer initiated a close.
    Close,
}

/// Outbound half of a connection.
#[async_trait]
pub trait ConnectionSink: Send + 'static {
    /// Write one payload.
    async fn send(&mut self, payload: Payload) -> Result<(), TransportError>;

    /// Send a transport keepalive.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the write half.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound half of a connection.
#[async_trait]
pub trait ConnectionSource: Send + 'static {
    /// Next inbound event; `None` once the stream has ended.
    async fn next_event(&mut self) -> Option<Result<Inbound, TransportError>>;
}

/// A duplex connection that can be split into independent halves.
pub trait Connection: Send + 'static {
    /// Write half.
    type Sink: ConnectionSink;
    /// Read half.
    type Source: ConnectionSource;

    /// Consume the connection and return its two halves.
    fn split(self) -> (Self::Sink, Self::Source);
}
