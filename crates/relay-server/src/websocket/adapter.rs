//! axum [`WebSocket`] as a hub [`Connection`].

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relay_core::{Payload, TransportError};
use relay_hub::{Connection, ConnectionSink, ConnectionSource, Inbound};

/// An upgraded WebSocket ready to be driven by a session.
pub struct WsConnection {
    socket: WebSocket,
}

impl WsConnection {
    /// Wrap an upgraded socket.
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Connection for WsConnection {
    type Sink = WsSink;
    type Source = WsSource;

    fn split(self) -> (WsSink, WsSource) {
        let (tx, rx) = self.socket.split();
        (WsSink { tx }, WsSource { rx })
    }
}

/// Write half of a [`WsConnection`].
pub struct WsSink {
    tx: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl ConnectionSink for WsSink {
    async fn send(&mut self, payload: Payload) -> Result<(), TransportError> {
        self.tx
            .send(outbound_message(payload))
            .await
            .map_err(TransportError::send)
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.tx
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(TransportError::send)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx.close().await.map_err(TransportError::send)
    }
}

/// Read half of a [`WsConnection`].
pub struct WsSource {
    rx: SplitStream<WebSocket>,
}

#[async_trait]
impl ConnectionSource for WsSource {
    async fn next_event(&mut self) -> Option<Result<Inbound, TransportError>> {
        let msg = self.rx.next().await?;
        Some(msg.map(inbound_event).map_err(TransportError::receive))
    }
}

/// Frame a payload: Text when it is valid UTF-8, Binary otherwise.
pub fn outbound_message(payload: Payload) -> Message {
    match payload.as_text() {
        Some(text) => Message::Text(text.into()),
        None => Message::Binary(payload.into_bytes()),
    }
}

/// Classify an inbound frame.
pub fn inbound_event(msg: Message) -> Inbound {
    match msg {
        Message::Text(text) => Inbound::Message(Payload::from(text.as_str().to_owned())),
        Message::Binary(data) => Inbound::Message(Payload::from(data)),
        Message::Ping(_) | Message::Pong(_) => Inbound::Heartbeat,
        Message::Close(_) => Inbound::Close,
    }
}
