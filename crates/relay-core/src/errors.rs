//! Transport error taxonomy.
//!
//! A [`TransportError`] is always local to one session: it ends that
//! session's read or write loop and triggers its teardown, but is never
//! surfaced to the hub, to other sessions, or to callers of broadcast.

use thiserror::Error;

/// Read/write failure or disconnect on a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection is already closed (by the peer or locally).
    #[error("connection closed")]
    Closed,

    /// Writing a frame to the peer failed.
    #[error("send failed: {message}")]
    Send {
        /// Underlying transport error text.
        message: String,
    },

    /// Reading a frame from the peer failed.
    #[error("receive failed: {message}")]
    Receive {
        /// Underlying transport error text.
        message: String,
    },
}

impl TransportError {
    /// Build a [`TransportError::Send`] from any displayable error.
    pub fn send(err: impl std::fmt::Display) -> Self {
        Self::Send {
            message: err.to_string(),
        }
    }

    /// Build a [`TransportError::Receive`] from any displayable error.
    pub fn receive(err: impl std::fmt::Display) -> Self {
        Self::Receive {
            message: err.to_string(),
        }
    }

    /// Whether this is an orderly close rather than a fault.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
