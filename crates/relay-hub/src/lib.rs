//! # relay-hub
//!
//! The connection hub: a concurrency-safe registry of live connections and a
//! broadcast that fans payloads out to all of them without letting one slow
//! or dead peer stall the rest.
//!
//! - [`connection`]: split a duplex connection into independent read/write halves
//! - [`client`]: per-peer handle with a bounded outbound mailbox
//! - [`hub`]: membership set plus non-blocking, evict-on-full broadcast
//! - [`session`]: per-connection read/write loops with exactly-once teardown
//! - [`memory`]: in-process connection pair for tests and embedding
//!
//! ```text
//!   broadcast(payload) ──► Hub ──try_send──► mailbox A ──► write loop A ──► conn A
//!                            │  ──try_send──► mailbox B ──► write loop B ──► conn B
//!                            │  ──full!────► evict C (close mailbox, drop from set)
//!                            ▼
//!                  register / unregister (same lock)
//! ```

#![deny(unsafe_code)]

pub mod client;
pub mod connection;
pub mod hub;
pub mod memory;
pub mod session;
pub mod telemetry;

pub use client::{ClientHandle, Mailbox, SendError};
pub use connection::{Connection, ConnectionSink, ConnectionSource, Inbound};
pub use hub::{BroadcastReport, DEFAULT_MAILBOX_CAPACITY, Hub};
pub use session::{
    CLOSE_TIMEOUT, CloseReason, SessionOptions, SessionOutcome, TeardownGate, run_session,
    spawn_session,
};
