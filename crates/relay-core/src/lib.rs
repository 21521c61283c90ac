//! # relay-core
//!
//! Foundation types shared by every relay crate:
//!
//! - [`Payload`]: immutable, reference-counted opaque message bytes
//! - [`ClientId`]: opaque per-connection identity
//! - [`errors`]: transport error taxonomy
//! - [`logging`]: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod payload;

pub use errors::TransportError;
pub use ids::ClientId;
pub use payload::Payload;
