//! # relay-server
//!
//! axum front end for the relay hub.
//!
//! - `GET /ws`: WebSocket upgrade; each socket becomes a hub session
//! - `POST /api/broadcast`: fan the raw request body out to every client
//! - `GET /health`: liveness and connection count
//! - `GET /metrics`: Prometheus text, when a recorder is installed

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::{AppState, RelayServer};
pub use shutdown::ShutdownCoordinator;
