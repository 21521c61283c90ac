//! WebSocket upgrade handling and the socket adapter.

pub mod adapter;
pub mod handler;
