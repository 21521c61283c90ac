//! Metric names recorded by the hub and session driver.
//!
//! Recording goes through the `metrics` facade; without an installed
//! recorder every call is a no-op.

/// Broadcast calls (counter).
pub const BROADCASTS_TOTAL: &str = "relay_broadcasts_total";
/// Payloads enqueued into mailboxes across all broadcasts (counter).
pub const BROADCAST_DELIVERIES_TOTAL: &str = "relay_broadcast_deliveries_total";
/// Clients evicted because their mailbox was full or closed (counter).
pub const BROADCAST_EVICTIONS_TOTAL: &str = "relay_broadcast_evictions_total";
/// Clients currently in the live set (gauge).
pub const CLIENTS_ACTIVE: &str = "relay_clients_active";
/// Sessions started (counter).
pub const SESSIONS_OPENED_TOTAL: &str = "relay_sessions_opened_total";
/// Sessions ended (counter, labels: reason).
pub const SESSIONS_CLOSED_TOTAL: &str = "relay_sessions_closed_total";
/// Session lifetime in seconds (histogram).
pub const SESSION_DURATION_SECONDS: &str = "relay_session_duration_seconds";
