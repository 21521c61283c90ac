//! Settings type definitions.
//!
//! Field names are camelCase on the wire. Every struct is `#[serde(default)]`,
//! so a partial file only needs the keys it changes.

use std::path::PathBuf;
use std::time::Duration;

use relay_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Largest accepted per-client mailbox.
pub const MAX_MAILBOX_CAPACITY: usize = 65_536;

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// HTTP and hub settings.
    pub server: ServerSettings,
    /// Logging output.
    pub logging: LoggingSettings,
}

/// HTTP listener and hub tuning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port; 0 picks a free port.
    pub port: u16,
    /// Upgrades are refused once this many clients are connected.
    pub max_connections: usize,
    /// Per-client outbound queue length.
    pub mailbox_capacity: usize,
    /// Ping period in milliseconds; 0 disables heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a client is dropped, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Largest accepted inbound message, in bytes.
    pub max_message_size: usize,
    /// Re-broadcast client messages to every client.
    pub relay_inbound: bool,
    /// Allowed CORS origins; empty allows any.
    pub cors_origins: Vec<String>,
    /// Grace period for in-flight work on shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3008,
            max_connections: 1024,
            mailbox_capacity: 256,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            max_message_size: 1024 * 1024,
            relay_inbound: false,
            cors_origins: Vec::new(),
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl ServerSettings {
    /// Heartbeat period, or `None` when disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    /// Heartbeat timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Shutdown grace period.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Logging output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive, e.g. `info` or `relay_hub=debug`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Also append records to this file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            file: None,
        }
    }
}

impl RelaySettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if !(1..=MAX_MAILBOX_CAPACITY).contains(&server.mailbox_capacity) {
            return Err(SettingsError::InvalidValue(format!(
                "mailboxCapacity must be in 1..={MAX_MAILBOX_CAPACITY}, got {}",
                server.mailbox_capacity
            )));
        }
        if server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "maxConnections must be at least 1".into(),
            ));
        }
        if server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "maxMessageSize must be at least 1".into(),
            ));
        }
        if server.heartbeat_interval_ms > 0
            && server.heartbeat_timeout_ms < server.heartbeat_interval_ms
        {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeatTimeoutMs ({}) must not be shorter than heartbeatIntervalMs ({})",
                server.heartbeat_timeout_ms, server.heartbeat_interval_ms
            )));
        }
        Ok(())
    }
}
