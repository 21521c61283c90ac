//! Server configuration.

use std::time::Duration;

use relay_hub::SessionOptions;
use relay_settings::ServerSettings;

/// Runtime configuration for [`RelayServer`](crate::server::RelayServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Upgrades are refused with 503 at this many clients.
    pub max_connections: usize,
    /// Per-client outbound mailbox length.
    pub mailbox_capacity: usize,
    /// Ping period; `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
    /// Silence after which a client is dropped.
    pub heartbeat_timeout: Duration,
    /// Max inbound WebSocket message and broadcast body size in bytes.
    pub max_message_size: usize,
    /// Re-broadcast client messages to every client.
    pub relay_inbound: bool,
    /// Allowed CORS origins; empty allows any.
    pub cors_origins: Vec<String>,
    /// How long shutdown waits for the listener to drain.
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Options handed to every WebSocket session.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_timeout: self.heartbeat_timeout,
            relay_inbound: self.relay_inbound,
        }
    }

    /// `host:port` as a bindable string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1024,
            mailbox_capacity: 256,
            heartbeat_interval: Some(Duration::from_secs(30)),
            heartbeat_timeout: Duration::from_secs(60),
            max_message_size: 1024 * 1024,
            relay_inbound: false,
            cors_origins: Vec::new(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            max_connections: settings.max_connections,
            mailbox_capacity: settings.mailbox_capacity,
            heartbeat_interval: settings.heartbeat_interval(),
            heartbeat_timeout: settings.heartbeat_timeout(),
            max_message_size: settings.max_message_size,
            relay_inbound: settings.relay_inbound,
            cors_origins: settings.cors_origins.clone(),
            shutdown_timeout: settings.shutdown_timeout(),
        }
    }
}
