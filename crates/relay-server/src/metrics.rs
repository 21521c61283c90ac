//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the global Prometheus recorder.
///
/// Call once at startup, before any metrics are recorded. The returned handle
/// renders the `/metrics` body.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket upgrades refused with 503 (counter).
pub const UPGRADES_REJECTED_TOTAL: &str = "relay_upgrades_rejected_total";
/// Broadcasts triggered over HTTP (counter).
pub const HTTP_BROADCASTS_TOTAL: &str = "relay_http_broadcasts_total";
