//! `GET /ws` upgrade handler.

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use metrics::counter;
use relay_hub::run_session;
use tracing::{debug, warn};

use super::adapter::WsConnection;
use crate::metrics::UPGRADES_REJECTED_TOTAL;
use crate::server::AppState;

/// Upgrade to a WebSocket and hand the socket to a hub session.
///
/// Refused with 503 while shutting down or once the hub holds
/// `max_connections` clients.
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.shutdown.is_shutting_down() {
        counter!(UPGRADES_REJECTED_TOTAL, "reason" => "shutdown").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }
    let active = state.hub.len();
    if active >= state.config.max_connections {
        warn!(
            active,
            limit = state.config.max_connections,
            "connection limit reached, refusing upgrade"
        );
        counter!(UPGRADES_REJECTED_TOTAL, "reason" => "limit").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    let hub = state.hub.clone();
    let options = state.config.session_options();
    let shutdown = state.shutdown.token();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let outcome = run_session(WsConnection::new(socket), hub, options, shutdown).await;
            debug!(
                client_id = %outcome.client_id,
                reason = %outcome.reason,
                "websocket session finished"
            );
        })
}
