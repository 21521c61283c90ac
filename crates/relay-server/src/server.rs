//! `RelayServer`: axum HTTP + WebSocket front end for a [`Hub`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::Payload;
use relay_hub::Hub;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::{HTTP_BROADCASTS_TOTAL, render};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::ws_handler;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The connection hub.
    pub hub: Arc<Hub>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// Body of a `202` from `POST /api/broadcast`.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastResponse {
    /// Clients the payload was enqueued for.
    pub recipients: usize,
    /// Clients dropped because they could not keep up.
    pub evicted: usize,
}

/// The relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    hub: Arc<Hub>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a server with a fresh hub sized from `config`.
    pub fn new(config: ServerConfig) -> Self {
        let hub = Arc::new(Hub::new(config.mailbox_capacity));
        Self::with_hub(config, hub)
    }

    /// Create a server fronting an existing hub.
    pub fn with_hub(config: ServerConfig, hub: Arc<Hub>) -> Self {
        Self {
            config: Arc::new(config),
            hub,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes and middleware.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .route(
                "/api/broadcast",
                post(broadcast_handler).layer(DefaultBodyLimit::max(self.config.max_message_size)),
            )
            .with_state(state)
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&self.config.cors_origins))
    }

    /// Bind the configured address and serve on a spawned task.
    ///
    /// The task runs until the shutdown token fires.
    pub async fn listen(
        &self,
    ) -> Result<(SocketAddr, JoinHandle<Result<(), ServerError>>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(addr = %local, "relay server listening");
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
                .map_err(ServerError::from)
        });
        Ok((local, handle))
    }

    /// The connection hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// The shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, state.hub.len()))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// POST /api/broadcast: the raw body is fanned out to every client.
async fn broadcast_handler(State(state): State<AppState>, body: Bytes) -> Response {
    if body.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "empty payload"})),
        )
            .into_response();
    }

    let bytes = body.len();
    let report = state.hub.broadcast(Payload::from(body));
    counter!(HTTP_BROADCASTS_TOTAL).increment(1);
    info!(
        bytes,
        recipients = report.delivered,
        evicted = report.evicted_count(),
        "http broadcast"
    );

    (
        StatusCode::ACCEPTED,
        Json(BroadcastResponse {
            recipients: report.delivered,
            evicted: report.evicted_count(),
        }),
    )
        .into_response()
}
