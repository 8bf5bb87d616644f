//! `RelayServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_settings::RelaySettings;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::health::{self, HealthResponse};
use crate::registry::ConnectionRegistry;
use crate::router::EventRouter;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::origin::OriginPolicy;
use crate::websocket::session::{ClientOptions, run_client};
use crate::websocket::transport;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live clients and claimed names.
    pub registry: Arc<ConnectionRegistry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Which origins may upgrade.
    pub origin: OriginPolicy,
    /// Per-connection tuning.
    pub options: ClientOptions,
    /// Inbound frame size limit in bytes.
    pub max_message_size: usize,
    /// Prometheus handle for `/metrics`, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

/// The relay server.
pub struct RelayServer {
    settings: RelaySettings,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    origin: OriginPolicy,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl RelayServer {
    /// Build a server and its registry from settings.
    pub fn new(settings: RelaySettings) -> Self {
        let router = EventRouter::new(settings.server.require_login);
        let registry = ConnectionRegistry::new(router)
            .with_max_dropped_messages(settings.server.max_dropped_messages);
        let origin = OriginPolicy::from_allowed(settings.server.allowed_origins.clone());
        Self {
            settings,
            registry: Arc::new(registry),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            origin,
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Replace the origin policy derived from settings.
    #[must_use]
    pub fn with_origin_policy(mut self, origin: OriginPolicy) -> Self {
        self.origin = origin;
        self
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            origin: self.origin.clone(),
            options: ClientOptions::from_settings(&self.settings),
            max_message_size: self.settings.server.max_message_size,
            metrics: self.metrics.clone(),
            start_time: self.start_time,
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve in a background task.
    ///
    /// Returns the bound address (useful with port 0). The task exits once
    /// the shutdown token fires, after every client has been closed.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "relay server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let registry = Arc::clone(&self.registry);
        let handle = tokio::spawn(async move {
            let signal = async move {
                token.cancelled().await;
                let closed = registry.close_all();
                info!(closed, "shutdown signalled, stopped accepting connections");
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
            {
                error!(error = %e, "server exited with error");
            }
        });
        Ok((local_addr, handle))
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Settings the server was built from.
    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }
}

/// GET /ws
///
/// The origin check runs before the upgrade headers are validated so a
/// disallowed origin always gets `403`.
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if !state.origin.permits(origin) {
        warn!(origin = origin.unwrap_or(""), "rejected upgrade from disallowed origin");
        return StatusCode::FORBIDDEN.into_response();
    }
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let registry = Arc::clone(&state.registry);
    let options = state.options;
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            let (reader, writer) = transport::split(socket);
            run_client(reader, writer, registry, options).await;
        })
        .into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        &state.registry,
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
