use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use proxichat_core::ClientId;
use proxichat_hub::{Hub, HubHandle};
use proxichat_telemetry::MetricsRecorder;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::connection;
use crate::errors::ServerError;
use crate::health;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub config: Arc<ServerConfig>,
    pub metrics: Arc<MetricsRecorder>,
    pub start_time: Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));
    if let Some(dir) = &state.config.static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }
    router
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, spawn the hub and the HTTP server. Returns a handle to shut both down.
pub async fn start(
    config: ServerConfig,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, ServerError> {
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let local_addr = listener.local_addr()?;

    let cancel = CancellationToken::new();
    let (hub, hub_handle) = Hub::new(config.hub_queue_capacity, Arc::clone(&metrics));
    let hub_task = tokio::spawn(hub.run(cancel.child_token()));

    let state = AppState {
        hub: hub_handle,
        config: Arc::new(config),
        metrics,
        start_time: Instant::now(),
    };
    let router = build_router(state);

    let shutdown = cancel.clone();
    let server_task = tokio::spawn(async move {
        let service = router.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
        {
            error!(error = %e, "server terminated");
        }
    });

    info!(addr = %local_addr, "proxichat server started");

    Ok(ServerHandle {
        addr: local_addr,
        cancel,
        server: server_task,
        hub: hub_task,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub addr: SocketAddr,
    cancel: CancellationToken,
    server: JoinHandle<()>,
    hub: JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting, stop the hub, and wait for the listener to drain.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.hub.await {
            warn!(error = %e, "hub task failed");
        }
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.server).await.is_err() {
            warn!("shutdown timed out after {SHUTDOWN_TIMEOUT:?}, some connections may still be open");
        }
        info!("proxichat server stopped");
    }
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    id: Option<String>,
}

/// Connection id from the query, else derived from the peer address.
fn resolve_client_id(requested: Option<String>, peer: SocketAddr) -> ClientId {
    match requested.filter(|id| !id.is_empty()) {
        Some(id) => ClientId::from_raw(id),
        None => ClientId::from_remote(peer),
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let client_id = resolve_client_id(params.id, peer);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| connection::serve_connection(socket, client_id, state))
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> Response {
    match state.hub.presence().await {
        Ok(users) => Json(health::health_check(state.start_time, users.len())).into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(health::hub_unavailable(state.start_time)),
        )
            .into_response(),
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.samples())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_state(static_dir: Option<std::path::PathBuf>) -> (AppState, CancellationToken) {
        let metrics = Arc::new(MetricsRecorder::new());
        let (hub, handle) = Hub::new(16, Arc::clone(&metrics));
        let cancel = CancellationToken::new();
        tokio::spawn(hub.run(cancel.clone()));
        let state = AppState {
            hub: handle,
            config: Arc::new(ServerConfig {
                static_dir,
                ..ServerConfig::default()
            }),
            metrics,
            start_time: Instant::now(),
        };
        (state, cancel)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn client_id_prefers_query_parameter() {
        let peer: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        assert_eq!(resolve_client_id(Some("alice".into()), peer).as_str(), "alice");
        assert_eq!(resolve_client_id(None, peer).as_str(), "user_10.0.0.1:4000");
        assert_eq!(resolve_client_id(Some(String::new()), peer).as_str(), "user_10.0.0.1:4000");
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (state, _cancel) = make_state(None);
        let (status, body) = get_json(build_router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn health_reports_unavailable_after_hub_stops() {
        let (state, cancel) = make_state(None);
        cancel.cancel();
        let app = build_router(state);
        // The hub may take a moment to observe cancellation.
        for _ in 0..50 {
            let (status, body) = get_json(app.clone(), "/health").await;
            if status == StatusCode::SERVICE_UNAVAILABLE {
                assert_eq!(body["status"], "unavailable");
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("hub never reported unavailable");
    }

    #[tokio::test]
    async fn metrics_endpoint_lists_samples() {
        let (state, _cancel) = make_state(None);
        state.metrics.counter_inc("hub.connections.total", &[], 3);
        let (status, body) = get_json(build_router(state), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["name"], "hub.connections.total");
        assert_eq!(body[0]["value"], 3.0);
    }

    #[tokio::test]
    async fn unknown_route_returns_404_without_static_dir() {
        let (state, _cancel) = make_state(None);
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn static_assets_served_as_fallback() {
        let dir = std::env::temp_dir().join(format!("proxichat-static-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("index.html"), "<h1>proxichat</h1>").unwrap();

        let (state, _cancel) = make_state(Some(dir.clone()));
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        assert_eq!(&body[..], b"<h1>proxichat</h1>");

        std::fs::remove_dir_all(&dir).ok();
    }
}
