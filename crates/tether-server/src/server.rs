//! `TetherServer`: axum HTTP surface and listener lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tether_core::TetherError;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::app::AppHandler;
use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::handshake::Handshake;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_UPGRADES_TOTAL;
use crate::registry::Registry;
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handshake: Arc<Handshake>,
    pub start_time: Instant,
    pub max_message_size: usize,
    pub metrics: Option<PrometheusHandle>,
    pub shutdown: Arc<ShutdownCoordinator>,
}

/// The tether server, before it is bound.
pub struct TetherServer {
    config: ServerConfig,
    registry: Arc<Registry>,
    app: Arc<dyn AppHandler>,
    auth: Option<Arc<dyn Authenticator>>,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl TetherServer {
    pub fn new(config: ServerConfig, app: Arc<dyn AppHandler>) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            app,
            auth: None,
            metrics: None,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Require a resolved session on every upgrade.
    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Serve `/metrics` from this recorder handle.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let handshake = Handshake::new(
            self.config.socket.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.app),
            self.auth.clone(),
        );
        let state = AppState {
            handshake: Arc::new(handshake),
            start_time: self.start_time,
            max_message_size: self.config.max_message_size,
            metrics: self.metrics.clone(),
            shutdown: Arc::clone(&self.shutdown),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve in a background task.
    pub async fn listen(&self) -> Result<ServerHandle, std::io::Error> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let service = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.shutdown.token();
        let serve = tokio::spawn(async move {
            let result = axum::serve(listener, service)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server loop failed");
            }
        });

        info!(addr = %local_addr, "tether server listening");
        Ok(ServerHandle {
            addr: local_addr,
            registry: Arc::clone(&self.registry),
            shutdown: Arc::clone(&self.shutdown),
            shutdown_timeout: self.config.shutdown_timeout,
            serve,
        })
    }
}

/// Bind a server for `app`, optionally behind `auth`.
pub async fn start(
    config: ServerConfig,
    app: Arc<dyn AppHandler>,
    auth: Option<Arc<dyn Authenticator>>,
) -> Result<ServerHandle, std::io::Error> {
    let mut server = TetherServer::new(config, app);
    if let Some(auth) = auth {
        server = server.with_authenticator(auth);
    }
    server.listen().await
}

/// A running server.
pub struct ServerHandle {
    pub addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown: Arc<ShutdownCoordinator>,
    shutdown_timeout: Duration,
    serve: JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Refuse new upgrades, close every client, then stop the serve loop
    /// within the configured timeout.
    pub async fn shutdown(self) {
        self.shutdown.shutdown();
        let _ = self.registry.shutdown();
        self.shutdown
            .graceful_shutdown(vec![self.serve], self.shutdown_timeout)
            .await;
        info!("tether server stopped");
    }
}

#[derive(Debug, Default, Deserialize)]
struct WsParams {
    #[serde(rename = "client-id")]
    client_id: Option<String>,
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        metrics::counter!(WS_UPGRADES_TOTAL, "outcome" => "shutting_down").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }

    let prepared = match state
        .handshake
        .prepare(&headers, params.client_id.as_deref(), peer)
        .await
    {
        Ok(prepared) => prepared,
        Err(err) => {
            warn!(remote = %peer, error = %err, "upgrade refused");
            metrics::counter!(WS_UPGRADES_TOTAL, "outcome" => err.error_kind()).increment(1);
            return error_response(&err);
        }
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            if !prepared.is_authenticated() {
                let err = TetherError::Unauthenticated;
                metrics::counter!(WS_UPGRADES_TOTAL, "outcome" => err.error_kind()).increment(1);
                return error_response(&err);
            }
            warn!(remote = %prepared.remote_addr(), error = %rejection, "websocket upgrade failed");
            metrics::counter!(WS_UPGRADES_TOTAL, "outcome" => "rejected").increment(1);
            return rejection.into_response();
        }
    };

    metrics::counter!(WS_UPGRADES_TOTAL, "outcome" => "upgraded").increment(1);
    let handshake = Arc::clone(&state.handshake);
    upgrade
        .max_message_size(state.max_message_size)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| async move {
            let conn = Connection::from_socket(socket, prepared.remote_addr().to_owned());
            let outcome = handshake.complete(prepared, conn).await;
            debug!(?outcome, "handshake finished");
        })
}

fn error_response(err: &TetherError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.to_string()).into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.handshake.registry().counts();
    Json(health::health_check(state.start_time, counts))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tether_core::SessionIdentity;
    use tower::ServiceExt;

    use crate::app::EchoHandler;
    use crate::policy::OriginPolicy;

    fn make_server() -> TetherServer {
        TetherServer::new(ServerConfig::default(), Arc::new(EchoHandler))
    }

    fn app(server: &TetherServer) -> Router {
        server
            .router()
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 50_000))))
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_clients() {
        let server = make_server();
        let resp = app(&server).oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["clients"]["active"], 0);
        assert_eq!(parsed["clients"]["stale"], 0);
    }

    #[tokio::test]
    async fn metrics_absent_without_handle() {
        let server = make_server();
        let resp = app(&server).oneshot(get("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_rendered_with_handle() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = make_server().with_metrics(handle);
        let resp = app(&server).oneshot(get("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }

    #[tokio::test]
    async fn plain_get_on_ws_is_rejected() {
        let server = make_server();
        let resp = app(&server).oneshot(get("/ws")).await.unwrap();
        assert!(resp.status().is_client_error());
        assert_eq!(server.registry().count(), 0);
    }

    #[tokio::test]
    async fn unauthenticated_plain_get_is_401() {
        let reject = |_: &HeaderMap| -> Option<SessionIdentity> { None };
        let server = make_server().with_authenticator(Arc::new(reject));
        let resp = app(&server).oneshot(get("/ws")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn foreign_origin_is_403() {
        let mut config = ServerConfig::default();
        config.socket.origins = OriginPolicy::from_allowed(Some(&["https://app.example".to_string()]));
        let server = TetherServer::new(config, Arc::new(EchoHandler));

        let req = Request::builder()
            .uri("/ws?client-id=c1")
            .header("origin", "https://evil.example")
            .body(Body::empty())
            .unwrap();
        let resp = app(&server).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn upgrade_refused_while_shutting_down() {
        let server = make_server();
        server.shutdown().shutdown();
        let resp = app(&server).oneshot(get("/ws")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(server.registry().count(), 0);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let resp = app(&server).oneshot(get("/nonexistent")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn error_response_uses_error_status() {
        let resp = error_response(&TetherError::OriginRejected("x".into()));
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = error_response(&TetherError::Unauthenticated);
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
