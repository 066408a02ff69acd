//! `PointingServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use pointing_core::{HandshakeParams, IdentityResolver, TrustedHandshake};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_header::{SetResponseHeader, SetResponseHeaderLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::registry::SessionRegistry;
use crate::room::RoomPolicy;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handshake::{origin_allowed, rejection_status};
use crate::websocket::session::run_ws_session;

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; script-src 'self' 'unsafe-inline'; \
     style-src 'self' 'unsafe-inline'; img-src 'self' data:; connect-src 'self' ws: wss:";

const STATIC_CACHE_CONTROL: &str = "public, max-age=3600";

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live meetings.
    pub registry: Arc<SessionRegistry>,
    /// Turns handshake parameters into a connection identity.
    pub identity: Arc<dyn IdentityResolver>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Open WebSocket sessions.
    pub connections: Arc<AtomicUsize>,
    /// When the server started.
    pub start_time: Instant,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
}

/// The pointing server.
pub struct PointingServer {
    config: Arc<ServerConfig>,
    registry: Arc<SessionRegistry>,
    identity: Arc<dyn IdentityResolver>,
    shutdown: Arc<ShutdownCoordinator>,
    connections: Arc<AtomicUsize>,
    start_time: Instant,
    started_at: DateTime<Utc>,
}

impl PointingServer {
    /// Create a server that trusts handshake identities as supplied.
    pub fn new(config: ServerConfig, policy: RoomPolicy) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new(policy)),
            identity: Arc::new(TrustedHandshake),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            connections: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Replace the identity resolver.
    #[must_use]
    pub fn with_identity(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    /// Build the Axum router with all routes and layers.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: Arc::clone(&self.registry),
            identity: Arc::clone(&self.identity),
            config: Arc::clone(&self.config),
            shutdown: Arc::clone(&self.shutdown),
            connections: Arc::clone(&self.connections),
            start_time: self.start_time,
            started_at: self.started_at,
        };

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/ws", get(ws_handler));

        if let Some(dir) = &self.config.static_dir {
            let assets = ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")));
            router = router.fallback_service(SetResponseHeader::overriding(
                assets,
                header::CACHE_CONTROL,
                HeaderValue::from_static(STATIC_CACHE_CONTROL),
            ));
        }

        router
            .layer(cors_layer(&self.config.allowed_origins))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::REFERRER_POLICY,
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::CONTENT_SECURITY_POLICY,
                HeaderValue::from_static(CONTENT_SECURITY_POLICY),
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_address()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        info!(%addr, "listening");
        Ok((addr, handle))
    }

    /// Get the meeting registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Open WebSocket sessions.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET, Method::POST]);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let list: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o.trim_end_matches('/')) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid allowed origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(list))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.started_at,
        state.connections.load(Ordering::Relaxed),
        state.registry.meeting_count(),
    ))
}

/// GET /ws: check origin and identity, then upgrade.
async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<HandshakeParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !origin_allowed(&state.config.allowed_origins, origin) {
        warn!(origin = origin.unwrap_or_default(), "websocket origin rejected");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let context = match state.identity.resolve(&params) {
        Ok(context) => context,
        Err(e) => {
            warn!(error_kind = e.error_kind(), "handshake rejected");
            return (rejection_status(&e), e.to_string()).into_response();
        }
    };

    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let registry = Arc::clone(&state.registry);
    let config = Arc::clone(&state.config);
    let connections = Arc::clone(&state.connections);
    let shutdown = state.shutdown.token();
    let tracked = state.shutdown.track_session();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            run_ws_session(socket, context, registry, config, connections, shutdown).await;
            drop(tracked);
        })
}
