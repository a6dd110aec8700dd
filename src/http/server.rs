//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the upgrade handler
//! - Wire up middleware (tracing, request ID)
//! - Refuse upgrades for unrouted paths (404) and over the connection limit (503)
//! - Serve until shutdown, then wait for open sockets to close

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        ConnectInfo, Request, State,
    },
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::{GatewayConfig, WebSocketConfig};
use crate::http::request::{propagate_request_id_layer, request_id_of, set_request_id_layer, REQUEST_ID_FIELD};
use crate::http::websocket::serve_socket;
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::observability::metrics;
use crate::routing::RouteTable;
use crate::socket::{SocketAdapter, TopicHub};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub adapter: Arc<SocketAdapter>,
    pub hub: Arc<TopicHub>,
    pub tracker: ConnectionTracker,
    pub shutdown: Shutdown,
    pub websocket: WebSocketConfig,
}

/// WebSocket gateway serving one route table.
pub struct GatewayServer {
    router: Router,
    state: AppState,
    grace: Duration,
}

impl GatewayServer {
    /// Create a new server for `table` with the given configuration.
    pub fn new(config: &GatewayConfig, table: RouteTable, shutdown: Shutdown) -> Self {
        let adapter = SocketAdapter::new(Arc::new(table))
            .with_tokens(config.binder.bool_tokens())
            .with_max_frame_bytes(config.websocket.max_frame_bytes);

        let state = AppState {
            adapter: Arc::new(adapter),
            hub: Arc::new(TopicHub::new()),
            tracker: ConnectionTracker::new(config.listener.max_connections),
            shutdown,
            websocket: config.websocket.clone(),
        };

        Self {
            router: Self::build_router(state.clone()),
            state,
            grace: Duration::from_secs(config.listener.shutdown_grace_secs),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        let trace = TraceLayer::new_for_http().make_span_with(|request: &Request| {
            tracing::info_span!(
                "upgrade",
                method = %request.method(),
                uri = %request.uri(),
                request_id = request_id_of(request.headers()).unwrap_or_default(),
            )
        });

        Router::new()
            .route("/", get(upgrade_handler))
            .route("/{*path}", get(upgrade_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(trace)
                    .layer(propagate_request_id_layer()),
            )
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Gateway starting");

        let mut stop = self.state.shutdown.subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        // Serve with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop.recv().await })
            .await?;

        let open = self.state.tracker.active_count();
        if open > 0 {
            tracing::info!(open, grace = ?self.grace, "Waiting for sockets to close");
        }
        if !self.state.tracker.wait_for_idle(self.grace).await {
            tracing::warn!(
                open = self.state.tracker.active_count(),
                "Sockets still open after grace period"
            );
        }

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// Accept an upgrade when the path is routed and there is capacity.
async fn upgrade_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let path = uri.path();

    let mut extra = Map::new();
    if let Some(request_id) = request_id_of(&headers) {
        extra.insert(REQUEST_ID_FIELD.to_string(), Value::from(request_id));
    }
    extra.insert("remote_addr".to_string(), Value::from(peer.to_string()));

    let Some(context) = state.adapter.upgrade(path, extra) else {
        metrics::record_rejected_upgrade("no_route");
        return (StatusCode::NOT_FOUND, "No route for path").into_response();
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::debug!(path, %rejection, "Not a websocket upgrade");
            metrics::record_rejected_upgrade("not_websocket");
            return rejection.into_response();
        }
    };

    if state.shutdown.is_triggered() {
        metrics::record_rejected_upgrade("shutting_down");
        return (StatusCode::SERVICE_UNAVAILABLE, "Shutting down").into_response();
    }

    let Some(guard) = state.tracker.try_track() else {
        tracing::warn!(path, active = state.tracker.active_count(), "Connection limit reached");
        metrics::record_rejected_upgrade("capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    };

    upgrade
        .on_failed_upgrade(|error| tracing::warn!(%error, "Websocket upgrade failed"))
        .on_upgrade(move |socket| serve_socket(socket, context, guard, state))
}
