//! HTTP server exposing the summary event stream and resync endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use serde_json::{json, Map, Value};
use sumcast_core::{MetricsSink, SCHEMA_VERSION};
use sumcast_publish::{DiffPublisher, EventLog};

use crate::admission::AdmissionControl;
use crate::config::GatewayConfig;
use crate::error::Result;
use crate::stream::EventStream;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub log: Arc<EventLog>,
    pub publisher: Arc<DiffPublisher>,
    pub admission: Arc<AdmissionControl>,
    pub metrics: Arc<dyn MetricsSink>,
    pub config: Arc<GatewayConfig>,
    pub shutdown: CancellationToken,
}

/// Build the gateway router over the given state.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let mut router = Router::new()
        .route("/summary/events", get(events_handler))
        .route("/summary/resync", get(resync_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);
    if let Some(cors) = cors {
        router = router.layer(cors);
    }
    router
}

fn cors_layer(config: &GatewayConfig) -> Option<CorsLayer> {
    let origin = config.allow_origin.as_deref()?;
    if origin == "*" {
        return Some(CorsLayer::new().allow_origin(Any));
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => Some(CorsLayer::new().allow_origin(value)),
        Err(error) => {
            warn!(%error, origin = %origin, "Ignoring unparseable CORS origin");
            None
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Echo a sanitized client request id, or mint one.
fn request_id_for(headers: &HeaderMap) -> String {
    let supplied: String = headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(|raw| {
            raw.chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                .take(64)
                .collect()
        })
        .unwrap_or_default();
    if supplied.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        supplied
    }
}

async fn events_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let token = bearer_token(&headers);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok());

    let admitted = match state.admission.admit(remote.ip(), token, user_agent) {
        Ok(admitted) => admitted,
        Err(rejection) => {
            state.metrics.admission_rejected(rejection.reason());
            warn!(
                remote = %remote,
                reason = rejection.reason(),
                "Rejected stream connection"
            );
            return rejection.response(state.config.retry_after_secs);
        }
    };

    let request_id = request_id_for(&headers);
    let active = admitted.active_peers();
    state.metrics.connection_opened(active);
    info!(
        remote = %remote,
        request_id = %request_id,
        active,
        "Stream connection opened"
    );

    let stream = EventStream::new(
        Arc::clone(&state.log),
        &state.config,
        state.shutdown.clone(),
        Arc::clone(&state.metrics),
        admitted,
        request_id.clone(),
    );
    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-request-id", request_id.as_str())
        .body(stream.into_body())
    {
        Ok(response) => response,
        Err(error) => {
            warn!(%error, "Failed to build stream response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn resync_handler(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.publisher.resync_snapshot();
    let panels: Map<String, Value> = snapshot
        .hashes
        .iter()
        .map(|(key, hash)| (key.as_str().to_string(), json!({ "hash": hash })))
        .collect();
    Json(json!({
        "cycle": snapshot.cycle,
        "panels": panels,
        "schema_version": SCHEMA_VERSION,
    }))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render_exposition() {
        Some(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Summary gateway server: owns the admission state and shutdown token.
pub struct Gateway {
    state: AppState,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        log: Arc<EventLog>,
        publisher: Arc<DiffPublisher>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        let admission = Arc::new(AdmissionControl::new(&config)?);
        Ok(Self {
            state: AppState {
                log,
                publisher,
                admission,
                metrics,
                config: Arc::new(config),
                shutdown: CancellationToken::new(),
            },
        })
    }

    /// Router over this gateway's state, for mounting or testing.
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Token cancelled when `shutdown` is called.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Say bye to open streams and stop accepting connections.
    pub fn shutdown(&self) {
        self.state.shutdown.cancel();
    }

    /// Bind the configured port and serve until shutdown.
    pub async fn serve(&self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.port));
        let listener = TcpListener::bind(addr).await?;
        self.serve_with_listener(listener).await
    }

    /// Serve on an already-bound listener (tests bind port 0).
    pub async fn serve_with_listener(&self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "Summary gateway listening");
        let shutdown = self.state.shutdown.clone();
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
        Ok(())
    }
}
