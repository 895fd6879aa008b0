//! HTTP transport.
//!
//! | Route          | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | `POST /mcp`    | One JSON-RPC message per request                     |
//! | `DELETE /mcp`  | Close the session named by `Mcp-Session-Id`          |
//! | `GET /`        | Server identity and supported protocol versions      |
//! | `GET /health`  | Liveness; `503` once shutdown has begun              |
//! | `GET /metrics` | Request counters (`404` when disabled)               |
//! | `POST /shutdown` | Begin graceful shutdown (`404` when disabled)      |
//!
//! `initialize` creates a session and returns its id in the `Mcp-Session-Id`
//! response header; every later request must present it. Server-initiated
//! notifications are not delivered over this transport.
//!
//! HTTP has no disconnect, so a session unused for `http.session_idle_secs`
//! is closed and forgotten. At most `http.max_sessions` are open at once.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::time::MissedTickBehavior;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::HttpConfig;
use crate::mcp::dispatcher::Dispatcher;
use crate::mcp::protocol::{
    parse_value, ErrorCode, IncomingMessage, JsonRpcError, JsonRpcErrorData, JsonRpcReply,
    RequestId, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::mcp::session::Session;

/// Session header name (HTTP headers are case-insensitive).
pub const SESSION_HEADER: &str = "mcp-session-id";

struct SessionEntry {
    session: Arc<Session>,
    last_seen: Mutex<Instant>,
}

impl SessionEntry {
    fn idle_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_seen.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

struct HttpState {
    dispatcher: Arc<Dispatcher>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    idle_timeout: Duration,
    max_sessions: usize,
    enable_metrics: bool,
    enable_shutdown: bool,
}

type SharedState = Arc<HttpState>;

impl HttpState {
    /// Looks up a live session and marks it used. An idle one is dropped.
    fn session(&self, id: &str) -> Option<Arc<Session>> {
        let now = Instant::now();
        {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            let entry = sessions.get(id)?;
            if entry.idle_at(now) < self.idle_timeout {
                *entry.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = now;
                return Some(Arc::clone(&entry.session));
            }
        }
        if let Some(session) = self.remove(id) {
            session.close();
            tracing::info!(session = %id, "HTTP session expired");
        }
        None
    }

    /// Stores `session` unless the table is full of live sessions.
    fn insert(&self, session: Arc<Session>) -> bool {
        let now = Instant::now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.len() >= self.max_sessions {
            self.evict_idle(&mut sessions, now);
            if sessions.len() >= self.max_sessions {
                return false;
            }
        }
        sessions.insert(
            session.id().to_string(),
            SessionEntry {
                session,
                last_seen: Mutex::new(now),
            },
        );
        drop(sessions);
        self.dispatcher.metrics().session_opened();
        true
    }

    fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed.is_some() {
            self.dispatcher.metrics().session_closed();
        }
        removed.map(|entry| entry.session)
    }

    /// Closes every session idle at `now`; returns how many.
    fn sweep_idle(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        self.evict_idle(&mut sessions, now)
    }

    fn evict_idle(&self, sessions: &mut HashMap<String, SessionEntry>, now: Instant) -> usize {
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let live = entry.idle_at(now) < self.idle_timeout;
            if !live {
                entry.session.close();
                self.dispatcher.metrics().session_closed();
                tracing::info!(session = %id, "HTTP session expired");
            }
            live
        });
        before - sessions.len()
    }
}

/// Builds the router. Exposed separately from [`serve`] for in-process tests.
#[must_use]
pub fn router(dispatcher: Arc<Dispatcher>, config: &HttpConfig) -> Router {
    build(dispatcher, config).0
}

fn build(dispatcher: Arc<Dispatcher>, config: &HttpConfig) -> (Router, SharedState) {
    let state: SharedState = Arc::new(HttpState {
        dispatcher,
        sessions: RwLock::new(HashMap::new()),
        idle_timeout: Duration::from_secs(config.session_idle_secs),
        max_sessions: config.max_sessions,
        enable_metrics: config.enable_metrics,
        enable_shutdown: config.enable_shutdown,
    });

    let router = Router::new()
        .route("/", get(server_info))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/shutdown", post(shutdown))
        .route("/mcp", post(post_mcp).delete(delete_mcp))
        .with_state(Arc::clone(&state))
        .layer(cors_layer(&config.allowed_origins))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        );
    (router, state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let session_header = HeaderName::from_static(SESSION_HEADER);
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, session_header.clone()])
        .expose_headers([session_header])
        .max_age(Duration::from_secs(86_400));

    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

/// Binds `host:port` and serves until `shutdown` resolves or `POST /shutdown`
/// is called.
///
/// # Errors
///
/// Returns an error if binding or serving fails.
pub async fn serve<S>(dispatcher: Arc<Dispatcher>, config: &HttpConfig, shutdown: S) -> io::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let (app, state) = build(dispatcher, config);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!(address = %listener.local_addr()?, "HTTP transport listening");

    let sweeper = tokio::spawn(sweep_sessions(Arc::clone(&state)));
    let metrics = Arc::clone(state.dispatcher.metrics());
    let stop = async move {
        tokio::select! {
            () = shutdown => {}
            () = metrics.shutdown_requested() => tracing::info!("Shutdown requested over HTTP"),
        }
    };

    let result = axum::serve(listener, app).with_graceful_shutdown(stop).await;
    sweeper.abort();
    result
}

async fn sweep_sessions(state: SharedState) {
    let period = (state.idle_timeout / 2).clamp(Duration::from_secs(1), Duration::from_secs(60));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let expired = state.sweep_idle(Instant::now());
        if expired > 0 {
            tracing::debug!(expired, "Swept idle HTTP sessions");
        }
    }
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

fn rpc_error(status: StatusCode, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcReply::from(error))).into_response()
}

/// Resolves the session named by the request header, or the error response.
fn require_session(
    headers: &HeaderMap,
    state: &HttpState,
    id: Option<RequestId>,
) -> Result<Arc<Session>, Response> {
    let Some(session_id) = session_id(headers) else {
        return Err(rpc_error(
            StatusCode::BAD_REQUEST,
            JsonRpcError::new(
                id,
                JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, "Missing Mcp-Session-Id header"),
            ),
        ));
    };
    state.session(session_id).ok_or_else(|| {
        rpc_error(
            StatusCode::NOT_FOUND,
            JsonRpcError::new(
                id,
                JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, "Unknown or expired session"),
            ),
        )
    })
}

async fn post_mcp(State(state): State<SharedState>, headers: HeaderMap, body: Bytes) -> Response {
    let Ok(value) = serde_json::from_slice::<Value>(&body) else {
        state.dispatcher.metrics().record_error();
        return rpc_error(StatusCode::BAD_REQUEST, JsonRpcError::parse_error());
    };
    let message = match parse_value(value) {
        Ok(message) => message,
        Err(error) => {
            state.dispatcher.metrics().record_error();
            return rpc_error(StatusCode::BAD_REQUEST, error);
        }
    };

    match message {
        IncomingMessage::Notification(notif) => match require_session(&headers, &state, None) {
            Ok(session) => {
                state.dispatcher.handle_notification(&session, &notif);
                StatusCode::ACCEPTED.into_response()
            }
            Err(response) => response,
        },
        IncomingMessage::Request(req) if req.method == "initialize" => {
            if !state.dispatcher.metrics().is_accepting() {
                return rpc_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    JsonRpcError::new(
                        Some(req.id),
                        JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, "Server is shutting down"),
                    ),
                );
            }

            let session = Arc::new(Session::connected(Uuid::new_v4().to_string()));
            let reply = state.dispatcher.handle_request(&session, req).await;
            if reply.error().is_some() {
                return (StatusCode::OK, Json(reply)).into_response();
            }

            let id = session.id().to_string();
            if !state.insert(Arc::clone(&session)) {
                session.close();
                tracing::warn!(limit = state.max_sessions, "Refusing HTTP session, limit reached");
                return rpc_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    JsonRpcError::new(
                        reply.id().cloned(),
                        JsonRpcErrorData::with_message(ErrorCode::ServerError, "Too many open sessions"),
                    ),
                );
            }
            tracing::info!(session = %id, "HTTP session created");
            (
                StatusCode::OK,
                [(HeaderName::from_static(SESSION_HEADER), id)],
                Json(reply),
            )
                .into_response()
        }
        IncomingMessage::Request(req) => match require_session(&headers, &state, Some(req.id.clone())) {
            Ok(session) => {
                let reply = state.dispatcher.handle_request(&session, req).await;
                (StatusCode::OK, Json(reply)).into_response()
            }
            Err(response) => response,
        },
    }
}

async fn delete_mcp(State(state): State<SharedState>, headers: HeaderMap) -> StatusCode {
    let Some(id) = session_id(&headers) else {
        return StatusCode::BAD_REQUEST;
    };
    match state.remove(id) {
        Some(session) => {
            session.close();
            tracing::info!(session = %id, "HTTP session closed");
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn server_info(State(state): State<SharedState>) -> Json<Value> {
    let settings = state.dispatcher.settings();
    Json(json!({
        "name": settings.server_name,
        "version": settings.server_version,
        "transport": "http",
        "protocolVersions": SUPPORTED_PROTOCOL_VERSIONS,
        "endpoints": {
            "mcp": "/mcp",
            "health": "/health",
            "metrics": "/metrics",
            "shutdown": "/shutdown",
        },
    }))
}

async fn shutdown(State(state): State<SharedState>) -> Response {
    if !state.enable_shutdown {
        return StatusCode::NOT_FOUND.into_response();
    }
    tracing::info!("Received shutdown request");
    state.dispatcher.metrics().begin_shutdown();
    Json(json!({
        "status": "shutting_down",
        "message": "Server shutdown initiated",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}

async fn health(State(state): State<SharedState>) -> Response {
    let metrics = state.dispatcher.metrics();
    let snapshot_version = state.dispatcher.registry().current().version();

    if metrics.is_accepting() {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "uptime_secs": metrics.uptime_secs(),
                "snapshot_version": snapshot_version,
            })),
        )
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "shutting_down" })),
        )
            .into_response()
    }
}

async fn metrics(State(state): State<SharedState>) -> Response {
    if !state.enable_metrics {
        return StatusCode::NOT_FOUND.into_response();
    }
    let version = state.dispatcher.registry().current().version();
    Json(state.dispatcher.metrics().snapshot(version)).into_response()
}
