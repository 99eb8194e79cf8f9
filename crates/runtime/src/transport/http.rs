//! Streamable-HTTP, WebSocket, legacy SSE+POST, and out-of-band job/
//! discovery endpoints (§4.8), grounded on the teacher's `api/server.rs`
//! router composition and `api/ws_handler.rs` upgrade handling.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::{self, AuthContext, Authenticator, RateLimiter};
use crate::config::Config;
use crate::mcp::tools::{research, AppState};
use crate::mcp::{Dispatcher, JsonRpcRequest, JsonRpcResponse, McpSession};
use crate::metrics::MetricsRegistry;
use crate::storage::StorageGateway;
use crate::types::{JobId, TransportKind};

use super::sessions::SessionStore;

/// Per-connection outbound channel for the legacy SSE+POST transport: the
/// `GET /sse` handler owns the receiver, `POST /messages/:id` looks up the
/// sender by connection id and forwards the dispatch result onto it.
type LegacySseChannels = DashMap<String, tokio::sync::mpsc::Sender<String>>;

/// OpenAPI document served at `/api-docs/openapi.json` (browsable via
/// `/swagger-ui`). Covers the out-of-band REST surface; the JSON-RPC
/// `/mcp`, WebSocket, and legacy SSE transports are documented by the MCP
/// protocol itself rather than an OpenAPI schema.
#[derive(OpenApi)]
#[openapi(paths(
    handle_health,
    handle_metrics,
    handle_about,
    handle_discovery_server,
    handle_discovery_resource,
    handle_submit_job,
    handle_job_events,
))]
struct ApiDoc;

#[derive(Clone)]
pub struct TransportState {
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<Authenticator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<MetricsRegistry>,
    pub app: AppState,
    pub config: Arc<Config>,
    pub start_time: Instant,
    legacy_sse: Arc<LegacySseChannels>,
}

impl TransportState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        sessions: Arc<SessionStore>,
        auth: Arc<Authenticator>,
        rate_limiter: Arc<RateLimiter>,
        metrics: Arc<MetricsRegistry>,
        app: AppState,
        config: Arc<Config>,
    ) -> Self {
        Self {
            dispatcher,
            sessions,
            auth,
            rate_limiter,
            metrics,
            app,
            config,
            start_time: Instant::now(),
            legacy_sse: Arc::new(DashMap::new()),
        }
    }
}

pub fn router(state: TransportState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect::<Vec<_>>(),
        )
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::DELETE])
        .allow_headers([axum::http::header::AUTHORIZATION, axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/mcp", post(handle_mcp_post).get(handle_mcp_get).delete(handle_mcp_delete))
        .route("/mcp/ws", get(handle_ws))
        .route("/sse", get(handle_legacy_sse))
        .route("/messages/:connection_id", post(handle_legacy_message))
        .route("/jobs", post(handle_submit_job))
        .route("/jobs/:job_id/events", get(handle_job_events))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/about", get(handle_about))
        .route("/.well-known/mcp-server", get(handle_discovery_server))
        .route("/.well-known/oauth-protected-resource", get(handle_discovery_resource))
        .route("/.well-known/oauth-protected-resource/mcp", get(handle_discovery_resource))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit_layer))
        .layer(axum::middleware::from_fn(security_headers_layer))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn rate_limit_layer(
    State(state): State<TransportState>,
    headers: HeaderMap,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<Response, StatusCode> {
    let ip = auth::extract_client_ip(
        headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()),
        headers.get("x-real-ip").and_then(|v| v.to_str().ok()),
        None,
    );
    let decision = state.rate_limiter.check(ip);
    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response()
    };
    let headers = response.headers_mut();
    headers.insert("ratelimit-limit", decision.limit.into());
    headers.insert("ratelimit-remaining", decision.remaining.into());
    headers.insert("ratelimit-reset", decision.reset_secs.into());
    Ok(response)
}

async fn security_headers_layer(req: axum::extract::Request, next: axum::middleware::Next) -> Response {
    let mut response = next.run(req).await;
    let status = response.status();
    let headers = response.headers_mut();
    headers.insert(
        "strict-transport-security",
        "max-age=63072000; includeSubDomains".parse().unwrap(),
    );
    headers.insert("x-content-type-options", "nosniff".parse().unwrap());
    headers.insert("x-frame-options", "DENY".parse().unwrap());

    // RFC 9728: point a rejected caller at the protected-resource metadata
    // document so it can discover the authorization server on its own.
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let challenge = format!(
            "Bearer resource_metadata=\"/.well-known/oauth-protected-resource\", error=\"{}\"",
            if status == StatusCode::UNAUTHORIZED { "invalid_token" } else { "insufficient_scope" }
        );
        if let Ok(value) = challenge.parse() {
            response.headers_mut().insert(axum::http::header::WWW_AUTHENTICATE, value);
        }
    }
    response
}

async fn authenticate(state: &TransportState, headers: &HeaderMap) -> Result<AuthContext, StatusCode> {
    if state.config.require_https {
        // Enforcement happens at the reverse-proxy/TLS-terminator in
        // practice; here we only refuse to silently accept a plaintext
        // forwarded-proto claim.
        if let Some(proto) = headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok()) {
            if proto != "https" {
                return Err(StatusCode::FORBIDDEN);
            }
        }
    }
    let auth_header = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    state
        .auth
        .authenticate(auth_header)
        .await
        .map_err(|_| StatusCode::UNAUTHORIZED)
}

fn session_for(state: &TransportState, headers: &HeaderMap, transport: TransportKind) -> Arc<McpSession> {
    let existing = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .and_then(|id| state.sessions.get(id));
    existing.unwrap_or_else(|| state.sessions.create(transport))
}

async fn handle_mcp_post(
    State(state): State<TransportState>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> Result<Response, StatusCode> {
    authenticate(&state, &headers).await?;

    let session = session_for(&state, &headers, TransportKind::StreamableHttp);
    let outcome = state.dispatcher.dispatch(&session, request).await;

    let wants_sse = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"));

    let session_id_header = session.id().to_string();

    if wants_sse && (!outcome.progress.is_empty() || outcome.response.is_some()) {
        let mut events = Vec::new();
        for (token, progress, message) in outcome.progress {
            events.push(Ok::<_, Infallible>(
                Event::default()
                    .event("progress")
                    .json_data(json!({ "progressToken": token, "progress": progress, "message": message }))
                    .unwrap_or_else(|_| Event::default()),
            ));
        }
        if let Some(response) = outcome.response {
            events.push(Ok(Event::default().event("response").json_data(response).unwrap_or_else(|_| Event::default())));
        }
        let stream = futures::stream::iter(events);
        let mut response = Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
        response.headers_mut().insert("mcp-session-id", session_id_header.parse().unwrap());
        return Ok(response);
    }

    let mut response = match outcome.response {
        Some(r) => Json(r).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    response.headers_mut().insert("mcp-session-id", session_id_header.parse().unwrap());
    Ok(response)
}

/// Per §4.8, `GET /mcp` opens a standing SSE stream for server-initiated
/// notifications on an already-initialized session; it carries no
/// dispatcher traffic of its own, only a keep-alive.
async fn handle_mcp_get(
    State(state): State<TransportState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    authenticate(&state, &headers).await?;
    let session = session_for(&state, &headers, TransportKind::StreamableHttp);
    if !session.is_ready() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let stream = futures::stream::once(async { Ok(Event::default().event("ready").data("{}")) });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn handle_mcp_delete(State(state): State<TransportState>, headers: HeaderMap) -> StatusCode {
    if let Some(id) = headers.get("mcp-session-id").and_then(|v| v.to_str().ok()).and_then(|s| s.parse().ok()) {
        state.sessions.remove(id);
    }
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct WsAuthParams {
    token: Option<String>,
}

async fn handle_ws(
    ws: WebSocketUpgrade,
    State(state): State<TransportState>,
    Query(params): Query<WsAuthParams>,
) -> Result<Response, StatusCode> {
    let header = params.token.as_deref().map(|t| format!("Bearer {t}"));
    authenticate(&state, &headers_with_bearer(header.as_deref())).await?;
    Ok(ws.on_upgrade(move |socket| handle_ws_socket(socket, state)))
}

fn headers_with_bearer(bearer: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(value) = bearer {
        if let Ok(parsed) = value.parse() {
            headers.insert(axum::http::header::AUTHORIZATION, parsed);
        }
    }
    headers
}

/// WebSocket JSON-RPC loop. Per §4.7/§4.8, batched (array) requests are
/// rejected on this transport with `-32600` rather than processed.
async fn handle_ws_socket(socket: WebSocket, state: TransportState) {
    let (mut sink, mut stream) = socket.split();
    let session = state.sessions.create(TransportKind::WebSocket);

    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let parsed: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => {
                let err = crate::mcp::JsonRpcError::parse_error();
                let response = JsonRpcResponse::failure(Value::Null, err);
                if send_json(&mut sink, &response).await.is_err() {
                    break;
                }
                continue;
            }
        };

        if parsed.is_array() {
            let err = crate::mcp::JsonRpcError::new(-32600, "batch requests not supported on this transport");
            let response = JsonRpcResponse::failure(Value::Null, err);
            if send_json(&mut sink, &response).await.is_err() {
                break;
            }
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_value(parsed) {
            Ok(r) => r,
            Err(_) => {
                let err = crate::mcp::JsonRpcError::invalid_request();
                let response = JsonRpcResponse::failure(Value::Null, err);
                if send_json(&mut sink, &response).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let outcome = state.dispatcher.dispatch(&session, request).await;
        for (token, progress, message) in outcome.progress {
            let notification = crate::mcp::JsonRpcNotification::progress(token, progress, message);
            if send_json(&mut sink, &notification).await.is_err() {
                break;
            }
        }
        if let Some(response) = outcome.response {
            if send_json(&mut sink, &response).await.is_err() {
                break;
            }
        }
    }

    state.sessions.remove(session.id());
}

async fn send_json<T: serde::Serialize>(
    sink: &mut futures::stream::SplitSink<WebSocket, WsMessage>,
    value: &T,
) -> Result<(), axum::Error> {
    use futures::SinkExt;
    let payload = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    sink.send(WsMessage::Text(payload)).await
}

/// Legacy SSE+POST transport (§4.8): `GET /sse` opens the event stream and
/// announces the POST endpoint via an `endpoint` event; `POST
/// /messages/:connectionId` submits requests whose results are delivered
/// back over that stream rather than in the POST response body.
async fn handle_legacy_sse(
    State(state): State<TransportState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    authenticate(&state, &headers).await?;
    let session = state.sessions.create(TransportKind::LegacySse);
    let connection_id = session.id().to_string();

    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(64);
    state.legacy_sse.insert(connection_id.clone(), tx);

    let endpoint_event = Event::default()
        .event("endpoint")
        .data(format!("/messages/{connection_id}"));

    let legacy_sse = state.legacy_sse.clone();
    let stream = futures::stream::once(async move { Ok(endpoint_event) }).chain(futures::stream::unfold(
        (rx, connection_id, legacy_sse),
        |(mut rx, connection_id, legacy_sse)| async move {
            match rx.recv().await {
                Some(payload) => Some((Ok(Event::default().event("message").data(payload)), (rx, connection_id, legacy_sse))),
                None => {
                    legacy_sse.remove(&connection_id);
                    None
                }
            }
        },
    ));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn handle_legacy_message(
    State(state): State<TransportState>,
    Path(connection_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> StatusCode {
    if authenticate(&state, &headers).await.is_err() {
        return StatusCode::UNAUTHORIZED;
    }
    let Some(session_id) = connection_id.parse().ok() else {
        return StatusCode::NOT_FOUND;
    };
    let Some(session) = state.sessions.get(session_id) else {
        return StatusCode::NOT_FOUND;
    };
    let Some(sender) = state.legacy_sse.get(&connection_id).map(|e| e.clone()) else {
        return StatusCode::NOT_FOUND;
    };

    let outcome = state.dispatcher.dispatch(&session, request).await;
    for (token, progress, message) in outcome.progress {
        let notification = crate::mcp::JsonRpcNotification::progress(token, progress, message);
        let _ = sender.send(serde_json::to_string(&notification).unwrap_or_default()).await;
    }
    if let Some(response) = outcome.response {
        let _ = sender.send(serde_json::to_string(&response).unwrap_or_default()).await;
    }
    StatusCode::ACCEPTED
}

/// Out-of-band job submission (§6), for callers that don't speak MCP at
/// all: same canonical request/response shape as the `research` tool.
#[utoipa::path(
    post,
    path = "/jobs",
    responses(
        (status = 200, description = "Job accepted, already running, or served from the idempotency cache"),
        (status = 400, description = "Malformed research request"),
    )
)]
async fn handle_submit_job(
    State(state): State<TransportState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    authenticate(&state, &headers).await?;
    let request = research::parse_research_request(&body).map_err(|_| StatusCode::BAD_REQUEST)?;
    let response = research::submit(&state.app, &request).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/jobs/{job_id}/events",
    params(("job_id" = String, Path, description = "Job id")),
    responses((status = 200, description = "Server-sent event stream of job events, resumable via Last-Event-ID"))
)]
async fn handle_job_events(
    State(state): State<TransportState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    authenticate(&state, &headers).await?;
    let job_id: JobId = job_id.parse().map_err(|_| StatusCode::BAD_REQUEST)?;

    let since = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);

    let replay = state
        .app
        .storage
        .get_job_events(job_id, since, 1000)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let live_rx = state.app.jobs.event_bus().subscribe(job_id);

    let replay_stream = futures::stream::iter(replay.into_iter().map(event_to_sse).map(Ok));
    let live_stream = futures::stream::unfold(live_rx, |mut rx| async move {
        match rx.recv().await {
            Ok(event) => Some((Ok(event_to_sse(event)), rx)),
            Err(_) => None,
        }
    });

    Ok(Sse::new(replay_stream.chain(live_stream)).keep_alive(KeepAlive::default()))
}

fn event_to_sse(event: crate::types::JobEvent) -> Event {
    Event::default()
        .id(event.seq.to_string())
        .event(event.event_type.as_str())
        .json_data(&event.payload)
        .unwrap_or_else(|_| Event::default())
}

#[utoipa::path(get, path = "/health", responses((status = 200, description = "Liveness and degraded-mode status")))]
async fn handle_health(State(state): State<TransportState>) -> Json<Value> {
    Json(json!({
        "status": if state.app.storage.is_degraded() { "degraded" } else { "ok" },
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "mode": format!("{:?}", state.app.mode).to_lowercase(),
    }))
}

#[utoipa::path(
    get,
    path = "/metrics",
    responses((status = 200, description = "Job/storage/embedder metrics, JSON by default or Prometheus text when `Accept: text/plain`"))
)]
async fn handle_metrics(State(state): State<TransportState>, headers: HeaderMap) -> Response {
    let wants_text = headers
        .get(axum::http::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/plain"));
    if wants_text {
        (
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            state.metrics.render_prometheus(),
        )
            .into_response()
    } else {
        Json(state.metrics.render_json()).into_response()
    }
}

#[utoipa::path(get, path = "/about", responses((status = 200, description = "Server name, version, and supported transports")))]
async fn handle_about(State(state): State<TransportState>) -> Json<Value> {
    Json(json!({
        "name": "deepresearch-mcpd",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": format!("{:?}", state.app.mode).to_lowercase(),
        "transports": ["stdio", "streamable-http", "websocket", "sse"],
    }))
}

#[utoipa::path(get, path = "/.well-known/mcp-server", responses((status = 200, description = "MCP server identity document")))]
async fn handle_discovery_server(State(state): State<TransportState>) -> Json<Value> {
    let _ = &state;
    Json(auth::mcp_server_metadata("deepresearch-mcpd", env!("CARGO_PKG_VERSION")))
}

#[utoipa::path(
    get,
    path = "/.well-known/oauth-protected-resource",
    responses((status = 200, description = "RFC 9728 protected-resource metadata"))
)]
async fn handle_discovery_resource(State(state): State<TransportState>) -> Json<Value> {
    let resource_url = format!("http://{}:{}/mcp", state.config.bind_addr, state.config.port);
    Json(auth::protected_resource_metadata(&state.config, &resource_url))
}
