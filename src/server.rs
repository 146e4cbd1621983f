// ABOUTME: HTTP server exposing the visitor-facing session endpoints
// ABOUTME: Thin handlers that validate input and call into the session orchestrator

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use tether_core::config::Config;
use tether_core::desk::{HttpDesk, Visitor};
use tether_core::session::SessionOrchestrator;

#[derive(Clone)]
struct ServerState {
    orchestrator: Arc<SessionOrchestrator<HttpDesk>>,
    config: Arc<Config>,
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub visitor_name: String,
    #[serde(default)]
    pub visitor_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct TypingRequest {
    pub typing: bool,
    /// In-progress text, forwarded as a sneak peek when the room has it enabled
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

fn ok(message: impl Into<String>) -> (StatusCode, Json<ApiResponse>) {
    (
        StatusCode::OK,
        Json(ApiResponse {
            success: true,
            message: message.into(),
        }),
    )
}

fn fail(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ApiResponse>) {
    (
        status,
        Json(ApiResponse {
            success: false,
            message: message.into(),
        }),
    )
}

/// Validate the API key header when one is configured.
fn authorize(
    state: &ServerState,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<ApiResponse>)> {
    let Some(expected) = &state.config.server.api_key else {
        return Ok(());
    };
    match headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        Some(provided) if provided == expected => Ok(()),
        _ => {
            tracing::warn!("Request with invalid or missing API key");
            Err(fail(StatusCode::UNAUTHORIZED, "Invalid or missing API key"))
        }
    }
}

/// Start the HTTP server. Blocks until the listener fails.
pub async fn start_server(
    config: Arc<Config>,
    orchestrator: Arc<SessionOrchestrator<HttpDesk>>,
    metrics_handle: PrometheusHandle,
) -> Result<()> {
    let state = ServerState {
        orchestrator,
        config: Arc::clone(&config),
    };

    let session_routes = Router::new()
        .route("/session/{room_id}/start", post(start_handler))
        .route("/session/{room_id}/message", post(message_handler))
        .route("/session/{room_id}/typing", post(typing_handler))
        .route("/session/{room_id}/close", post(close_handler))
        .route("/session/{room_id}/timeout", post(timeout_handler))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(metrics_handle));

    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(session_routes)
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %addr, "Starting session server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn start_handler(
    State(state): State<ServerState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<StartRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    if payload.visitor_name.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "visitor_name must not be empty");
    }

    match state.orchestrator.session_active(&room_id) {
        Ok(true) => {
            return fail(
                StatusCode::CONFLICT,
                "A session is already active for this room",
            );
        }
        Ok(false) => {}
        Err(e) => {
            tracing::error!(room_id = %room_id, error = %e, "Failed to check session state");
            return fail(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }
    }

    let visitor = Visitor {
        name: payload.visitor_name,
        email: payload.visitor_email,
    };
    tracing::info!(room_id = %room_id, visitor = %visitor.name, "Session start requested");
    state.orchestrator.spawn_session(&room_id, visitor);

    ok("Session start accepted")
}

async fn message_handler(
    State(state): State<ServerState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<MessageRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }
    if payload.text.trim().is_empty() {
        return fail(StatusCode::BAD_REQUEST, "text must not be empty");
    }

    match state
        .orchestrator
        .visitor_message(&room_id, &payload.text)
        .await
    {
        Ok(true) => ok("Message forwarded"),
        Ok(false) => fail(StatusCode::NOT_FOUND, "No active session for this room"),
        Err(e) => {
            tracing::error!(room_id = %room_id, error = %e, "Failed to handle visitor message");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

async fn typing_handler(
    State(state): State<ServerState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<TypingRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }

    match state
        .orchestrator
        .visitor_typing(&room_id, payload.typing, payload.text.as_deref())
        .await
    {
        Ok(true) => ok("Typing state forwarded"),
        Ok(false) => fail(StatusCode::NOT_FOUND, "No active session for this room"),
        Err(e) => {
            tracing::warn!(room_id = %room_id, error = %e, "Failed to forward typing state");
            fail(StatusCode::BAD_GATEWAY, "Desk rejected typing update")
        }
    }
}

async fn close_handler(
    State(state): State<ServerState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse>) {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }

    match state.orchestrator.visitor_closed(&room_id).await {
        Ok(()) => ok("Session closed"),
        Err(e) => {
            tracing::error!(room_id = %room_id, error = %e, "Failed to close session");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

/// Callback target for host-scheduled idle timeout jobs.
async fn timeout_handler(
    State(state): State<ServerState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse>) {
    if let Err(resp) = authorize(&state, &headers) {
        return resp;
    }

    match state.orchestrator.fire_idle_timeout(&room_id).await {
        Ok(()) => ok("Timeout processed"),
        Err(e) => {
            tracing::error!(room_id = %room_id, error = %e, "Failed to process idle timeout");
            fail(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

/// Render Prometheus text format.
async fn metrics_handler(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
