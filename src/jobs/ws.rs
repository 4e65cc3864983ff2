//! REST + WebSocket surface for the job system.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use futures::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::orchestrator::{JobConfig, Orchestrator};
use super::state::Job;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the Axum router with job REST and WebSocket routes.
pub fn job_routes(orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", post(submit_job).get(list_jobs))
        .route("/api/jobs/{id}", get(job_status))
        .route("/api/jobs/{id}/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "consult-report"
    }))
}

// ── REST ────────────────────────────────────────────────────────────────

async fn submit_job(
    State(state): State<AppState>,
    Json(config): Json<JobConfig>,
) -> impl IntoResponse {
    let job_id = state.orchestrator.submit(config);
    info!(job_id = %job_id, "Job submitted via API");
    (
        StatusCode::CREATED,
        Json(serde_json::json!({"job_id": job_id})),
    )
}

async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.list())
}

async fn job_status(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let job_id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "Invalid job ID"})),
            );
        }
    };

    match state.orchestrator.status(job_id) {
        Ok(job) => (StatusCode::OK, Json(serde_json::json!(job))),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Job not found"})),
        ),
    }
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let job_id = match Uuid::parse_str(&id) {
        Ok(id) => id,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    if state.orchestrator.status(job_id).is_err() {
        return StatusCode::NOT_FOUND.into_response();
    }

    info!(job_id = %job_id, "WebSocket listener connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, state, job_id))
        .into_response()
}

async fn handle_socket(mut socket: WebSocket, state: AppState, job_id: Uuid) {
    // Snapshot first — a late listener gets no replay, so the running
    // totals come from the snapshot, not the stream.
    let Ok(job) = state.orchestrator.status(job_id) else {
        return;
    };
    if send_sync(&mut socket, &job).await.is_err() {
        warn!(job_id = %job_id, "Failed to send initial sync, client disconnected");
        return;
    }

    let Ok(rx) = state.orchestrator.subscribe(job_id) else {
        return;
    };
    let mut events = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            // Forward job events to this listener
            result = events.next() => {
                match result {
                    Some(Ok(event)) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!(job_id = %job_id, "Listener disconnected during send");
                                return;
                            }
                        }
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                        warn!(job_id = %job_id, missed = n, "WS listener lagged behind broadcast");
                        // Re-sync with a fresh snapshot carrying the counters
                        if let Ok(job) = state.orchestrator.status(job_id) {
                            if send_sync(&mut socket, &job).await.is_err() {
                                return;
                            }
                        }
                    }
                    None => break,
                }
            }

            // Listener-side frames
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(job_id = %job_id, "WebSocket listener disconnected");
                        return;
                    }
                    Some(Err(e)) => {
                        warn!(job_id = %job_id, error = %e, "WebSocket error");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }

    // Stream closed — the job is terminal. Send the final snapshot, then close.
    if let Ok(job) = state.orchestrator.status(job_id) {
        let _ = send_sync(&mut socket, &job).await;
    }
    let _ = socket.send(Message::Close(None)).await;
    info!(job_id = %job_id, "WebSocket stream closed");
}

async fn send_sync(socket: &mut WebSocket, job: &Job) -> Result<(), axum::Error> {
    let frame = serde_json::json!({"type": "job_sync", "job": job});
    socket.send(Message::Text(frame.to_string().into())).await
}
