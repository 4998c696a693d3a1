//! API Routes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::event_log::{EventRecord, EventType};
use crate::models::ApiResponse;
use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Streams
        .route("/api/streams", get(list_streams))
        .route("/api/streams", post(add_stream))
        .route("/api/streams/:id", delete(remove_stream))
        // Recording
        .route("/api/recording/start", post(start_recording))
        .route("/api/recording/stop", post(stop_recording))
        // Detection
        .route("/api/detection", put(set_detection))
        .route("/api/detection/threshold", put(set_threshold))
        .route("/api/detection/auto-record", put(set_auto_record))
        // Events
        .route("/api/events", get(list_events))
        .route("/api/events/force-save", post(force_save_events))
        .route("/api/events", delete(clear_events))
        // Recorded files
        .route("/api/recordings", get(list_recordings))
        .route("/api/recordings/:name", delete(delete_recording))
        // WebSocket
        .route("/api/ws", get(websocket_handler))
        .with_state(state)
}

// ========================================
// Stream Handlers
// ========================================

async fn list_streams(State(state): State<AppState>) -> impl IntoResponse {
    let streams = state.orchestrator.streams().await;
    Json(ApiResponse::success(streams))
}

#[derive(Debug, Deserialize)]
struct AddStreamRequest {
    uri: String,
}

async fn add_stream(
    State(state): State<AppState>,
    Json(req): Json<AddStreamRequest>,
) -> Result<impl IntoResponse> {
    let view = state.orchestrator.add_stream(&req.uri).await?;
    Ok(Json(ApiResponse::success(view)))
}

async fn remove_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.orchestrator.remove_stream(id).await?;
    Ok(Json(ApiResponse::success(json!({ "removed": id }))))
}

// ========================================
// Recording Handlers
// ========================================

async fn start_recording(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let summary = state.orchestrator.start_recording().await?;
    Ok(Json(ApiResponse::success(summary)))
}

async fn stop_recording(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let summary = state.orchestrator.stop_recording().await?;
    Ok(Json(ApiResponse::success(summary)))
}

// ========================================
// Detection Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct EnabledRequest {
    enabled: bool,
}

async fn set_detection(
    State(state): State<AppState>,
    Json(req): Json<EnabledRequest>,
) -> impl IntoResponse {
    state
        .orchestrator
        .set_global_motion_detection(req.enabled)
        .await;
    Json(ApiResponse::success(json!({ "enabled": req.enabled })))
}

#[derive(Debug, Deserialize)]
struct ThresholdRequest {
    threshold: f64,
}

async fn set_threshold(
    State(state): State<AppState>,
    Json(req): Json<ThresholdRequest>,
) -> Result<impl IntoResponse> {
    let applied = state
        .orchestrator
        .set_motion_threshold(req.threshold)
        .await?;
    Ok(Json(ApiResponse::success(json!({ "threshold": applied }))))
}

async fn set_auto_record(
    State(state): State<AppState>,
    Json(req): Json<EnabledRequest>,
) -> impl IntoResponse {
    state.orchestrator.set_auto_record(req.enabled);
    Json(ApiResponse::success(json!({ "enabled": req.enabled })))
}

// ========================================
// Event Log Handlers
// ========================================

#[derive(Debug, Deserialize)]
struct EventQuery {
    /// Integer event type code
    #[serde(rename = "type")]
    event_type: Option<u8>,
    /// RFC3339, inclusive lower bound
    start: Option<String>,
    /// RFC3339, inclusive upper bound
    end: Option<String>,
}

fn parse_bound(value: &str, name: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Config(format!("invalid {} timestamp {:?}: {}", name, value, e)))
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventQuery>,
) -> Result<impl IntoResponse> {
    let mut events: Vec<EventRecord> = match (&query.start, &query.end) {
        (Some(start), Some(end)) => {
            let start = parse_bound(start, "start")?;
            let end = parse_bound(end, "end")?;
            state.event_log.by_time_range(start, end).await
        }
        (None, None) => state.event_log.all().await,
        _ => {
            return Err(Error::Config(
                "start and end must be given together".to_string(),
            ))
        }
    };

    if let Some(code) = query.event_type {
        let event_type = EventType::try_from(code).map_err(Error::Config)?;
        events.retain(|r| r.event_type == event_type);
    }

    Ok(Json(ApiResponse::success(events)))
}

async fn force_save_events(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let written = state.event_log.force_save().await?;
    Ok(Json(ApiResponse::success(json!({ "written": written }))))
}

async fn clear_events(State(state): State<AppState>) -> Result<impl IntoResponse> {
    state.event_log.clear().await?;
    Ok(Json(ApiResponse::success(json!({ "cleared": true }))))
}

// ========================================
// Recorded File Handlers
// ========================================

async fn list_recordings(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let files = state.supervisor.list_recordings().await?;
    Ok(Json(ApiResponse::success(files)))
}

async fn delete_recording(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse> {
    state.supervisor.delete_recording(&name).await?;
    Ok(Json(ApiResponse::success(json!({ "deleted": name }))))
}

// ========================================
// WebSocket Handler
// ========================================

/// WebSocket upgrade handler
async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut rx) = state.hub.register().await;

    tracing::info!(connection_id = %conn_id, "WebSocket client connected");

    // Forward hub notifications to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    // Drain incoming messages; the channel is notify-only.
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    tracing::info!(connection_id = %conn_id, "WebSocket client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
        conn_id
    });

    let conn_id = tokio::select! {
        _ = send_task => conn_id,
        result = recv_task => result.unwrap_or(conn_id),
    };

    state.hub.unregister(&conn_id).await;
}
