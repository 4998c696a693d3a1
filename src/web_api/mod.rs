//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP control surface for the orchestrator and the event log
//! - Request validation
//! - Response formatting
//! - WebSocket upgrade onto the notification hub

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
        stream_count: state.orchestrator.stream_count().await,
        recording_active: state.orchestrator.recording_active(),
        motion_detection_enabled: state.orchestrator.detection_enabled(),
        ffmpeg_available: state.ffmpeg_available,
    };

    Json(response)
}
