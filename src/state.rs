//! Application state
//!
//! Holds all shared components and state

use crate::capture::FrameCapture;
use crate::event_log::EventLogStore;
use crate::hub::NotificationHub;
use crate::orchestrator::StreamOrchestrator;
use crate::recorder::RecordingSupervisor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Directory for recordings and motion snapshots
    pub recordings_dir: PathBuf,
    /// Directory holding the persisted event log
    pub logs_dir: PathBuf,
    /// Encoder binary name or path
    pub ffmpeg_bin: String,
    /// Per-unit frame sampling period (milliseconds)
    pub sample_period_ms: u64,
    /// Event log flush period (seconds)
    pub log_flush_secs: u64,
    /// Single-frame grab timeout (seconds)
    pub frame_grab_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            recordings_dir: std::env::var("RECORDINGS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./recordings")),
            logs_dir: std::env::var("LOGS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./logs")),
            ffmpeg_bin: std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()),
            sample_period_ms: std::env::var("SAMPLE_PERIOD_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500),
            log_flush_secs: std::env::var("LOG_FLUSH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            frame_grab_timeout_secs: std::env::var("FRAME_GRAB_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// EventLogStore (durable event log)
    pub event_log: Arc<EventLogStore>,
    /// RecordingSupervisor (encoder process lifecycle)
    pub supervisor: Arc<RecordingSupervisor>,
    /// FrameCapture (frame grabs and snapshots)
    pub capture: Arc<FrameCapture>,
    /// StreamOrchestrator (stream arena)
    pub orchestrator: Arc<StreamOrchestrator>,
    /// NotificationHub (WebSocket)
    pub hub: Arc<NotificationHub>,
    /// Whether the encoder binary answered the startup probe
    pub ffmpeg_available: bool,
    /// Service start time, for uptime reporting
    pub started_at: Instant,
}
