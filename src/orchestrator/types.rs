//! Stream arena types and operation summaries

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use uuid::Uuid;

use crate::motion::MotionDetector;
use crate::recorder::RecordingSession;

/// Lifecycle state of one stream unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Registered, detection off, not recording
    Idle,
    /// Sampled for motion
    Monitoring,
    /// An encoder process is writing this stream to disk
    Recording,
}

/// One managed stream. Lives in the orchestrator's arena; removal is a
/// single map erase, teardown happens on the removed value.
pub struct StreamUnit {
    pub id: Uuid,
    pub uri: String,
    pub state: StreamState,
    pub detector: MotionDetector,
    /// Present exactly while `state == Recording`
    pub session: Option<RecordingSession>,
    pub added_at: DateTime<Utc>,
    /// Set to make this unit's sampling task exit at its next tick
    pub cancel: Arc<AtomicBool>,
}

/// API-facing snapshot of one unit
#[derive(Debug, Clone, Serialize)]
pub struct StreamView {
    pub id: Uuid,
    pub uri: String,
    pub state: StreamState,
    pub last_motion_level: f64,
    pub detection_enabled: bool,
    pub added_at: DateTime<Utc>,
}

impl From<&StreamUnit> for StreamView {
    fn from(unit: &StreamUnit) -> Self {
        Self {
            id: unit.id,
            uri: unit.uri.clone(),
            state: unit.state,
            last_motion_level: unit.detector.last_level(),
            detection_enabled: unit.detector.is_enabled(),
            added_at: unit.added_at,
        }
    }
}

/// One unit's failure inside a start-all/stop-all operation
#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub id: Uuid,
    pub uri: String,
    pub error: String,
}

/// A verified output file from a stopped recording
#[derive(Debug, Clone, Serialize)]
pub struct SavedFile {
    pub id: Uuid,
    pub uri: String,
    pub path: String,
    pub size_bytes: u64,
}

/// Aggregate result of starting recording on all monitored units
#[derive(Debug, Clone, Serialize)]
pub struct StartSummary {
    pub started: u32,
    /// Units that were eligible (in the Monitoring state)
    pub total: u32,
    /// True when recording was already running and nothing was done
    pub already_active: bool,
    pub failures: Vec<UnitFailure>,
}

/// Aggregate result of stopping all active recordings
#[derive(Debug, Clone, Serialize)]
pub struct StopSummary {
    pub stopped: u32,
    pub saved_files: Vec<SavedFile>,
    pub failures: Vec<UnitFailure>,
}
