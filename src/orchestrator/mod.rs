//! StreamOrchestrator - stream arena and recording decisions
//!
//! ## Responsibilities
//!
//! - Own the arena of stream units (add / remove / list)
//! - Per-unit sampling tasks feeding frames into the motion detectors
//! - Wire motion events to the event log, the hub, and auto-record
//! - Global recording toggle with per-unit aggregation
//! - Global detection flag, threshold fan-out, auto-record flag
//!
//! Operator commands and sampling tasks take the arena lock briefly and
//! never hold it across an encoder start/stop wait.

use chrono::Utc;
use image::GrayImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::capture::FrameCapture;
use crate::error::{Error, Result};
use crate::event_log::{EventLogStore, EventRecord, EventType};
use crate::hub::{HubMessage, NotificationHub, RecordingStateMessage};
use crate::motion::{MotionDetector, DEFAULT_THRESHOLD};
use crate::recorder::{RecordingSession, RecordingSupervisor, Termination, Verification};

pub mod types;

pub use types::{
    SavedFile, StartSummary, StopSummary, StreamState, StreamUnit, StreamView, UnitFailure,
};

/// StreamOrchestrator instance
pub struct StreamOrchestrator {
    self_ref: Weak<Self>,
    units: RwLock<HashMap<Uuid, StreamUnit>>,
    event_log: Arc<EventLogStore>,
    supervisor: Arc<RecordingSupervisor>,
    capture: Arc<FrameCapture>,
    hub: Arc<NotificationHub>,
    /// Serializes recording toggles, removal, and shutdown
    record_gate: Mutex<()>,
    recording_active: AtomicBool,
    auto_record: AtomicBool,
    detection_enabled: AtomicBool,
    threshold: RwLock<f64>,
    sample_period: Duration,
}

impl StreamOrchestrator {
    pub fn new(
        event_log: Arc<EventLogStore>,
        supervisor: Arc<RecordingSupervisor>,
        capture: Arc<FrameCapture>,
        hub: Arc<NotificationHub>,
        sample_period: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            units: RwLock::new(HashMap::new()),
            event_log,
            supervisor,
            capture,
            hub,
            record_gate: Mutex::new(()),
            recording_active: AtomicBool::new(false),
            auto_record: AtomicBool::new(false),
            detection_enabled: AtomicBool::new(true),
            threshold: RwLock::new(DEFAULT_THRESHOLD),
            sample_period,
        })
    }

    /// Register a stream and start its sampling task.
    pub async fn add_stream(&self, uri: &str) -> Result<StreamView> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(Error::Config("stream uri must not be empty".to_string()));
        }

        let id = Uuid::new_v4();
        let detection = self.detection_enabled.load(Ordering::Relaxed);
        let mut detector = MotionDetector::new(*self.threshold.read().await);
        detector.set_enabled(detection);

        let cancel = Arc::new(AtomicBool::new(false));
        let unit = StreamUnit {
            id,
            uri: uri.to_string(),
            state: if detection {
                StreamState::Monitoring
            } else {
                StreamState::Idle
            },
            detector,
            session: None,
            added_at: Utc::now(),
            cancel: cancel.clone(),
        };
        let view = StreamView::from(&unit);

        self.units.write().await.insert(id, unit);
        self.spawn_sampling_task(id, cancel);

        tracing::info!(stream_id = %id, uri = %uri, "Stream added");
        let record = EventRecord::new(EventType::StreamConnected, uri, "Stream connected", 0.0, "");
        self.log_and_broadcast(record).await;

        Ok(view)
    }

    /// Remove a stream: erase it from the arena, cancel its sampling task,
    /// stop any active recording best-effort, log StreamDisconnected.
    pub async fn remove_stream(&self, id: Uuid) -> Result<()> {
        let _gate = self.record_gate.lock().await;

        let mut unit = {
            let mut units = self.units.write().await;
            units
                .remove(&id)
                .ok_or_else(|| Error::NotFound(format!("stream {}", id)))?
        };

        unit.cancel.store(true, Ordering::Relaxed);
        unit.detector.set_enabled(false);

        if let Some(session) = unit.session.take() {
            let outcome = self.supervisor.stop(session).await;
            tracing::info!(
                stream_id = %id,
                termination = ?outcome.termination,
                "Recording stopped for removed stream"
            );
        }
        self.refresh_recording_active().await;

        tracing::info!(stream_id = %id, uri = %unit.uri, "Stream removed");
        let record = EventRecord::new(
            EventType::StreamDisconnected,
            unit.uri.clone(),
            "Stream disconnected",
            0.0,
            "",
        );
        self.log_and_broadcast(record).await;

        Ok(())
    }

    /// Start recording on every unit in the Monitoring state.
    ///
    /// The operation succeeds if at least one unit starts; per-unit failures
    /// are collected in the summary. With zero registered units it is
    /// rejected outright and nothing is spawned or logged.
    pub async fn start_recording(&self) -> Result<StartSummary> {
        let _gate = self.record_gate.lock().await;

        if self.recording_active.load(Ordering::Relaxed) {
            tracing::debug!("Recording already active, toggle ignored");
            return Ok(StartSummary {
                started: 0,
                total: 0,
                already_active: true,
                failures: Vec::new(),
            });
        }

        let targets: Vec<(Uuid, String)> = {
            let units = self.units.read().await;
            if units.is_empty() {
                return Err(Error::NoSourcesConfigured);
            }
            units
                .values()
                .filter(|u| u.state == StreamState::Monitoring)
                .map(|u| (u.id, u.uri.clone()))
                .collect()
        };

        let total = targets.len() as u32;
        let mut started = 0u32;
        let mut failures = Vec::new();

        for (id, uri) in targets {
            match self.supervisor.start(&uri, started).await {
                Ok(session) => {
                    let mut units = self.units.write().await;
                    if let Some(unit) = units.get_mut(&id) {
                        unit.session = Some(session);
                        unit.state = StreamState::Recording;
                        started += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(stream_id = %id, uri = %uri, error = %e, "Recording start failed");
                    failures.push(UnitFailure {
                        id,
                        uri,
                        error: e.to_string(),
                    });
                }
            }
        }

        if started > 0 {
            self.recording_active.store(true, Ordering::Relaxed);
            let description = format!("Recording started on {} of {} streams", started, total);
            tracing::info!(started = started, total = total, "Recording started");
            let record = EventRecord::new(EventType::RecordingStarted, "all", description, 0.0, "");
            self.log_and_broadcast(record).await;
            self.broadcast_recording_state(true, started).await;
        } else {
            tracing::warn!(failed = failures.len(), "No recordings started");
        }

        Ok(StartSummary {
            started,
            total,
            already_active: false,
            failures,
        })
    }

    /// Stop every active recording and verify the outputs.
    ///
    /// A unit counts as failed when its encoder had to be killed, had
    /// crashed, or finished without a usable output file.
    pub async fn stop_recording(&self) -> Result<StopSummary> {
        let _gate = self.record_gate.lock().await;

        let sessions: Vec<(Uuid, String, RecordingSession)> = {
            let mut units = self.units.write().await;
            units
                .values_mut()
                .filter_map(|u| {
                    u.session.take().map(|s| {
                        u.state = if u.detector.is_enabled() {
                            StreamState::Monitoring
                        } else {
                            StreamState::Idle
                        };
                        (u.id, u.uri.clone(), s)
                    })
                })
                .collect()
        };

        if sessions.is_empty() {
            tracing::debug!("No active recordings to stop");
            self.recording_active.store(false, Ordering::Relaxed);
            return Ok(StopSummary {
                stopped: 0,
                saved_files: Vec::new(),
                failures: Vec::new(),
            });
        }

        let mut stopped = 0u32;
        let mut saved_files = Vec::new();
        let mut failures = Vec::new();

        for (id, uri, session) in sessions {
            let outcome = self.supervisor.stop(session).await;
            stopped += 1;
            match (outcome.termination, outcome.verification) {
                (Termination::AlreadyExited { clean: false }, _) => {
                    failures.push(UnitFailure {
                        id,
                        uri: uri.clone(),
                        error: Error::CrashedDuringRecording(uri).to_string(),
                    })
                }
                (termination, Verification::Valid(file)) => {
                    if termination == Termination::Forced {
                        tracing::warn!(
                            stream_id = %id,
                            path = %file.path.display(),
                            "Force-killed encoder still left a verified file"
                        );
                    }
                    tracing::info!(
                        stream_id = %id,
                        path = %file.path.display(),
                        size_bytes = file.size_bytes,
                        "Recording saved"
                    );
                    saved_files.push(SavedFile {
                        id,
                        uri,
                        path: file.path.to_string_lossy().into_owned(),
                        size_bytes: file.size_bytes,
                    });
                }
                // Whatever the termination, a file below the minimum size is
                // the failure the caller needs to know about.
                (_, Verification::TooSmall { size_bytes, .. }) => {
                    tracing::warn!(
                        stream_id = %id,
                        size_bytes = size_bytes,
                        "Output below minimum valid size"
                    );
                    failures.push(UnitFailure {
                        id,
                        uri: uri.clone(),
                        error: Error::EmptyOrInvalidOutput(uri).to_string(),
                    });
                }
                (Termination::Forced, Verification::Missing) => failures.push(UnitFailure {
                    id,
                    uri: uri.clone(),
                    error: Error::StopTimeout(uri).to_string(),
                }),
                (_, Verification::Missing) => failures.push(UnitFailure {
                    id,
                    uri: uri.clone(),
                    error: Error::EmptyOrInvalidOutput(uri).to_string(),
                }),
            }
        }

        self.recording_active.store(false, Ordering::Relaxed);

        let description = format!("Recording stopped, {} file(s) saved", saved_files.len());
        tracing::info!(stopped = stopped, saved = saved_files.len(), "Recording stopped");
        let record = EventRecord::new(EventType::RecordingStopped, "all", description, 0.0, "");
        self.log_and_broadcast(record).await;
        self.broadcast_recording_state(false, 0).await;

        if saved_files.is_empty() {
            tracing::warn!("Recording stopped but no valid files were produced");
        }

        Ok(StopSummary {
            stopped,
            saved_files,
            failures,
        })
    }

    /// Toggle motion detection for all units. Recording units keep recording;
    /// their state label follows the detector once the recording ends.
    pub async fn set_global_motion_detection(&self, enabled: bool) {
        self.detection_enabled.store(enabled, Ordering::Relaxed);

        {
            let mut units = self.units.write().await;
            for unit in units.values_mut() {
                unit.detector.set_enabled(enabled);
                if unit.state != StreamState::Recording {
                    unit.state = if enabled {
                        StreamState::Monitoring
                    } else {
                        StreamState::Idle
                    };
                }
            }
        }

        tracing::info!(enabled = enabled, "Global motion detection toggled");
        let (event_type, description) = if enabled {
            (EventType::MotionDetectionEnabled, "Motion detection enabled")
        } else {
            (
                EventType::MotionDetectionDisabled,
                "Motion detection disabled",
            )
        };
        let record = EventRecord::new(event_type, "all", description, 0.0, "");
        self.log_and_broadcast(record).await;
    }

    /// Set the motion threshold for all units, clamped to [0.0, 1.0].
    /// Returns the applied value. Non-finite input is rejected.
    pub async fn set_motion_threshold(&self, value: f64) -> Result<f64> {
        if !value.is_finite() {
            return Err(Error::Config(format!(
                "threshold must be finite, got {}",
                value
            )));
        }
        let clamped = value.clamp(0.0, 1.0);
        if clamped != value {
            tracing::warn!(requested = value, clamped = clamped, "Threshold clamped");
        }

        *self.threshold.write().await = clamped;
        let mut units = self.units.write().await;
        for unit in units.values_mut() {
            unit.detector.set_threshold(clamped);
        }

        tracing::info!(threshold = clamped, "Motion threshold updated");
        Ok(clamped)
    }

    pub fn set_auto_record(&self, enabled: bool) {
        self.auto_record.store(enabled, Ordering::Relaxed);
        tracing::info!(enabled = enabled, "Auto-record on motion toggled");
    }

    pub fn auto_record(&self) -> bool {
        self.auto_record.load(Ordering::Relaxed)
    }

    pub fn detection_enabled(&self) -> bool {
        self.detection_enabled.load(Ordering::Relaxed)
    }

    pub fn recording_active(&self) -> bool {
        self.recording_active.load(Ordering::Relaxed)
    }

    pub async fn threshold(&self) -> f64 {
        *self.threshold.read().await
    }

    pub async fn stream_count(&self) -> usize {
        self.units.read().await.len()
    }

    /// All units, oldest first
    pub async fn streams(&self) -> Vec<StreamView> {
        let units = self.units.read().await;
        let mut views: Vec<StreamView> = units.values().map(StreamView::from).collect();
        views.sort_by_key(|v| v.added_at);
        views
    }

    /// Feed one frame to a unit's detector. Returns true when that frame
    /// triggered motion. Sampling tasks call this once per tick; tests feed
    /// synthetic frames directly.
    pub async fn handle_frame(&self, id: Uuid, frame: &GrayImage) -> bool {
        let mut units = self.units.write().await;
        match units.get_mut(&id) {
            Some(unit) => unit.detector.process_frame(frame),
            None => false,
        }
    }

    /// Stop everything for process shutdown. Cancels sampling tasks and
    /// closes recordings; appends no records.
    pub async fn shutdown(&self) {
        tracing::info!("Orchestrator shutting down");
        let _gate = self.record_gate.lock().await;

        {
            let units = self.units.read().await;
            for unit in units.values() {
                unit.cancel.store(true, Ordering::Relaxed);
            }
        }

        let sessions: Vec<(Uuid, RecordingSession)> = {
            let mut units = self.units.write().await;
            units
                .values_mut()
                .filter_map(|u| {
                    u.session.take().map(|s| {
                        u.state = if u.detector.is_enabled() {
                            StreamState::Monitoring
                        } else {
                            StreamState::Idle
                        };
                        (u.id, s)
                    })
                })
                .collect()
        };

        for (id, session) in sessions {
            let outcome = self.supervisor.stop(session).await;
            tracing::info!(
                stream_id = %id,
                termination = ?outcome.termination,
                "Recording stopped at shutdown"
            );
        }
        self.recording_active.store(false, Ordering::Relaxed);
    }

    /// Motion fired for `id`: snapshot, log, broadcast, maybe auto-record.
    async fn on_motion(&self, id: Uuid) {
        let (uri, level) = {
            let units = self.units.read().await;
            match units.get(&id) {
                Some(unit) => (unit.uri.clone(), unit.detector.last_level()),
                None => return,
            }
        };

        tracing::info!(stream_id = %id, uri = %uri, level = level, "Motion detected");

        // Snapshot failure degrades to an empty path; the event is logged
        // either way.
        let snapshot_path = match self.capture.save_snapshot(&uri, id).await {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(e) => {
                tracing::warn!(stream_id = %id, error = %e, "Snapshot capture failed");
                String::new()
            }
        };

        let record = EventRecord::new(
            EventType::MotionDetected,
            uri,
            format!("Motion detected (level {:.4})", level),
            level,
            snapshot_path,
        );
        self.log_and_broadcast(record).await;

        if self.auto_record.load(Ordering::Relaxed) && !self.recording_active.load(Ordering::Relaxed)
        {
            tracing::info!(stream_id = %id, "Auto-record engaged");
            if let Err(e) = self.start_recording().await {
                tracing::warn!(error = %e, "Auto-record start failed");
            }
        }
    }

    async fn log_and_broadcast(&self, record: EventRecord) {
        self.event_log.append(record.clone()).await;
        self.hub.broadcast_event(&record).await;
    }

    async fn broadcast_recording_state(&self, active: bool, recording_streams: u32) {
        self.hub
            .broadcast(HubMessage::RecordingState(RecordingStateMessage {
                active,
                recording_streams,
                timestamp: Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            }))
            .await;
    }

    async fn refresh_recording_active(&self) {
        let any = self
            .units
            .read()
            .await
            .values()
            .any(|u| u.state == StreamState::Recording);
        self.recording_active.store(any, Ordering::Relaxed);
    }

    /// One sampling tick: grab a frame for the unit and run detection.
    /// Grab failures skip the tick.
    async fn sample_once(&self, id: Uuid) {
        let uri = {
            let units = self.units.read().await;
            match units.get(&id) {
                Some(unit) if unit.detector.is_enabled() => unit.uri.clone(),
                _ => return,
            }
        };

        let frame = match self.capture.grab_frame(&uri).await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(stream_id = %id, error = %e, "Frame grab failed");
                return;
            }
        };

        if self.handle_frame(id, &frame).await {
            self.on_motion(id).await;
        }
    }

    fn spawn_sampling_task(&self, id: Uuid, cancel: Arc<AtomicBool>) {
        let weak = self.self_ref.clone();
        let period = self.sample_period;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let orch = match weak.upgrade() {
                    Some(orch) => orch,
                    None => break,
                };
                orch.sample_once(id).await;
            }
            tracing::debug!(stream_id = %id, "Sampling task exited");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::Timing;
    use image::Luma;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    const WELL_BEHAVED: &str = "#!/bin/sh\n\
        for a in \"$@\"; do out=\"$a\"; done\n\
        cat > /dev/null\n\
        head -c 2048 /dev/zero > \"$out\"\n";

    const NO_OUTPUT: &str = "#!/bin/sh\ncat > /dev/null\n";

    // Writes a sub-minimum partial file, then ignores stdin.
    const STUBBORN_PARTIAL: &str = "#!/bin/sh\n\
        for a in \"$@\"; do out=\"$a\"; done\n\
        head -c 500 /dev/zero > \"$out\"\n\
        exec sleep 30\n";

    const INSTANT_FAIL: &str = "#!/bin/sh\nexit 3\n";

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("encoder.sh");
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn fast_timing() -> Timing {
        Timing {
            start_timeout: Duration::from_secs(5),
            spawn_settle: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(2),
            fs_settle: Duration::from_millis(50),
            kill_grace: Duration::from_millis(200),
        }
    }

    struct Rig {
        orch: Arc<StreamOrchestrator>,
        event_log: Arc<EventLogStore>,
        hub: Arc<NotificationHub>,
        _dir: tempfile::TempDir,
    }

    async fn rig(encoder_body: &str) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let encoder = write_script(dir.path(), encoder_body);

        let event_log = Arc::new(
            EventLogStore::open(dir.path().join("logs/event_log.json"))
                .await
                .unwrap(),
        );
        let supervisor = Arc::new(
            RecordingSupervisor::new(encoder.to_string_lossy(), dir.path().join("recordings"))
                .await
                .unwrap()
                .with_timing(fast_timing()),
        );
        let capture = Arc::new(
            FrameCapture::new(
                encoder.to_string_lossy(),
                dir.path().join("recordings"),
                Duration::from_secs(2),
            )
            .await
            .unwrap(),
        );
        let hub = Arc::new(NotificationHub::new());

        // Long sampling period keeps the background tasks quiet; tests feed
        // frames through handle_frame directly.
        let orch = StreamOrchestrator::new(
            event_log.clone(),
            supervisor,
            capture,
            hub.clone(),
            Duration::from_secs(60),
        );

        Rig {
            orch,
            event_log,
            hub,
            _dir: dir,
        }
    }

    fn dark_frame() -> GrayImage {
        GrayImage::from_fn(100, 100, |_, _| Luma([10]))
    }

    fn bright_block_frame() -> GrayImage {
        GrayImage::from_fn(100, 100, |x, y| {
            if x < 40 && y < 40 {
                Luma([210])
            } else {
                Luma([10])
            }
        })
    }

    /// Feed frames until motion triggers, mirroring one sampling task.
    async fn drive_motion(rig: &Rig, id: Uuid) {
        assert!(!rig.orch.handle_frame(id, &dark_frame()).await);
        let moved = bright_block_frame();
        assert!(!rig.orch.handle_frame(id, &moved).await);
        assert!(!rig.orch.handle_frame(id, &moved).await);
        assert!(rig.orch.handle_frame(id, &moved).await);
        rig.orch.on_motion(id).await;
    }

    #[tokio::test]
    async fn test_add_stream_logs_and_broadcasts() {
        let rig = rig(WELL_BEHAVED).await;
        let (_cid, mut rx) = rig.hub.register().await;

        let view = rig.orch.add_stream("rtsp://cam/stream").await.unwrap();
        assert_eq!(view.state, StreamState::Monitoring);
        assert!(view.detection_enabled);
        assert_eq!(rig.orch.stream_count().await, 1);

        let records = rig.event_log.by_type(EventType::StreamConnected).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "rtsp://cam/stream");

        let json = rx.recv().await.unwrap();
        assert!(json.contains("\"event_type\":5"), "{}", json);
    }

    #[tokio::test]
    async fn test_add_stream_rejects_empty_uri() {
        let rig = rig(WELL_BEHAVED).await;
        assert!(matches!(
            rig.orch.add_stream("   ").await,
            Err(Error::Config(_))
        ));
        assert_eq!(rig.event_log.count().await, 0);
    }

    #[tokio::test]
    async fn test_start_recording_with_no_streams_is_rejected() {
        let rig = rig(WELL_BEHAVED).await;
        let err = rig.orch.start_recording().await.unwrap_err();
        assert!(matches!(err, Error::NoSourcesConfigured));
        assert!(!rig.orch.recording_active());
        // Nothing was logged for the rejected toggle.
        assert!(rig
            .event_log
            .by_type(EventType::RecordingStarted)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_recording_round_trip() {
        let rig = rig(WELL_BEHAVED).await;
        rig.orch.add_stream("rtsp://cam/one").await.unwrap();
        rig.orch.add_stream("http://cam/two").await.unwrap();

        let summary = rig.orch.start_recording().await.unwrap();
        assert_eq!(summary.started, 2);
        assert_eq!(summary.total, 2);
        assert!(!summary.already_active);
        assert!(summary.failures.is_empty());
        assert!(rig.orch.recording_active());
        assert!(rig
            .orch
            .streams()
            .await
            .iter()
            .all(|v| v.state == StreamState::Recording));

        let started = rig.event_log.by_type(EventType::RecordingStarted).await;
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].source, "all");
        assert_eq!(started[0].description, "Recording started on 2 of 2 streams");

        let summary = rig.orch.stop_recording().await.unwrap();
        assert_eq!(summary.stopped, 2);
        assert_eq!(summary.saved_files.len(), 2);
        assert!(summary.failures.is_empty());
        assert!(summary.saved_files.iter().all(|f| f.size_bytes == 2048));
        assert!(!rig.orch.recording_active());
        assert!(rig
            .orch
            .streams()
            .await
            .iter()
            .all(|v| v.state == StreamState::Monitoring));

        let stopped = rig.event_log.by_type(EventType::RecordingStopped).await;
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].description, "Recording stopped, 2 file(s) saved");
    }

    #[tokio::test]
    async fn test_start_recording_twice_is_idempotent() {
        let rig = rig(WELL_BEHAVED).await;
        rig.orch.add_stream("rtsp://cam/one").await.unwrap();

        rig.orch.start_recording().await.unwrap();
        let second = rig.orch.start_recording().await.unwrap();
        assert!(second.already_active);
        assert_eq!(second.started, 0);

        let started = rig.event_log.by_type(EventType::RecordingStarted).await;
        assert_eq!(started.len(), 1);

        rig.orch.stop_recording().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_recording_collects_unit_failures() {
        let rig = rig(INSTANT_FAIL).await;
        rig.orch.add_stream("rtsp://cam/one").await.unwrap();

        let summary = rig.orch.start_recording().await.unwrap();
        assert_eq!(summary.started, 0);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.failures.len(), 1);
        assert!(
            summary.failures[0].error.contains("failed to start"),
            "{}",
            summary.failures[0].error
        );
        assert!(!rig.orch.recording_active());
        // No actual transition happened, so no record was appended.
        assert!(rig
            .event_log
            .by_type(EventType::RecordingStarted)
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_stop_recording_reports_invalid_outputs() {
        let rig = rig(NO_OUTPUT).await;
        rig.orch.add_stream("rtsp://cam/one").await.unwrap();

        let summary = rig.orch.start_recording().await.unwrap();
        assert_eq!(summary.started, 1);

        let summary = rig.orch.stop_recording().await.unwrap();
        assert_eq!(summary.stopped, 1);
        assert!(summary.saved_files.is_empty());
        assert_eq!(summary.failures.len(), 1);
        assert!(
            summary.failures[0].error.contains("empty or invalid"),
            "{}",
            summary.failures[0].error
        );

        // The stop itself still happened and is logged.
        let stopped = rig.event_log.by_type(EventType::RecordingStopped).await;
        assert_eq!(stopped.len(), 1);
        assert_eq!(stopped[0].description, "Recording stopped, 0 file(s) saved");
    }

    #[tokio::test]
    async fn test_forced_stop_with_partial_file_reports_invalid_output() {
        let rig = rig(STUBBORN_PARTIAL).await;
        rig.orch.add_stream("rtsp://cam/one").await.unwrap();

        let summary = rig.orch.start_recording().await.unwrap();
        assert_eq!(summary.started, 1);

        // The encoder ignores the quit command and leaves a 500-byte file:
        // the forced kill succeeds, but the unusable file is what the
        // caller is told about, and it never enters the saved count.
        let summary = rig.orch.stop_recording().await.unwrap();
        assert_eq!(summary.stopped, 1);
        assert!(summary.saved_files.is_empty());
        assert_eq!(summary.failures.len(), 1);
        assert!(
            summary.failures[0].error.contains("empty or invalid"),
            "{}",
            summary.failures[0].error
        );
    }

    #[tokio::test]
    async fn test_motion_logs_event_with_snapshot() {
        let rig = rig(WELL_BEHAVED).await;
        let view = rig.orch.add_stream("rtsp://cam/one").await.unwrap();

        drive_motion(&rig, view.id).await;

        let motion = rig.event_log.by_type(EventType::MotionDetected).await;
        assert_eq!(motion.len(), 1);
        assert_eq!(motion[0].source, "rtsp://cam/one");
        assert!(motion[0].motion_level > DEFAULT_THRESHOLD);
        // The fake encoder produced snapshot bytes, so a path was recorded.
        assert!(motion[0].snapshot_path.contains("snapshot_"));
        assert!(!rig.orch.recording_active());
    }

    #[tokio::test]
    async fn test_motion_triggers_auto_record() {
        let rig = rig(WELL_BEHAVED).await;
        rig.orch.set_auto_record(true);
        let view = rig.orch.add_stream("rtsp://cam/one").await.unwrap();

        drive_motion(&rig, view.id).await;

        assert!(rig.orch.recording_active());
        let started = rig.event_log.by_type(EventType::RecordingStarted).await;
        assert_eq!(started.len(), 1);

        // A second motion burst must not start anything new.
        // Cooldown absorbs ten frames first.
        let moved = bright_block_frame();
        for _ in 0..10 {
            rig.orch.handle_frame(view.id, &moved).await;
        }
        drive_motion_after_cooldown(&rig, view.id).await;
        let started = rig.event_log.by_type(EventType::RecordingStarted).await;
        assert_eq!(started.len(), 1);

        rig.orch.stop_recording().await.unwrap();
    }

    /// Retrigger after a cooldown: three qualifying frames, then on_motion.
    async fn drive_motion_after_cooldown(rig: &Rig, id: Uuid) {
        let moved = bright_block_frame();
        let mut fired = false;
        for _ in 0..3 {
            fired = rig.orch.handle_frame(id, &moved).await;
        }
        assert!(fired);
        rig.orch.on_motion(id).await;
    }

    #[tokio::test]
    async fn test_global_detection_toggle() {
        let rig = rig(WELL_BEHAVED).await;
        rig.orch.add_stream("rtsp://cam/one").await.unwrap();
        rig.orch.add_stream("rtsp://cam/two").await.unwrap();

        rig.orch.set_global_motion_detection(false).await;
        assert!(!rig.orch.detection_enabled());
        assert!(rig
            .orch
            .streams()
            .await
            .iter()
            .all(|v| v.state == StreamState::Idle && !v.detection_enabled));
        assert_eq!(
            rig.event_log
                .by_type(EventType::MotionDetectionDisabled)
                .await
                .len(),
            1
        );

        rig.orch.set_global_motion_detection(true).await;
        assert!(rig
            .orch
            .streams()
            .await
            .iter()
            .all(|v| v.state == StreamState::Monitoring && v.detection_enabled));
        assert_eq!(
            rig.event_log
                .by_type(EventType::MotionDetectionEnabled)
                .await
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_detection_toggle_leaves_recording_running() {
        let rig = rig(WELL_BEHAVED).await;
        rig.orch.add_stream("rtsp://cam/one").await.unwrap();
        rig.orch.start_recording().await.unwrap();

        rig.orch.set_global_motion_detection(false).await;
        assert!(rig.orch.recording_active());
        let views = rig.orch.streams().await;
        assert_eq!(views[0].state, StreamState::Recording);
        assert!(!views[0].detection_enabled);

        // Once the recording stops, the unit settles into Idle.
        rig.orch.stop_recording().await.unwrap();
        let views = rig.orch.streams().await;
        assert_eq!(views[0].state, StreamState::Idle);
    }

    #[tokio::test]
    async fn test_threshold_validation_and_fan_out() {
        let rig = rig(WELL_BEHAVED).await;
        let view = rig.orch.add_stream("rtsp://cam/one").await.unwrap();

        assert_eq!(rig.orch.set_motion_threshold(2.0).await.unwrap(), 1.0);
        assert_eq!(rig.orch.threshold().await, 1.0);
        {
            let units = rig.orch.units.read().await;
            assert_eq!(units.get(&view.id).unwrap().detector.threshold(), 1.0);
        }

        assert_eq!(rig.orch.set_motion_threshold(-0.5).await.unwrap(), 0.0);
        assert!(matches!(
            rig.orch.set_motion_threshold(f64::NAN).await,
            Err(Error::Config(_))
        ));
        assert!(matches!(
            rig.orch.set_motion_threshold(f64::INFINITY).await,
            Err(Error::Config(_))
        ));

        // New streams pick up the current global threshold.
        assert_eq!(rig.orch.set_motion_threshold(0.3).await.unwrap(), 0.3);
        let second = rig.orch.add_stream("rtsp://cam/two").await.unwrap();
        let units = rig.orch.units.read().await;
        assert_eq!(units.get(&second.id).unwrap().detector.threshold(), 0.3);
    }

    #[tokio::test]
    async fn test_remove_stream() {
        let rig = rig(WELL_BEHAVED).await;
        let one = rig.orch.add_stream("rtsp://cam/one").await.unwrap();
        let two = rig.orch.add_stream("rtsp://cam/two").await.unwrap();
        rig.orch.start_recording().await.unwrap();

        let bogus = Uuid::new_v4();
        assert!(matches!(
            rig.orch.remove_stream(bogus).await,
            Err(Error::NotFound(_))
        ));

        rig.orch.remove_stream(one.id).await.unwrap();
        assert_eq!(rig.orch.stream_count().await, 1);
        // The other unit is still recording.
        assert!(rig.orch.recording_active());

        let disconnected = rig.event_log.by_type(EventType::StreamDisconnected).await;
        assert_eq!(disconnected.len(), 1);
        assert_eq!(disconnected[0].source, "rtsp://cam/one");

        rig.orch.remove_stream(two.id).await.unwrap();
        assert_eq!(rig.orch.stream_count().await, 0);
        assert!(!rig.orch.recording_active());
    }

    #[tokio::test]
    async fn test_shutdown_closes_recordings() {
        let rig = rig(WELL_BEHAVED).await;
        rig.orch.add_stream("rtsp://cam/one").await.unwrap();
        rig.orch.start_recording().await.unwrap();
        let records_before = rig.event_log.count().await;

        rig.orch.shutdown().await;

        assert!(!rig.orch.recording_active());
        let views = rig.orch.streams().await;
        assert_eq!(views[0].state, StreamState::Monitoring);
        // Shutdown appends nothing.
        assert_eq!(rig.event_log.count().await, records_before);
    }

    #[tokio::test]
    async fn test_streams_listed_oldest_first() {
        let rig = rig(WELL_BEHAVED).await;
        rig.orch.add_stream("rtsp://cam/one").await.unwrap();
        rig.orch.add_stream("rtsp://cam/two").await.unwrap();
        rig.orch.add_stream("rtsp://cam/three").await.unwrap();

        let uris: Vec<String> = rig
            .orch
            .streams()
            .await
            .into_iter()
            .map(|v| v.uri)
            .collect();
        assert_eq!(uris, vec!["rtsp://cam/one", "rtsp://cam/two", "rtsp://cam/three"]);
    }

    #[tokio::test]
    async fn test_streams_added_while_detection_off_start_idle() {
        let rig = rig(WELL_BEHAVED).await;
        rig.orch.set_global_motion_detection(false).await;

        let view = rig.orch.add_stream("rtsp://cam/one").await.unwrap();
        assert_eq!(view.state, StreamState::Idle);
        assert!(!view.detection_enabled);

        // Idle units are not eligible recording targets.
        let summary = rig.orch.start_recording().await.unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.started, 0);
        assert!(!rig.orch.recording_active());
    }
}
