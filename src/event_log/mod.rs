//! EventLogStore - durable append-only event log
//!
//! ## Responsibilities
//!
//! - Ordered in-memory event sequence (append never blocks on I/O)
//! - Debounced persistence: dirty flag + periodic flush + shutdown flush
//! - Single JSON array document on disk, loaded once at startup
//! - Event queries (all / by type / by time range)

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Event categories, persisted by their integer code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EventType {
    MotionDetected = 0,
    MotionDetectionEnabled = 1,
    MotionDetectionDisabled = 2,
    RecordingStarted = 3,
    RecordingStopped = 4,
    StreamConnected = 5,
    StreamDisconnected = 6,
}

impl From<EventType> for u8 {
    fn from(value: EventType) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for EventType {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(EventType::MotionDetected),
            1 => Ok(EventType::MotionDetectionEnabled),
            2 => Ok(EventType::MotionDetectionDisabled),
            3 => Ok(EventType::RecordingStarted),
            4 => Ok(EventType::RecordingStopped),
            5 => Ok(EventType::StreamConnected),
            6 => Ok(EventType::StreamDisconnected),
            other => Err(format!("unknown event type code: {}", other)),
        }
    }
}

/// One logged occurrence. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event time, second precision
    #[serde(with = "ts_seconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Source identifier (stream URI, or "all" for global operations)
    #[serde(rename = "streamUrl")]
    pub source: String,
    pub description: String,
    /// Snapshot image path, empty when none was captured
    #[serde(rename = "imageSnapshotPath")]
    pub snapshot_path: String,
    /// Measured motion level, 0 when not applicable
    #[serde(rename = "motionLevel")]
    pub motion_level: f64,
}

impl EventRecord {
    /// Create a record stamped with the current time (second precision)
    pub fn new(
        event_type: EventType,
        source: impl Into<String>,
        description: impl Into<String>,
        motion_level: f64,
        snapshot_path: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            timestamp: now.with_nanosecond(0).unwrap_or(now),
            event_type,
            source: source.into(),
            description: description.into(),
            snapshot_path: snapshot_path.into(),
            motion_level,
        }
    }
}

/// ISO-8601 without sub-second digits or timezone suffix, matching the
/// persisted document format
mod ts_seconds {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let naive = NaiveDateTime::parse_from_str(&s, FORMAT).map_err(serde::de::Error::custom)?;
        Ok(naive.and_utc())
    }
}

struct LogInner {
    records: Vec<EventRecord>,
    dirty: bool,
}

/// EventLogStore instance
pub struct EventLogStore {
    inner: RwLock<LogInner>,
    path: PathBuf,
}

impl EventLogStore {
    /// Open the store, loading any persisted records.
    ///
    /// A missing file starts an empty log; an unreadable or unparseable file
    /// logs a warning and also starts empty rather than failing startup.
    pub async fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let records = match fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<EventRecord>>(&bytes) {
                Ok(records) => {
                    tracing::info!(
                        path = %path.display(),
                        count = records.len(),
                        "Event log loaded"
                    );
                    records
                }
                Err(e) => {
                    let err = Error::LogRead(e.to_string());
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "Event log unparseable, starting empty"
                    );
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No persisted event log, starting empty");
                Vec::new()
            }
            Err(e) => {
                let err = Error::LogRead(e.to_string());
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "Event log unreadable, starting empty"
                );
                Vec::new()
            }
        };

        Ok(Self {
            inner: RwLock::new(LogInner {
                records,
                dirty: false,
            }),
            path,
        })
    }

    /// Append a record and mark the store dirty. Never touches the disk.
    pub async fn append(&self, record: EventRecord) {
        let mut inner = self.inner.write().await;
        tracing::debug!(
            event_type = ?record.event_type,
            source = %record.source,
            "Event appended"
        );
        inner.records.push(record);
        inner.dirty = true;
    }

    /// Persist the full sequence if dirty.
    ///
    /// Returns `Ok(true)` when a physical write happened, `Ok(false)` for the
    /// clean no-op case. A failed write leaves the store dirty so the next
    /// periodic flush retries.
    pub async fn force_save(&self) -> Result<bool> {
        let snapshot = {
            let mut inner = self.inner.write().await;
            if !inner.dirty {
                return Ok(false);
            }
            inner.dirty = false;
            inner.records.clone()
        };

        if let Err(e) = self.write_records(&snapshot).await {
            self.inner.write().await.dirty = true;
            return Err(e);
        }

        tracing::debug!(
            path = %self.path.display(),
            count = snapshot.len(),
            "Event log persisted"
        );
        Ok(true)
    }

    /// Wipe the in-memory sequence and persist immediately, bypassing the
    /// dirty debounce.
    pub async fn clear(&self) -> Result<()> {
        {
            let mut inner = self.inner.write().await;
            inner.records.clear();
            inner.dirty = false;
        }

        if let Err(e) = self.write_records(&[]).await {
            self.inner.write().await.dirty = true;
            return Err(e);
        }

        tracing::info!(path = %self.path.display(), "Event log cleared");
        Ok(())
    }

    /// All records, oldest first
    pub async fn all(&self) -> Vec<EventRecord> {
        self.inner.read().await.records.clone()
    }

    /// Records of one type, oldest first
    pub async fn by_type(&self, event_type: EventType) -> Vec<EventRecord> {
        self.inner
            .read()
            .await
            .records
            .iter()
            .filter(|r| r.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Records with start <= timestamp <= end (inclusive bounds)
    pub async fn by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<EventRecord> {
        self.inner
            .read()
            .await
            .records
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .cloned()
            .collect()
    }

    /// Number of records currently held
    pub async fn count(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Whether unpersisted records exist
    pub async fn is_dirty(&self) -> bool {
        self.inner.read().await.dirty
    }

    async fn write_records(&self, records: &[EventRecord]) -> Result<()> {
        let json = serde_json::to_vec_pretty(records)?;
        fs::write(&self.path, json)
            .await
            .map_err(|e| Error::LogWrite(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }
}
