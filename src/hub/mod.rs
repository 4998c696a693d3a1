//! NotificationHub - WebSocket distribution
//!
//! ## Responsibilities
//!
//! - WebSocket connection management
//! - Broadcasting event records as they are logged
//! - Recording state change notifications
//!
//! Note: only notifications travel over the socket. Recordings and
//! snapshots are fetched via HTTP from /api/recordings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::event_log::EventRecord;

/// Hub message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HubMessage {
    /// A record was appended to the event log
    Event(EventMessage),
    /// Recording started or stopped
    RecordingState(RecordingStateMessage),
}

/// Event notification, mirroring the logged record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub timestamp: String,
    pub event_type: u8,
    pub stream_url: String,
    pub description: String,
    pub snapshot_path: String,
    pub motion_level: f64,
}

impl From<&EventRecord> for EventMessage {
    fn from(record: &EventRecord) -> Self {
        Self {
            timestamp: record.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
            event_type: record.event_type.into(),
            stream_url: record.source.clone(),
            description: record.description.clone(),
            snapshot_path: record.snapshot_path.clone(),
            motion_level: record.motion_level,
        }
    }
}

/// Recording state change notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingStateMessage {
    pub active: bool,
    /// Streams currently recording
    pub recording_streams: u32,
    pub timestamp: String,
}

/// Client connection
struct ClientConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// NotificationHub instance
pub struct NotificationHub {
    connections: RwLock<HashMap<Uuid, ClientConnection>>,
    connection_count: AtomicU64,
}

impl NotificationHub {
    /// Create new NotificationHub
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            connection_count: AtomicU64::new(0),
        }
    }

    /// Register a new client
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let conn = ClientConnection { id, tx };

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, conn);
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(connection_id = %id, "Client connected");

        (id, rx)
    }

    /// Unregister a client
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(id).is_some() {
            self.connection_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(connection_id = %id, "Client disconnected");
        }
    }

    /// Broadcast message to all clients
    pub async fn broadcast(&self, message: HubMessage) {
        let msg_type = match &message {
            HubMessage::Event(_) => "event",
            HubMessage::RecordingState(_) => "recording_state",
        };
        tracing::debug!(message_type = %msg_type, "Broadcasting message to clients");

        let json = match serde_json::to_string(&message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize message");
                return;
            }
        };

        let connections = self.connections.read().await;
        for conn in connections.values() {
            if let Err(e) = conn.tx.send(json.clone()) {
                tracing::warn!(connection_id = %conn.id, error = %e, "Failed to send message");
            }
        }
    }

    /// Broadcast an event record to all clients
    pub async fn broadcast_event(&self, record: &EventRecord) {
        self.broadcast(HubMessage::Event(EventMessage::from(record)))
            .await;
    }

    /// Get connection count
    pub fn connection_count(&self) -> u64 {
        self.connection_count.load(Ordering::Relaxed)
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::EventType;

    #[tokio::test]
    async fn test_register_broadcast_unregister() {
        let hub = NotificationHub::new();
        let (id, mut rx) = hub.register().await;
        assert_eq!(hub.connection_count(), 1);

        let record = EventRecord::new(
            EventType::MotionDetected,
            "rtsp://cam/stream",
            "Motion detected",
            0.05,
            "",
        );
        hub.broadcast_event(&record).await;

        let json = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["data"]["event_type"], 0);
        assert_eq!(value["data"]["stream_url"], "rtsp://cam/stream");
        assert_eq!(value["data"]["motion_level"], 0.05);

        hub.unregister(&id).await;
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_survives_dropped_client() {
        let hub = NotificationHub::new();
        let (_gone, rx) = hub.register().await;
        drop(rx);
        let (_alive, mut rx2) = hub.register().await;

        hub.broadcast(HubMessage::RecordingState(RecordingStateMessage {
            active: true,
            recording_streams: 2,
            timestamp: "2026-08-24T10:00:00".to_string(),
        }))
        .await;

        let json = rx2.recv().await.unwrap();
        assert!(json.contains("recording_state"));
    }
}
