//! Stream Monitor Library
//!
//! Multi-stream motion monitoring with automatic recording.
//!
//! ## Architecture
//!
//! 1. EventLogStore - durable append-only event log
//! 2. MotionDetector - per-stream motion detection state machine
//! 3. RecordingSupervisor - external encoder process lifecycle
//! 4. FrameCapture - frame grabs and motion snapshots
//! 5. StreamOrchestrator - stream arena and recording decisions
//! 6. NotificationHub - WebSocket/event distribution
//! 7. WebAPI - REST control surface
//!
//! ## Design Principles
//!
//! - One tokio task per stream unit keeps that unit's frames in order
//! - All services injected through AppState, no ambient globals
//! - Multi-unit operations aggregate per-unit failures instead of aborting

pub mod capture;
pub mod error;
pub mod event_log;
pub mod hub;
pub mod models;
pub mod motion;
pub mod orchestrator;
pub mod recorder;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::AppState;
