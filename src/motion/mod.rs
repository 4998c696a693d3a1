//! MotionDetector - per-stream motion detection state machine
//!
//! ## Responsibilities
//!
//! - Frame differencing against a running background model
//! - Consecutive-frame confirmation before declaring motion
//! - Post-trigger cooldown so one movement yields one event
//! - Threshold management (clamped to the unit interval)
//!
//! The detector is synchronous and owns no I/O; the orchestrator feeds it
//! frames sampled from each stream.

use image::GrayImage;

pub mod background;

pub use background::BackgroundModel;

/// Default fraction of changed pixels required to count a frame as motion
pub const DEFAULT_THRESHOLD: f64 = 0.02;

/// Qualifying frames required in a row before motion triggers
const MIN_CONSECUTIVE: u32 = 3;
/// Frames to suppress after a trigger
const COOLDOWN_FRAMES: u32 = 10;

/// Detection phase for one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Not analyzing frames; background model released
    Disabled,
    /// Analyzing; `consecutive` qualifying frames seen so far
    Armed { consecutive: u32 },
    /// Triggered recently; `remaining` frames still suppressed
    Cooldown { remaining: u32 },
}

/// Per-stream motion detector.
pub struct MotionDetector {
    state: DetectorState,
    threshold: f64,
    last_level: f64,
    model: BackgroundModel,
}

impl MotionDetector {
    /// New detector, enabled and armed, with the given threshold (clamped)
    pub fn new(threshold: f64) -> Self {
        let mut detector = Self {
            state: DetectorState::Armed { consecutive: 0 },
            threshold: DEFAULT_THRESHOLD,
            last_level: 0.0,
            model: BackgroundModel::new(),
        };
        detector.set_threshold(threshold);
        detector
    }

    pub fn is_enabled(&self) -> bool {
        self.state != DetectorState::Disabled
    }

    /// Enable or disable detection.
    ///
    /// Disabling clears the confirmation counter, the reported level and any
    /// cooldown, and releases the background model; re-enabling starts from
    /// a fresh armed state and the next frame reseeds the model.
    pub fn set_enabled(&mut self, enabled: bool) {
        match (enabled, self.is_enabled()) {
            (true, false) => {
                self.state = DetectorState::Armed { consecutive: 0 };
            }
            (false, true) => {
                self.state = DetectorState::Disabled;
                self.last_level = 0.0;
                self.model.reset();
            }
            _ => {}
        }
    }

    /// Update the trigger threshold, clamped to [0.0, 1.0].
    /// Non-finite values are ignored.
    pub fn set_threshold(&mut self, threshold: f64) {
        if threshold.is_finite() {
            self.threshold = threshold.clamp(0.0, 1.0);
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Motion level of the most recently analyzed frame
    pub fn last_level(&self) -> f64 {
        self.last_level
    }

    /// Analyze one frame. Returns true when this frame triggers motion.
    ///
    /// Malformed (zero-dimension) frames are dropped without touching any
    /// state. Disabled detectors ignore frames entirely.
    pub fn process_frame(&mut self, frame: &GrayImage) -> bool {
        if frame.width() == 0 || frame.height() == 0 {
            return false;
        }
        if !self.is_enabled() {
            return false;
        }
        let level = self.model.apply(frame);
        self.advance(level)
    }

    /// Step the state machine with a pre-computed motion level.
    ///
    /// During cooldown the counter decrements before any threshold
    /// comparison would happen, so a full cooldown absorbs exactly
    /// `COOLDOWN_FRAMES` frames and the next one is evaluated fresh.
    pub fn advance(&mut self, level: f64) -> bool {
        self.last_level = level;
        match self.state {
            DetectorState::Disabled => false,
            DetectorState::Cooldown { remaining } => {
                let remaining = remaining - 1;
                self.state = if remaining == 0 {
                    DetectorState::Armed { consecutive: 0 }
                } else {
                    DetectorState::Cooldown { remaining }
                };
                false
            }
            DetectorState::Armed { consecutive } => {
                if level > self.threshold {
                    let consecutive = consecutive + 1;
                    if consecutive >= MIN_CONSECUTIVE {
                        self.state = DetectorState::Cooldown {
                            remaining: COOLDOWN_FRAMES,
                        };
                        true
                    } else {
                        self.state = DetectorState::Armed { consecutive };
                        false
                    }
                } else {
                    self.state = DetectorState::Armed { consecutive: 0 };
                    false
                }
            }
        }
    }
}
