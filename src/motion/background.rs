//! Running background model for frame differencing

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{close, open};

/// Gaussian pre-blur sigma applied to every frame before differencing
const BLUR_SIGMA: f32 = 3.5;
/// Per-pixel intensity delta (0-255 scale) treated as foreground
const FOREGROUND_DELTA: f32 = 25.0;
/// Weight of the newest frame in the running average
const LEARNING_RATE: f32 = 0.05;
/// Radius of the square structuring element for speckle cleanup
const CLEANUP_RADIUS: u8 = 2;

/// Exponential moving average of blurred grayscale frames.
///
/// `apply` compares each new frame against the average and reports the
/// fraction of pixels that moved, then folds the frame into the average.
pub struct BackgroundModel {
    accum: Vec<f32>,
    width: u32,
    height: u32,
}

impl BackgroundModel {
    pub fn new() -> Self {
        Self {
            accum: Vec::new(),
            width: 0,
            height: 0,
        }
    }

    pub fn is_seeded(&self) -> bool {
        !self.accum.is_empty()
    }

    /// Drop the accumulated background. The next frame reseeds it.
    pub fn reset(&mut self) {
        self.accum = Vec::new();
        self.width = 0;
        self.height = 0;
    }

    /// Measure the foreground ratio of `frame` against the running
    /// background, then fold the frame in.
    ///
    /// The first frame after construction, a reset, or a resolution change
    /// only seeds the model and reports 0.0.
    pub fn apply(&mut self, frame: &GrayImage) -> f64 {
        let width = frame.width();
        let height = frame.height();
        let blurred = gaussian_blur_f32(frame, BLUR_SIGMA);

        if !self.is_seeded() || self.width != width || self.height != height {
            self.accum = blurred.as_raw().iter().map(|&p| p as f32).collect();
            self.width = width;
            self.height = height;
            return 0.0;
        }

        let mask = GrayImage::from_fn(width, height, |x, y| {
            let idx = (y * width + x) as usize;
            let diff = (blurred.as_raw()[idx] as f32 - self.accum[idx]).abs();
            if diff > FOREGROUND_DELTA {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        });

        // Opening removes isolated speckles, closing fills small holes in
        // genuine foreground regions.
        let cleaned = close(&open(&mask, Norm::LInf, CLEANUP_RADIUS), Norm::LInf, CLEANUP_RADIUS);
        let foreground = cleaned.as_raw().iter().filter(|&&p| p > 0).count();
        let level = foreground as f64 / (width as u64 * height as u64) as f64;

        for (acc, &p) in self.accum.iter_mut().zip(blurred.as_raw().iter()) {
            *acc = (1.0 - LEARNING_RATE) * *acc + LEARNING_RATE * p as f32;
        }

        level
    }
}

impl Default for BackgroundModel {
    fn default() -> Self {
        Self::new()
    }
}
