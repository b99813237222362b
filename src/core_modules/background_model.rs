// THEORY:
// The `BackgroundModel` learns what the empty floor looks like so that only the
// people walking on it survive into contour extraction.
//
// Each pixel keeps an exponential running average of its intensity. The time
// constant is the learning time in frames: a newly parked object fades into the
// background after roughly that many frames. A pixel is foreground when the
// current frame deviates from its average by more than the threshold.
//
// The model starts with no history. The first frame after construction or a
// `reset()` seeds the average and is reported as entirely foreground, since
// nothing about the scene has been learned yet.

use image::{GrayImage, Luma};
use tracing::{debug, info};

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

#[derive(Debug, Clone)]
pub struct BackgroundModel {
    /// Per-pixel running average, `None` until the first frame after a reset.
    average: Option<Vec<f32>>,
    width: u32,
    height: u32,
    /// Adaptation time constant in frames.
    learning_time: u32,
    /// Deviation above which a pixel is foreground.
    threshold: f32,
}

impl BackgroundModel {
    pub fn new(learning_time: u32, threshold: i32) -> Self {
        Self {
            average: None,
            width: 0,
            height: 0,
            learning_time: learning_time.max(1),
            threshold: threshold.max(0) as f32,
        }
    }

    pub fn set_threshold(&mut self, threshold: i32) {
        self.threshold = threshold.max(0) as f32;
    }

    pub fn set_learning_time(&mut self, frames: u32) {
        self.learning_time = frames.max(1);
    }

    pub fn learning_time(&self) -> u32 {
        self.learning_time
    }

    /// True once at least one frame has been learned since the last reset.
    pub fn is_learned(&self) -> bool {
        self.average.is_some()
    }

    /// Discards all accumulated history.
    pub fn reset(&mut self) {
        info!("Background model reset; discarding learned scene");
        self.average = None;
    }

    /// Classifies `frame` against the learned scene, then folds it into the average.
    /// Returns a mask of `FOREGROUND` / `BACKGROUND` pixels with the frame's dimensions.
    pub fn update(&mut self, frame: &GrayImage) -> GrayImage {
        let (width, height) = frame.dimensions();
        if self.width != width || self.height != height {
            self.average = None;
            self.width = width;
            self.height = height;
        }

        let Some(average) = self.average.as_mut() else {
            debug!("Seeding background model from frame ({}x{})", width, height);
            self.average = Some(frame.pixels().map(|p| p[0] as f32).collect());
            return GrayImage::from_pixel(width, height, Luma([FOREGROUND]));
        };

        let alpha = 1.0 / self.learning_time as f32;
        let threshold = self.threshold;
        let mut mask = GrayImage::new(width, height);
        for ((pixel, mean), out) in frame.pixels().zip(average.iter_mut()).zip(mask.pixels_mut()) {
            let value = pixel[0] as f32;
            let deviation = (value - *mean).abs();
            *out = Luma([if deviation > threshold { FOREGROUND } else { BACKGROUND }]);
            *mean += alpha * (value - *mean);
        }
        mask
    }

    /// The learned scene rounded to 8 bits, if any.
    pub fn background(&self) -> Option<GrayImage> {
        let average = self.average.as_ref()?;
        GrayImage::from_raw(
            self.width,
            self.height,
            average.iter().map(|v| v.round().clamp(0.0, 255.0) as u8).collect(),
        )
    }
}
