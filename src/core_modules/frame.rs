// THEORY:
// The `frame` module holds the two "dumb" data containers that flow through a
// single tick of the engine: the raw `Frame` as it leaves a sensing device, and
// the `ProcessedFrame` that the preprocessor derives from it.
//
// A `Frame` never changes once it has been read from its source. Everything the
// later stages need is derived from it into fresh buffers, so a capture thread can
// publish a finished frame while the processing thread works on the previous one.

use image::{GrayImage, ImageBuffer, Luma};

/// Raw sample grid. Depth frames store millimetres, intensity frames store 0..=255.
pub type SampleImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// What the samples of a `Frame` mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Distance from the sensor in millimetres (the depth camera variant).
    Depth,
    /// Plain luminance in 0..=255 (the video camera variant).
    Intensity,
}

/// A single image as delivered by a `FrameSource`.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Arrival order, starting at 0 for the first frame a source produces.
    pub index: u64,
    pub kind: FrameKind,
    pub samples: SampleImage,
}

impl Frame {
    pub fn new(index: u64, kind: FrameKind, samples: SampleImage) -> Self {
        Self {
            index,
            kind,
            samples,
        }
    }

    /// Builds a depth frame from a row-major millimetre buffer.
    /// Returns `None` when the buffer length does not match the dimensions.
    pub fn from_depth(index: u64, width: u32, height: u32, millimetres: Vec<u16>) -> Option<Self> {
        let samples = SampleImage::from_raw(width, height, millimetres)?;
        Some(Self::new(index, FrameKind::Depth, samples))
    }

    /// Builds an intensity frame from an 8-bit grayscale image.
    pub fn from_gray(index: u64, gray: &GrayImage) -> Self {
        let samples = SampleImage::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([gray.get_pixel(x, y)[0] as u16])
        });
        Self::new(index, FrameKind::Intensity, samples)
    }

    pub fn width(&self) -> u32 {
        self.samples.width()
    }

    pub fn height(&self) -> u32 {
        self.samples.height()
    }
}

/// A frame after depth remap, crop blanking and blur.
/// Always has the same dimensions as the `Frame` it was derived from.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    /// Index of the source frame.
    pub index: u64,
    pub image: GrayImage,
}

impl ProcessedFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
