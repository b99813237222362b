// THEORY:
// A `FrameSource` is anything that can be polled for the next frame without
// waiting. Which device sits behind it (depth sensor, plain camera, recorded
// files, a simulation) is chosen at runtime; the pipeline only sees the trait.
//
// Polling returns `None` when there is nothing new. That is the normal idle
// case, not an error: the pipeline skips the rest of the tick and tries again.
//
// Devices that deliver frames from their own thread are wrapped in a
// `ThreadedSource`, which owns the capture thread and publishes each complete
// frame through a latest-value channel. The processing side only ever swaps in
// whole frames, so it can never observe one that is half written.

use std::collections::VecDeque;
use std::f32::consts::TAU;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::{DynamicImage, Luma};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core_modules::frame::{Frame, FrameKind, SampleImage};
use crate::error::{Result, TrackingError};

/// Capability shared by every frame provider.
pub trait FrameSource: Send {
    /// Returns the next unseen frame, or `None` if there is none yet.
    fn poll_new_frame(&mut self) -> Option<Frame>;

    /// Fixed sensor resolution as `(width, height)`.
    fn dimensions(&self) -> (u32, u32);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn poll_new_frame(&mut self) -> Option<Frame> {
        (**self).poll_new_frame()
    }

    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }
}

// --- Null ---

/// Stand-in for a device that could not be opened. Never yields a frame.
#[derive(Debug, Clone)]
pub struct NullSource {
    width: u32,
    height: u32,
}

impl NullSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl FrameSource for NullSource {
    fn poll_new_frame(&mut self) -> Option<Frame> {
        None
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

// --- Scripted ---

/// A queue of prepared frames, handed out once each in order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    width: u32,
    height: u32,
    frames: VecDeque<Frame>,
}

impl ScriptedSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frames: VecDeque::new(),
        }
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push_back(frame);
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ScriptedSource {
    fn poll_new_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

// --- Synthetic ---

/// A simulated overhead depth sensor: a flat floor with round "visitors"
/// walking Lissajous paths across it. Fully deterministic.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    width: u32,
    height: u32,
    visitors: usize,
    /// Depth of the empty floor in millimetres.
    pub floor_depth: u16,
    /// Depth of the top of a visitor in millimetres.
    pub visitor_depth: u16,
    /// Visitor radius in pixels.
    pub visitor_radius: f32,
    next_index: u64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, visitors: usize) -> Self {
        Self {
            width,
            height,
            visitors,
            floor_depth: 4500,
            visitor_depth: 400,
            visitor_radius: 30.0,
            next_index: 0,
        }
    }

    /// Centre of visitor `i` at frame `index`.
    pub fn visitor_position(&self, i: usize, index: u64) -> (f32, f32) {
        let t = index as f32 * 0.02;
        let phase = i as f32 * TAU / self.visitors.max(1) as f32;
        let (w, h) = (self.width as f32, self.height as f32);
        let x = w / 2.0 + w / 3.0 * (t * (1.0 + 0.3 * i as f32) + phase).sin();
        let y = h / 2.0 + h / 3.0 * (t * (0.7 + 0.2 * i as f32) + phase).cos();
        (x, y)
    }

    fn render(&self, index: u64) -> Frame {
        let centres: Vec<(f32, f32)> = (0..self.visitors)
            .map(|i| self.visitor_position(i, index))
            .collect();
        let r2 = self.visitor_radius * self.visitor_radius;
        let samples = SampleImage::from_fn(self.width, self.height, |x, y| {
            let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
            let inside = centres
                .iter()
                .any(|&(cx, cy)| (px - cx).powi(2) + (py - cy).powi(2) <= r2);
            Luma([if inside { self.visitor_depth } else { self.floor_depth }])
        });
        Frame::new(index, FrameKind::Depth, samples)
    }
}

impl FrameSource for SyntheticSource {
    fn poll_new_frame(&mut self) -> Option<Frame> {
        let frame = self.render(self.next_index);
        self.next_index += 1;
        Some(frame)
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

// --- File sequence ---

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "pgm", "tif", "tiff", "bmp", "jpg", "jpeg"];

/// Replays a directory of images in lexical order, looping forever.
///
/// 16-bit grayscale images are read as depth in millimetres; anything else is
/// converted to 8-bit luminance.
#[derive(Debug, Clone)]
pub struct FileSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    width: u32,
    height: u32,
    next_index: u64,
}

impl FileSequenceSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        paths.sort();

        let first = paths
            .first()
            .ok_or_else(|| TrackingError::Source(format!("no images in {}", dir.display())))?;
        let (width, height) = image::image_dimensions(first)?;
        info!("Replaying {} images from {} ({}x{})", paths.len(), dir.display(), width, height);

        Ok(Self {
            paths,
            cursor: 0,
            width,
            height,
            next_index: 0,
        })
    }

    fn load(&self, path: &Path, index: u64) -> Result<Frame> {
        let frame = match image::open(path)? {
            DynamicImage::ImageLuma16(samples) => Frame::new(index, FrameKind::Depth, samples),
            other => Frame::from_gray(index, &other.to_luma8()),
        };
        Ok(frame)
    }
}

impl FrameSource for FileSequenceSource {
    fn poll_new_frame(&mut self) -> Option<Frame> {
        let path = self.paths[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.paths.len();

        match self.load(&path, self.next_index) {
            Ok(frame) if frame.width() == self.width && frame.height() == self.height => {
                self.next_index += 1;
                Some(frame)
            }
            Ok(frame) => {
                warn!(
                    "Skipping {}: {}x{} does not match {}x{}",
                    path.display(),
                    frame.width(),
                    frame.height(),
                    self.width,
                    self.height
                );
                None
            }
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                None
            }
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

// --- Capture thread ---

/// Runs a source on its own thread at a fixed rate and hands the newest
/// complete frame to the poller. Frames the poller did not get to in time
/// are replaced, never queued.
pub struct ThreadedSource {
    width: u32,
    height: u32,
    frames: watch::Receiver<Option<Frame>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadedSource {
    pub fn spawn<S>(mut source: S, period: Duration) -> Result<Self>
    where
        S: FrameSource + 'static,
    {
        let (width, height) = source.dimensions();
        let (tx, rx) = watch::channel(None);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("frame-capture".into())
            .spawn(move || {
                debug!("Capture thread started");
                while !thread_stop.load(Ordering::Acquire) {
                    if let Some(frame) = source.poll_new_frame() {
                        tx.send_replace(Some(frame));
                    }
                    thread::sleep(period);
                }
                debug!("Capture thread stopped");
            })?;

        Ok(Self {
            width,
            height,
            frames: rx,
            stop,
            handle: Some(handle),
        })
    }
}

impl FrameSource for ThreadedSource {
    fn poll_new_frame(&mut self) -> Option<Frame> {
        // An error means the capture thread has gone away; treat it as idle.
        if !self.frames.has_changed().unwrap_or(false) {
            return None;
        }
        self.frames.borrow_and_update().clone()
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for ThreadedSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Capture thread panicked");
            }
        }
    }
}
