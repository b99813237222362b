// THEORY:
// The `pipeline` module is the top-level API of the tracking engine. It owns one
// instance of every stage and runs them in order, once per tick:
//
// 1.  **Commands**: every queued `ParameterCommand` is applied before anything
//     else, so the whole tick sees one consistent parameter snapshot.
// 2.  **Acquire**: the frame source is polled. No new frame means the rest of
//     the tick is skipped; nothing stale is ever reprocessed.
// 3.  **Preprocess**: depth remap, crop blanking, directional blur.
// 4.  **Background**: with subtraction enabled the processed frame is turned
//     into a foreground mask; otherwise it goes to the extractor unchanged.
// 5.  **Extract and track**: outlines inside the area bounds, labelled by the
//     persistence tracker.
// 6.  **Select**: all outlines, or only the largest one this tick.
// 7.  **Post-process**: smooth, then simplify, each selected outline.
// 8.  **Transmit**: count first, then the outlines in order.
//
// Every collaborator is handed in at construction. The only way to change a
// parameter from outside is the command queue (or the explicit setters below,
// for a local control surface running on the same thread).

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::core_modules::background_model::BackgroundModel;
use crate::core_modules::contour::{Contour, Point};
use crate::core_modules::contour_finder::{select_largest, ContourFinder};
use crate::core_modules::frame_source::FrameSource;
use crate::core_modules::parameters::{ParameterCommand, ParameterStore, Parameters};
use crate::core_modules::polyline::{simplify, smooth};
use crate::core_modules::preprocessor::Preprocessor;
use crate::core_modules::tracker::{Tracker, DEFAULT_MAX_DISTANCE, DEFAULT_PERSISTENCE};
use crate::protocol::control::Transmitter;

/// Settings fixed for the lifetime of a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Frames an identity survives without a match.
    pub persistence: u32,
    /// Background adaptation time constant in frames.
    pub learning_time: u32,
    /// Largest centroid jump, in pixels, still treated as the same identity.
    pub max_distance: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            persistence: DEFAULT_PERSISTENCE,
            learning_time: 300,
            max_distance: DEFAULT_MAX_DISTANCE,
        }
    }
}

/// One outline chosen for transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedOutline {
    pub label: u32,
    /// Enclosed area of the raw outline, in pixels.
    pub area: f64,
    /// Smoothed and simplified vertices in pixel coordinates.
    pub points: Vec<Point>,
}

/// Everything a processed tick produced.
#[derive(Debug, Clone)]
pub struct FrameData {
    pub frame_index: u64,
    /// Number of outlines that passed the area filter.
    pub contours_found: usize,
    pub selected: Vec<SelectedOutline>,
    /// Messages handed to the transport this tick.
    pub messages_sent: usize,
}

/// Result of a single tick.
#[derive(Debug, Clone)]
pub enum TickReport {
    NoNewFrame,
    Processed(FrameData),
}

pub struct TrackingPipeline {
    source: Box<dyn FrameSource>,
    preprocessor: Preprocessor,
    background: BackgroundModel,
    finder: ContourFinder,
    parameters: ParameterStore,
    transmitter: Option<Transmitter>,
    commands: mpsc::UnboundedReceiver<ParameterCommand>,
    command_sender: mpsc::UnboundedSender<ParameterCommand>,
}

impl TrackingPipeline {
    pub fn new(source: Box<dyn FrameSource>, parameters: ParameterStore, config: &PipelineConfig) -> Self {
        let (command_sender, commands) = mpsc::unbounded_channel();
        let tracker = Tracker::new(config.persistence, config.max_distance);
        let background = BackgroundModel::new(config.learning_time, parameters.background_threshold());
        Self {
            source,
            preprocessor: Preprocessor::new(),
            background,
            finder: ContourFinder::new(tracker),
            parameters,
            transmitter: None,
            commands,
            command_sender,
        }
    }

    /// Attaches the outbound transport. Without one, ticks still run but send nothing.
    pub fn with_transmitter(mut self, transmitter: Transmitter) -> Self {
        self.transmitter = Some(transmitter);
        self
    }

    /// A handle for queueing commands from any thread or task.
    pub fn command_sender(&self) -> mpsc::UnboundedSender<ParameterCommand> {
        self.command_sender.clone()
    }

    /// Runs one acquire-process-transmit cycle.
    pub fn tick(&mut self) -> TickReport {
        let applied = self.drain_commands();
        if applied > 0 {
            debug!("Applied {} queued command(s)", applied);
        }

        let Some(frame) = self.source.poll_new_frame() else {
            return TickReport::NoNewFrame;
        };

        let params = self.parameters.snapshot();
        self.configure_stages(&params);

        // Stage 1: Preprocessing
        let processed = self.preprocessor.process(&frame, &params);

        // Stage 2: Foreground extraction
        let mask = if params.background_subtraction {
            self.background.update(&processed.image)
        } else {
            processed.image
        };

        // Stage 3: Contours and persistence
        let contours = self.finder.find_contours(&mask);

        // Stage 4: Selection and post-processing
        let chosen: Vec<&Contour> = if params.send_all_contours {
            contours.iter().collect()
        } else {
            select_largest(&contours).map(|i| vec![&contours[i]]).unwrap_or_default()
        };
        let selected: Vec<SelectedOutline> = chosen
            .into_iter()
            .map(|contour| SelectedOutline {
                label: contour.label,
                area: contour.area(),
                points: post_process(contour.points(), &params),
            })
            .collect();

        // Stage 5: Transmission
        let messages_sent = match self.transmitter.as_mut() {
            Some(transmitter) => {
                let mut outlines: Vec<Vec<Point>> = selected.iter().map(|s| s.points.clone()).collect();
                // Single-outline mode always announces one outline, even an empty one.
                if !params.send_all_contours && outlines.is_empty() {
                    outlines.push(Vec::new());
                }
                transmitter.send_tick(&outlines)
            }
            None => 0,
        };

        trace!(
            "frame {}: {} contour(s), {} selected, {} message(s)",
            frame.index,
            contours.len(),
            selected.len(),
            messages_sent
        );

        TickReport::Processed(FrameData {
            frame_index: frame.index,
            contours_found: contours.len(),
            selected,
            messages_sent,
        })
    }

    /// Discards the learned background; the next processed frame re-seeds it.
    pub fn reset_background(&mut self) {
        self.background.reset();
    }

    /// Sends an externally computed scalar level, independent of frame cadence.
    pub fn send_signal(&mut self, level: f32) -> bool {
        self.transmitter
            .as_mut()
            .is_some_and(|transmitter| transmitter.send_signal(level))
    }

    /// Read-only view of the live parameters, for display.
    pub fn parameters(&self) -> &ParameterStore {
        &self.parameters
    }

    /// Direct access for a local control surface on the tick thread.
    pub fn parameters_mut(&mut self) -> &mut ParameterStore {
        &mut self.parameters
    }

    pub fn tracker(&self) -> &Tracker {
        self.finder.tracker()
    }

    pub fn background(&self) -> &BackgroundModel {
        &self.background
    }

    pub fn last_sent(&self) -> Option<&str> {
        self.transmitter.as_ref().and_then(|t| t.last_sent())
    }

    fn drain_commands(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.commands.try_recv() {
            debug!("Applying {:?}", command);
            match command {
                ParameterCommand::ResetBackground => self.background.reset(),
                other => self.parameters.apply(other),
            }
            applied += 1;
        }
        applied
    }

    fn configure_stages(&mut self, params: &Parameters) {
        self.background.set_threshold(params.background_threshold);
        self.finder.set_threshold(params.threshold);
        self.finder.set_min_area_radius(params.min_area_radius as f64);
        self.finder.set_max_area_radius(params.max_area_radius as f64);
    }
}

fn post_process(points: &[Point], params: &Parameters) -> Vec<Point> {
    let smoothed = smooth(points, params.smoothing_size, params.smoothing_shape);
    simplify(&smoothed, params.simplify_tolerance)
}
