// THEORY:
// The control layer is the only place that knows the address space. It turns
// inbound messages into typed `ParameterCommand`s (so the pipeline never sees a
// raw message) and builds the outbound geometry and signal messages.
//
// Inbound: `<prefix>/<Name>` with exactly one argument, or no argument for the
// reset address. Arguments are coerced leniently: an int parameter accepts a
// float (truncated), a float parameter accepts an int, and a switch accepts an
// int, a float or a T/F tag. Everything else is rejected before any parameter
// is touched.
//
// Outbound, per processed frame: `<prefix>/NumContours` first, then one
// `<prefix>/Contour/<i>` per outline with i counting up from 0. Vertices are
// flattened into x0 y0 x1 y1 ... and normalised by the sensor dimensions.

use tracing::{debug, warn};

use crate::core_modules::contour::Point;
use crate::core_modules::parameters::ParameterCommand;
use crate::error::{Result, TrackingError};
use crate::protocol::osc::{OscArg, OscMessage};
use crate::protocol::transport::MessageSink;

pub const DEFAULT_OUTBOUND_PREFIX: &str = "/ContourRenderer";
pub const DEFAULT_INBOUND_PREFIX: &str = "/ContourTracking";

/// Raw peaks at or above this level map to a full-scale signal.
pub const PEAK_CEILING: f32 = 0.6;

/// Maps a raw audio peak in `[0, PEAK_CEILING]` to `[0, 1]`, clamping outside it.
pub fn normalize_peak(peak: f32) -> f32 {
    if peak.is_nan() {
        return 0.0;
    }
    (peak / PEAK_CEILING).clamp(0.0, 1.0)
}

// --- Inbound ---

fn int_arg(address: &str, message: &OscMessage) -> Result<i32> {
    match single_arg(address, message)? {
        OscArg::Int(v) => Ok(*v),
        OscArg::Float(v) if v.is_finite() => Ok(*v as i32),
        other => Err(TrackingError::argument(address, format!("expected int, got {}", other))),
    }
}

fn float_arg(address: &str, message: &OscMessage) -> Result<f32> {
    match single_arg(address, message)? {
        OscArg::Float(v) => Ok(*v),
        OscArg::Int(v) => Ok(*v as f32),
        other => Err(TrackingError::argument(address, format!("expected float, got {}", other))),
    }
}

fn bool_arg(address: &str, message: &OscMessage) -> Result<bool> {
    match single_arg(address, message)? {
        OscArg::Bool(v) => Ok(*v),
        OscArg::Int(v) => Ok(*v != 0),
        OscArg::Float(v) => Ok(*v != 0.0),
        other => Err(TrackingError::argument(address, format!("expected bool, got {}", other))),
    }
}

fn single_arg<'a>(address: &str, message: &'a OscMessage) -> Result<&'a OscArg> {
    match message.args.as_slice() {
        [arg] => Ok(arg),
        args => Err(TrackingError::argument(
            address,
            format!("expected 1 argument, got {}", args.len()),
        )),
    }
}

/// Decodes one inbound message addressed under `prefix` into a command.
pub fn decode_command(prefix: &str, message: &OscMessage) -> Result<ParameterCommand> {
    let address = message.address.as_str();
    let name = address
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .ok_or_else(|| TrackingError::UnknownAddress(address.to_string()))?;

    let command = match name {
        "NearClipping" => ParameterCommand::NearClip(int_arg(address, message)?),
        "FarClipping" => ParameterCommand::FarClip(int_arg(address, message)?),
        "Threshold" => ParameterCommand::Threshold(int_arg(address, message)?),
        "BackgroundThreshold" => ParameterCommand::BackgroundThreshold(int_arg(address, message)?),
        "MinArea" => ParameterCommand::MinArea(int_arg(address, message)?),
        "MaxArea" => ParameterCommand::MaxArea(int_arg(address, message)?),
        "BlurScale" => ParameterCommand::BlurScale(float_arg(address, message)?),
        "BlurRotation" => ParameterCommand::BlurRotation(float_arg(address, message)?),
        "SimplifyContour" => ParameterCommand::SimplifyTolerance(float_arg(address, message)?),
        "SmoothingSize" => ParameterCommand::SmoothingSize(float_arg(address, message)?),
        "SmoothingShape" => ParameterCommand::SmoothingShape(float_arg(address, message)?),
        "CropLeft" => ParameterCommand::CropLeft(int_arg(address, message)?),
        "CropRight" => ParameterCommand::CropRight(int_arg(address, message)?),
        "CropTop" => ParameterCommand::CropTop(int_arg(address, message)?),
        "CropBottom" => ParameterCommand::CropBottom(int_arg(address, message)?),
        "BackgroundSubtraction" => {
            ParameterCommand::BackgroundSubtraction(bool_arg(address, message)?)
        }
        "SendAllContours" => ParameterCommand::SendAllContours(bool_arg(address, message)?),
        "ResetBackground" => {
            if !message.args.is_empty() {
                return Err(TrackingError::argument(address, "reset takes no arguments"));
            }
            ParameterCommand::ResetBackground
        }
        _ => return Err(TrackingError::UnknownAddress(address.to_string())),
    };
    Ok(command)
}

// --- Outbound ---

pub fn num_contours_message(prefix: &str, count: usize) -> OscMessage {
    let count = i32::try_from(count).unwrap_or(i32::MAX);
    OscMessage::new(format!("{}/NumContours", prefix)).with_int(count)
}

/// Geometry message for outline `index`, normalised against the sensor size.
pub fn contour_message(
    prefix: &str,
    index: usize,
    points: &[Point],
    frame_width: u32,
    frame_height: u32,
) -> OscMessage {
    let w = frame_width.max(1) as f32;
    let h = frame_height.max(1) as f32;
    let mut message = OscMessage::new(format!("{}/Contour/{}", prefix, index));
    message.args.reserve(points.len() * 2);
    for p in points {
        message.push(OscArg::Float(p.x / w));
        message.push(OscArg::Float(p.y / h));
    }
    message
}

pub fn signal_message(prefix: &str, level: f32) -> OscMessage {
    OscMessage::new(format!("{}/AudioMax", prefix)).with_float(level)
}

/// Outbound half of the protocol: frames geometry for a sink.
pub struct Transmitter {
    sink: Box<dyn MessageSink>,
    prefix: String,
    frame_width: u32,
    frame_height: u32,
    /// Text of the last message handed to the sink, kept for display only.
    last_sent: Option<String>,
}

impl Transmitter {
    pub fn new(sink: Box<dyn MessageSink>, prefix: &str, frame_width: u32, frame_height: u32) -> Self {
        Self {
            sink,
            prefix: prefix.trim_end_matches('/').to_string(),
            frame_width,
            frame_height,
            last_sent: None,
        }
    }

    /// Sends the count followed by each outline in order. Returns how many
    /// messages were handed to the sink; a failed send is logged and the rest
    /// of the tick is still attempted.
    pub fn send_tick(&mut self, outlines: &[Vec<Point>]) -> usize {
        let mut sent = 0;
        if self.emit(num_contours_message(&self.prefix, outlines.len())) {
            sent += 1;
        }
        for (i, points) in outlines.iter().enumerate() {
            let message = contour_message(&self.prefix, i, points, self.frame_width, self.frame_height);
            if self.emit(message) {
                sent += 1;
            }
        }
        sent
    }

    /// Sends a scalar level on its own schedule, independent of frames.
    pub fn send_signal(&mut self, level: f32) -> bool {
        self.emit(signal_message(&self.prefix, level))
    }

    pub fn last_sent(&self) -> Option<&str> {
        self.last_sent.as_deref()
    }

    fn emit(&mut self, message: OscMessage) -> bool {
        let ok = match self.sink.send(&message) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropped {}: {}", message.address, e);
                false
            }
        };
        let text = message.to_string();
        debug!("sent {}", text);
        self.last_sent = Some(text);
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    const IN: &str = DEFAULT_INBOUND_PREFIX;
    const OUT: &str = DEFAULT_OUTBOUND_PREFIX;

    fn msg(name: &str, args: Vec<OscArg>) -> OscMessage {
        OscMessage {
            address: format!("{}/{}", IN, name),
            args,
        }
    }

    /// Shared sink so tests can inspect what a `Transmitter` sent.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<OscMessage>>>);

    impl MessageSink for SharedSink {
        fn send(&mut self, message: &OscMessage) -> Result<()> {
            self.0.lock().expect("lock").push(message.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl MessageSink for FailingSink {
        fn send(&mut self, _message: &OscMessage) -> Result<()> {
            Err(TrackingError::Transport("would block".into()))
        }
    }

    #[test]
    fn decodes_every_parameter_address() {
        let cases = [
            ("NearClipping", OscArg::Int(10), ParameterCommand::NearClip(10)),
            ("FarClipping", OscArg::Int(4000), ParameterCommand::FarClip(4000)),
            ("Threshold", OscArg::Int(40), ParameterCommand::Threshold(40)),
            ("BackgroundThreshold", OscArg::Int(5), ParameterCommand::BackgroundThreshold(5)),
            ("MinArea", OscArg::Int(20), ParameterCommand::MinArea(20)),
            ("MaxArea", OscArg::Int(200), ParameterCommand::MaxArea(200)),
            ("BlurScale", OscArg::Float(0.5), ParameterCommand::BlurScale(0.5)),
            ("BlurRotation", OscArg::Float(1.0), ParameterCommand::BlurRotation(1.0)),
            ("SimplifyContour", OscArg::Float(1.5), ParameterCommand::SimplifyTolerance(1.5)),
            ("SmoothingSize", OscArg::Float(2.0), ParameterCommand::SmoothingSize(2.0)),
            ("SmoothingShape", OscArg::Float(0.25), ParameterCommand::SmoothingShape(0.25)),
            ("CropLeft", OscArg::Int(1), ParameterCommand::CropLeft(1)),
            ("CropRight", OscArg::Int(2), ParameterCommand::CropRight(2)),
            ("CropTop", OscArg::Int(3), ParameterCommand::CropTop(3)),
            ("CropBottom", OscArg::Int(4), ParameterCommand::CropBottom(4)),
            ("BackgroundSubtraction", OscArg::Int(0), ParameterCommand::BackgroundSubtraction(false)),
            ("SendAllContours", OscArg::Bool(true), ParameterCommand::SendAllContours(true)),
        ];
        for (name, arg, expected) in cases {
            let decoded = decode_command(IN, &msg(name, vec![arg])).expect(name);
            assert_eq!(decoded, expected, "{}", name);
        }
        assert_eq!(
            decode_command(IN, &msg("ResetBackground", vec![])).expect("reset"),
            ParameterCommand::ResetBackground
        );
    }

    #[test]
    fn arguments_are_coerced_leniently() {
        assert_eq!(
            decode_command(IN, &msg("Threshold", vec![OscArg::Float(99.9)])).expect("float as int"),
            ParameterCommand::Threshold(99)
        );
        assert_eq!(
            decode_command(IN, &msg("BlurScale", vec![OscArg::Int(1)])).expect("int as float"),
            ParameterCommand::BlurScale(1.0)
        );
        assert_eq!(
            decode_command(IN, &msg("SendAllContours", vec![OscArg::Float(1.0)])).expect("float as bool"),
            ParameterCommand::SendAllContours(true)
        );
    }

    #[test]
    fn malformed_messages_are_rejected() {
        assert!(matches!(
            decode_command(IN, &msg("Threshold", vec![])),
            Err(TrackingError::Argument { .. })
        ));
        assert!(matches!(
            decode_command(IN, &msg("Threshold", vec![OscArg::Int(1), OscArg::Int(2)])),
            Err(TrackingError::Argument { .. })
        ));
        assert!(matches!(
            decode_command(IN, &msg("Threshold", vec![OscArg::Str("high".into())])),
            Err(TrackingError::Argument { .. })
        ));
        assert!(matches!(
            decode_command(IN, &msg("ResetBackground", vec![OscArg::Int(1)])),
            Err(TrackingError::Argument { .. })
        ));
        assert!(matches!(
            decode_command(IN, &msg("Nonsense", vec![OscArg::Int(1)])),
            Err(TrackingError::UnknownAddress(_))
        ));
        assert!(matches!(
            decode_command(IN, &OscMessage::new("/Other/Threshold").with_int(1)),
            Err(TrackingError::UnknownAddress(_))
        ));
        assert!(matches!(
            decode_command(IN, &OscMessage::new("/ContourTrackingThreshold").with_int(1)),
            Err(TrackingError::UnknownAddress(_))
        ));
    }

    #[test]
    fn vertices_are_normalised_by_sensor_size() {
        let points = [Point::new(0.0, 0.0), Point::new(512.0, 424.0), Point::new(256.0, 106.0)];
        let message = contour_message(OUT, 3, &points, 512, 424);
        assert_eq!(message.address, "/ContourRenderer/Contour/3");
        assert_eq!(
            message.args,
            vec![
                OscArg::Float(0.0),
                OscArg::Float(0.0),
                OscArg::Float(1.0),
                OscArg::Float(1.0),
                OscArg::Float(0.5),
                OscArg::Float(0.25),
            ]
        );
    }

    #[test]
    fn tick_sends_count_before_indexed_geometry() {
        let sink = SharedSink::default();
        let mut transmitter = Transmitter::new(Box::new(sink.clone()), OUT, 100, 100);
        let outlines = vec![
            vec![Point::new(10.0, 10.0)],
            vec![Point::new(20.0, 20.0)],
            vec![Point::new(30.0, 30.0)],
        ];
        assert_eq!(transmitter.send_tick(&outlines), 4);

        let sent = sink.0.lock().expect("lock");
        assert_eq!(sent[0], OscMessage::new("/ContourRenderer/NumContours").with_int(3));
        for i in 0..3 {
            assert_eq!(sent[i + 1].address, format!("/ContourRenderer/Contour/{}", i));
        }
        assert_eq!(transmitter.last_sent(), Some("/ContourRenderer/Contour/2 0.3 0.3"));
    }

    #[test]
    fn send_failures_do_not_abort_the_tick() {
        let mut transmitter = Transmitter::new(Box::new(FailingSink), OUT, 100, 100);
        assert_eq!(transmitter.send_tick(&[vec![Point::new(1.0, 1.0)]]), 0);
        assert!(!transmitter.send_signal(0.5));
        assert!(transmitter.last_sent().is_some());
    }

    #[test]
    fn signal_goes_to_audio_address() {
        let sink = SharedSink::default();
        let mut transmitter = Transmitter::new(Box::new(sink.clone()), OUT, 100, 100);
        assert!(transmitter.send_signal(normalize_peak(0.3)));
        let sent = sink.0.lock().expect("lock");
        assert_eq!(sent[0], OscMessage::new("/ContourRenderer/AudioMax").with_float(0.5));
    }

    #[test]
    fn peak_normalisation_clamps() {
        assert_eq!(normalize_peak(0.0), 0.0);
        assert_eq!(normalize_peak(0.6), 1.0);
        assert_eq!(normalize_peak(0.9), 1.0);
        assert_eq!(normalize_peak(-1.0), 0.0);
        assert_eq!(normalize_peak(f32::NAN), 0.0);
    }
}
