// THEORY:
// This file is the entry point of the `floorsense` library crate. It exposes the
// `TrackingPipeline` and the data it produces as the high-level interface, plus
// the protocol and configuration layers the binary wires around it.
//
// The vision stages live in `core_modules`, one module per stage. They know
// nothing about the network; `protocol` knows nothing about pixels beyond the
// vertex lists it is handed. The pipeline is the only place the two meet.

pub mod cli;
pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod protocol;

pub use config::TrackingConfig;
pub use core_modules::contour::{Contour, Point};
pub use core_modules::frame::{Frame, FrameKind, ProcessedFrame};
pub use core_modules::frame_source::FrameSource;
pub use core_modules::parameters::{ParameterCommand, ParameterStore, Parameters};
pub use error::{Result, TrackingError};
pub use pipeline::{FrameData, PipelineConfig, SelectedOutline, TickReport, TrackingPipeline};
