//! OSC-style messaging between the tracker, the renderer and control surfaces.

pub mod control;
pub mod osc;
pub mod transport;
