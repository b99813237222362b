//! Error types for the tracking engine.

use thiserror::Error;

/// Every failure the library can report.
///
/// No-data conditions (no new frame, no pending datagram) are not errors and
/// never appear here; they are expressed as `Option::None` by the APIs that poll.
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Malformed packet: {reason}")]
    Decode { reason: String },

    #[error("Bad argument for {address}: {reason}")]
    Argument { address: String, reason: String },

    #[error("Unknown address: {0}")]
    UnknownAddress(String),

    #[error("Frame source unavailable: {0}")]
    Source(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl TrackingError {
    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        TrackingError::Decode {
            reason: reason.into(),
        }
    }

    pub(crate) fn argument(address: &str, reason: impl Into<String>) -> Self {
        TrackingError::Argument {
            address: address.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TrackingError>;
