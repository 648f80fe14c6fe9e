//! Periodic scene snapshots for the agent.
//!
//! The [`VisionSampler`] grabs the current frame from a [`FrameSource`] on a
//! fixed interval and JPEG-encodes it for the session. The [`VisionClient`]
//! asks the edge proxy for a one-off text description of a frame.

mod describe;
mod sampler;

use thiserror::Error;

pub use describe::{DEFAULT_PROMPT, DescribeRequest, DescribeResponse, VisionClient};
pub use sampler::{
    DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION, DEFAULT_VISION_INTERVAL, FrameSource, FrameSlot,
    StillImageSource, VisionConfig, VisionFrame, VisionSampler, encode_jpeg,
};

/// A single frame could not be produced. The next tick retries.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame source failed: {0}")]
    Source(String),

    #[error("Image load failed: {0}")]
    Load(#[from] image::ImageError),

    #[error("JPEG encode failed: {0}")]
    Encode(String),
}

/// Scene description request failed.
#[derive(Debug, Error)]
pub enum DescribeError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The proxy answered with a non-success status
    #[error("Proxy returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid proxy URL: {0}")]
    InvalidUrl(String),
}
