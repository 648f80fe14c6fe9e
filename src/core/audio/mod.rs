//! Microphone capture and agent audio playback.
//!
//! Capture runs device samples through a box-filter resampler to 16 kHz and
//! frames them into PCM16 chunks. Playback decodes the agent's 24 kHz PCM16
//! and schedules it back-to-back on a [`PlaybackSink`].
//!
//! Host audio devices are only available with the `device-audio` feature.
//! Without it, capture is fed from a channel and playback runs against a
//! clocked sink that discards samples.

mod capture;
#[cfg(feature = "device-audio")]
mod device;
pub mod pcm;
mod playback;
mod resample;

use thiserror::Error;

pub use capture::{
    AudioCaptureStream, AudioFrame, AudioFramer, CaptureConfig, DEFAULT_FRAME_SAMPLES,
    MAX_FRAME_SAMPLES, MIN_FRAME_SAMPLES, SampleBlock,
};
#[cfg(feature = "device-audio")]
pub use device::{DevicePlaybackSink, list_input_devices, open_default_microphone};
pub use pcm::{INPUT_MIME_TYPE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
pub use playback::{AudioPlaybackQueue, ClockedNullSink, PlaybackSink};
pub use resample::{BoxResampler, downmix_to_mono};

/// Errors from audio encoding and decoding.
#[derive(Debug, Error)]
pub enum AudioError {
    /// Payload could not be decoded into PCM16
    #[error("Audio decode failed: {0}")]
    Decode(String),

    /// Output device could not be opened
    #[error("Audio device error: {0}")]
    Device(String),
}

/// Fatal capture failure. Needs user action before capture can restart.
#[derive(Debug, Error)]
pub enum CaptureDeviceError {
    /// No default input device exists
    #[error("No input device available (devices: {available_devices:?})")]
    NoDevice { available_devices: Vec<String> },

    /// The device exists but could not be opened, including permission denial
    #[error("Input device unavailable: {reason} (devices: {available_devices:?})")]
    Unavailable {
        reason: String,
        available_devices: Vec<String>,
    },

    /// The device only offers a sample format capture cannot convert
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
}

impl CaptureDeviceError {
    /// Devices the user could pick instead.
    pub fn available_devices(&self) -> &[String] {
        match self {
            CaptureDeviceError::NoDevice { available_devices }
            | CaptureDeviceError::Unavailable {
                available_devices, ..
            } => available_devices,
            CaptureDeviceError::UnsupportedFormat(_) => &[],
        }
    }
}
