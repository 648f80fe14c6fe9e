//! Host audio devices through cpal.
//!
//! cpal streams are not `Send`, so each one lives on a dedicated thread
//! that reports the open result once over a oneshot channel and then parks
//! until the owning handle is cancelled.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::capture::{AudioCaptureStream, CaptureConfig, SampleBlock};
use super::pcm;
use super::playback::PlaybackSink;
use super::resample::BoxResampler;
use super::{AudioError, CaptureDeviceError};

const BLOCK_CHANNEL_CAPACITY: usize = 64;
const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Names of every input device the default host exposes.
#[allow(deprecated)]
pub fn list_input_devices() -> Vec<String> {
    match cpal::default_host().input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to enumerate input devices");
            Vec::new()
        }
    }
}

fn unavailable(reason: impl std::fmt::Display) -> CaptureDeviceError {
    CaptureDeviceError::Unavailable {
        reason: reason.to_string(),
        available_devices: list_input_devices(),
    }
}

fn stream_error(err: cpal::StreamError) {
    tracing::error!(error = %err, "Audio stream error");
}

// =============================================================================
// Microphone
// =============================================================================

/// Open the default microphone and start capturing.
///
/// Resolves once the device is running or has definitively failed. A
/// missing device or a permission denial is reported with the list of
/// devices the user could choose instead.
pub async fn open_default_microphone(
    config: CaptureConfig,
) -> Result<AudioCaptureStream, CaptureDeviceError> {
    let cancel = CancellationToken::new();
    let (block_tx, block_rx) = mpsc::channel(BLOCK_CHANNEL_CAPACITY);
    let (ready_tx, ready_rx) = oneshot::channel();
    let thread_cancel = cancel.clone();

    std::thread::Builder::new()
        .name("livescape-mic".to_string())
        .spawn(move || {
            let stream = match build_input_stream(block_tx) {
                Ok((stream, name)) => {
                    let _ = ready_tx.send(Ok(name));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            while !thread_cancel.is_cancelled() {
                std::thread::sleep(DEVICE_POLL_INTERVAL);
            }
            drop(stream);
        })
        .map_err(unavailable)?;

    let device_name = ready_rx
        .await
        .map_err(|_| unavailable("capture thread exited before opening the device"))??;

    tracing::info!(device = %device_name, "Microphone capture started");
    Ok(AudioCaptureStream::from_blocks(
        device_name,
        block_rx,
        config,
        cancel,
    ))
}

#[allow(deprecated)]
fn build_input_stream(
    blocks: mpsc::Sender<SampleBlock>,
) -> Result<(cpal::Stream, String), CaptureDeviceError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureDeviceError::NoDevice {
            available_devices: list_input_devices(),
        })?;
    let name = device
        .name()
        .unwrap_or_else(|_| "default input".to_string());

    let supported = device.default_input_config().map_err(unavailable)?;
    let sample_rate: u32 = supported.sample_rate();
    let channels = supported.channels();
    let stream_config: cpal::StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                push_block(&blocks, data.to_vec(), sample_rate, channels);
            },
            stream_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let samples = data.iter().copied().map(pcm::i16_to_f32).collect();
                push_block(&blocks, samples, sample_rate, channels);
            },
            stream_error,
            None,
        ),
        other => {
            return Err(CaptureDeviceError::UnsupportedFormat(format!("{other:?}")));
        }
    }
    .map_err(unavailable)?;

    stream.play().map_err(unavailable)?;
    Ok((stream, name))
}

fn push_block(tx: &mpsc::Sender<SampleBlock>, samples: Vec<f32>, sample_rate: u32, channels: u16) {
    // Never block the device callback.
    if tx
        .try_send(SampleBlock {
            samples,
            sample_rate,
            channels,
        })
        .is_err()
    {
        tracing::trace!("Capture consumer behind, dropping block");
    }
}

// =============================================================================
// Speaker
// =============================================================================

struct OutputBuffer {
    queue: VecDeque<f32>,
    played_frames: u64,
}

/// [`PlaybackSink`] backed by the default output device.
///
/// The output clock counts frames the device has consumed, including
/// silence, so scheduled start times map directly onto buffer offsets.
pub struct DevicePlaybackSink {
    shared: Arc<Mutex<OutputBuffer>>,
    device_rate: u32,
    cancel: CancellationToken,
}

impl DevicePlaybackSink {
    pub async fn open_default() -> Result<Self, AudioError> {
        let shared = Arc::new(Mutex::new(OutputBuffer {
            queue: VecDeque::new(),
            played_frames: 0,
        }));
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_shared = shared.clone();
        let thread_cancel = cancel.clone();
        std::thread::Builder::new()
            .name("livescape-speaker".to_string())
            .spawn(move || {
                let stream = match build_output_stream(thread_shared) {
                    Ok((stream, rate)) => {
                        let _ = ready_tx.send(Ok(rate));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                while !thread_cancel.is_cancelled() {
                    std::thread::sleep(DEVICE_POLL_INTERVAL);
                }
                drop(stream);
            })
            .map_err(|e| AudioError::Device(e.to_string()))?;

        let device_rate = ready_rx
            .await
            .map_err(|_| AudioError::Device("playback thread exited".to_string()))??;

        tracing::info!(sample_rate = device_rate, "Speaker playback started");
        Ok(Self {
            shared,
            device_rate,
            cancel,
        })
    }
}

fn build_output_stream(
    shared: Arc<Mutex<OutputBuffer>>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::Device("No output device available".to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    let sample_rate: u32 = supported.sample_rate();
    let channels = supported.channels() as usize;
    let stream_config: cpal::StreamConfig = supported.config();

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut buf = shared.lock();
                for frame in data.chunks_mut(channels) {
                    let sample = buf.queue.pop_front().unwrap_or(0.0);
                    frame.fill(sample);
                    buf.played_frames += 1;
                }
            },
            stream_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let mut buf = shared.lock();
                for frame in data.chunks_mut(channels) {
                    let sample = pcm::f32_to_i16(buf.queue.pop_front().unwrap_or(0.0));
                    frame.fill(sample);
                    buf.played_frames += 1;
                }
            },
            stream_error,
            None,
        ),
        other => {
            return Err(AudioError::Device(format!(
                "Unsupported output format {other:?}"
            )));
        }
    }
    .map_err(|e| AudioError::Device(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::Device(e.to_string()))?;
    Ok((stream, sample_rate))
}

impl PlaybackSink for DevicePlaybackSink {
    fn current_time(&self) -> f64 {
        self.shared.lock().played_frames as f64 / self.device_rate as f64
    }

    fn schedule(&mut self, samples: Vec<f32>, sample_rate: u32, start_at: f64) {
        let converted = BoxResampler::new(sample_rate, self.device_rate).process(&samples);

        let mut buf = self.shared.lock();
        let queue_end =
            (buf.played_frames + buf.queue.len() as u64) as f64 / self.device_rate as f64;
        if start_at > queue_end {
            let gap = ((start_at - queue_end) * self.device_rate as f64) as usize;
            buf.queue.extend(std::iter::repeat_n(0.0, gap));
        }
        buf.queue.extend(converted);
    }

    fn stop_all(&mut self) {
        self.shared.lock().queue.clear();
    }
}

impl Drop for DevicePlaybackSink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
