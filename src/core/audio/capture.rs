use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::pcm::{self, INPUT_MIME_TYPE, INPUT_SAMPLE_RATE};
use super::resample::{BoxResampler, downmix_to_mono};

/// Smallest input buffer that forms one outbound frame.
pub const MIN_FRAME_SAMPLES: usize = 2048;
/// Largest input buffer that forms one outbound frame.
pub const MAX_FRAME_SAMPLES: usize = 4096;
pub const DEFAULT_FRAME_SAMPLES: usize = 4096;

/// Bounded so a stalled consumer applies backpressure instead of growing memory.
const FRAME_CHANNEL_CAPACITY: usize = 32;

// =============================================================================
// Types
// =============================================================================

/// Raw interleaved samples as delivered by an input device.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// One outbound chunk of mono PCM16 at the capture target rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioFrame {
    /// Transport encoding of the samples.
    pub fn to_base64(&self) -> String {
        pcm::encode_base64(&self.samples)
    }

    pub fn mime_type(&self) -> String {
        if self.sample_rate == INPUT_SAMPLE_RATE {
            INPUT_MIME_TYPE.to_string()
        } else {
            format!("audio/pcm;rate={}", self.sample_rate)
        }
    }
}

/// Capture framing parameters.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Input samples (per channel) accumulated before a frame is emitted
    pub frame_samples: usize,
    /// Output rate of emitted frames
    pub target_rate: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_samples: DEFAULT_FRAME_SAMPLES,
            target_rate: INPUT_SAMPLE_RATE,
        }
    }
}

impl CaptureConfig {
    /// Frame size clamped into the supported buffer range.
    pub fn with_frame_samples(frame_samples: usize) -> Self {
        Self {
            frame_samples: frame_samples.clamp(MIN_FRAME_SAMPLES, MAX_FRAME_SAMPLES),
            ..Default::default()
        }
    }
}

// =============================================================================
// Framer
// =============================================================================

/// Turns device blocks of arbitrary size into fixed-cadence frames.
///
/// A frame is cut every `frame_samples` input samples, then resampled, so
/// the emission cadence follows the device clock.
#[derive(Debug)]
pub struct AudioFramer {
    config: CaptureConfig,
    resampler: Option<BoxResampler>,
    pending: Vec<f32>,
}

impl AudioFramer {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            pending: Vec::with_capacity(config.frame_samples * 2),
            config,
            resampler: None,
        }
    }

    /// Feed one block and collect every frame it completes.
    pub fn push(&mut self, block: &SampleBlock) -> Vec<AudioFrame> {
        let rate_changed = self
            .resampler
            .as_ref()
            .is_none_or(|rs| rs.input_rate() != block.sample_rate);
        if rate_changed {
            if self.resampler.is_some() {
                tracing::debug!(
                    sample_rate = block.sample_rate,
                    "Capture rate changed, discarding partial frame"
                );
            }
            self.resampler = Some(BoxResampler::new(block.sample_rate, self.config.target_rate));
            self.pending.clear();
        }

        self.pending
            .extend(downmix_to_mono(&block.samples, block.channels as usize));

        let mut frames = Vec::new();
        let Some(resampler) = self.resampler.as_mut() else {
            return frames;
        };
        while self.pending.len() >= self.config.frame_samples {
            let chunk: Vec<f32> = self.pending.drain(..self.config.frame_samples).collect();
            let resampled = resampler.process(&chunk);
            frames.push(AudioFrame {
                samples: resampled.into_iter().map(pcm::f32_to_i16).collect(),
                sample_rate: self.config.target_rate,
            });
        }
        frames
    }
}

// =============================================================================
// Capture Stream
// =============================================================================

/// Running capture producing [`AudioFrame`]s.
///
/// Dropping the stream or calling [`stop`](Self::stop) ends capture. The
/// device side observes the same cancellation token.
pub struct AudioCaptureStream {
    frames: mpsc::Receiver<AudioFrame>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    device_name: String,
}

impl AudioCaptureStream {
    /// Frame blocks arriving on `blocks`.
    ///
    /// Device backends push into the sender end. Tests and headless clients
    /// can do the same with synthetic audio.
    pub fn from_blocks(
        device_name: impl Into<String>,
        mut blocks: mpsc::Receiver<SampleBlock>,
        config: CaptureConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let task_cancel = cancel.clone();
        let device_name = device_name.into();
        let log_name = device_name.clone();

        let task = tokio::spawn(async move {
            let mut framer = AudioFramer::new(config);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    block = blocks.recv() => {
                        let Some(block) = block else { break };
                        for frame in framer.push(&block) {
                            if tx.send(frame).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            tracing::debug!(device = %log_name, "Audio capture framing stopped");
        });

        Self {
            frames: rx,
            cancel,
            task: Some(task),
            device_name,
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Next frame, or `None` once capture has stopped.
    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.frames.recv().await
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop capture. Safe to call more than once.
    pub fn stop(&mut self) {
        if self.cancel.is_cancelled() && self.task.is_none() {
            return;
        }
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.frames.close();
        tracing::info!(device = %self.device_name, "Audio capture stopped");
    }
}

impl Drop for AudioCaptureStream {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
