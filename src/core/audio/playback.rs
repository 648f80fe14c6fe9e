use std::time::Instant;

use super::AudioError;
use super::pcm;

/// Audio output that plays sample buffers at scheduled times.
///
/// Times are seconds on the sink's own clock.
pub trait PlaybackSink: Send {
    /// Current position of the output clock.
    fn current_time(&self) -> f64;

    /// Play `samples` starting at `start_at`.
    fn schedule(&mut self, samples: Vec<f32>, sample_rate: u32, start_at: f64);

    /// Stop every scheduled and playing buffer.
    fn stop_all(&mut self);
}

/// Gapless scheduler for agent audio.
///
/// Each chunk starts where the previous one ends, or immediately when the
/// queue has drained. An interruption flushes everything and resets the
/// scheduling clock so the next turn starts without delay.
pub struct AudioPlaybackQueue {
    sink: Box<dyn PlaybackSink>,
    next_start: f64,
    /// (start, end) of buffers that may still be audible
    segments: Vec<(f64, f64)>,
}

impl AudioPlaybackQueue {
    pub fn new(sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            sink,
            next_start: 0.0,
            segments: Vec::new(),
        }
    }

    /// Decode and schedule one base64 PCM16 chunk. Returns its start time.
    pub fn enqueue_base64(&mut self, data: &str, sample_rate: u32) -> Result<f64, AudioError> {
        let samples = pcm::decode_base64(data)?;
        Ok(self.enqueue_pcm(&samples, sample_rate))
    }

    /// Schedule decoded PCM16 samples. Returns their start time.
    pub fn enqueue_pcm(&mut self, samples: &[i16], sample_rate: u32) -> f64 {
        let now = self.sink.current_time();
        self.prune(now);

        if samples.is_empty() || sample_rate == 0 {
            return self.next_start.max(now);
        }

        let start = self.next_start.max(now);
        let duration = samples.len() as f64 / sample_rate as f64;
        let floats = samples.iter().copied().map(pcm::i16_to_f32).collect();

        self.sink.schedule(floats, sample_rate, start);
        self.segments.push((start, start + duration));
        self.next_start = start + duration;

        tracing::trace!(start, duration, "Scheduled playback chunk");
        start
    }

    /// Stop all audio and reset the clock. Safe to repeat.
    pub fn flush(&mut self) {
        self.sink.stop_all();
        self.segments.clear();
        self.next_start = 0.0;
    }

    /// Buffers scheduled but not yet finished.
    pub fn pending_chunks(&self) -> usize {
        let now = self.sink.current_time();
        self.segments.iter().filter(|(_, end)| *end > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_chunks() == 0
    }

    /// Time at which the last scheduled buffer ends.
    pub fn scheduled_until(&self) -> f64 {
        self.next_start
    }

    fn prune(&mut self, now: f64) {
        self.segments.retain(|(_, end)| *end > now);
    }
}

/// Sink with a wall clock that discards samples.
///
/// Used when no output device is available, so scheduling and interruption
/// still behave as they would against real hardware.
pub struct ClockedNullSink {
    epoch: Instant,
}

impl ClockedNullSink {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for ClockedNullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackSink for ClockedNullSink {
    fn current_time(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, _samples: Vec<f32>, _sample_rate: u32, _start_at: f64) {}

    fn stop_all(&mut self) {}
}
