//! Streaming sample-rate conversion.
//!
//! Decimation uses a box filter: every output sample is the mean of the
//! input window it covers. Window boundaries fall on fractional input
//! positions for non-integer ratios (44.1 kHz → 16 kHz), so the residual
//! phase is carried from one call to the next and frame edges never drop
//! or duplicate input.

/// Stateful box-filter resampler for mono `f32` audio.
#[derive(Debug, Clone)]
pub struct BoxResampler {
    input_rate: u32,
    output_rate: u32,
    /// Input samples per output sample
    ratio: f64,
    sum: f32,
    count: usize,
    /// Input samples still needed to close the current window (downsampling)
    /// or fractional output owed (upsampling)
    phase: f64,
}

impl BoxResampler {
    /// Create a resampler between two non-zero rates.
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        let input_rate = input_rate.max(1);
        let output_rate = output_rate.max(1);
        let ratio = input_rate as f64 / output_rate as f64;
        Self {
            input_rate,
            output_rate,
            ratio,
            sum: 0.0,
            count: 0,
            phase: if ratio >= 1.0 { ratio } else { 0.0 },
        }
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Resample one block, appending to `out`.
    pub fn process_into(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.input_rate == self.output_rate {
            out.extend_from_slice(input);
            return;
        }

        if self.ratio > 1.0 {
            out.reserve((input.len() as f64 / self.ratio) as usize + 1);
            for &sample in input {
                self.sum += sample;
                self.count += 1;
                self.phase -= 1.0;
                if self.phase <= 0.0 {
                    out.push(self.sum / self.count as f32);
                    self.sum = 0.0;
                    self.count = 0;
                    self.phase += self.ratio;
                }
            }
        } else {
            // Upsampling holds each input sample for its share of output slots.
            let per_input = 1.0 / self.ratio;
            out.reserve((input.len() as f64 * per_input) as usize + 1);
            for &sample in input {
                self.phase += per_input;
                while self.phase >= 1.0 {
                    out.push(sample);
                    self.phase -= 1.0;
                }
            }
        }
    }

    /// Resample one block into a fresh buffer.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        self.process_into(input, &mut out);
        out
    }

    /// Drop any partially accumulated window.
    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
        self.phase = if self.ratio >= 1.0 { self.ratio } else { 0.0 };
    }
}

/// Average interleaved multi-channel frames down to mono.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
