//! PCM16 sample conversion and transport encoding.
//!
//! Audio crosses the wire as base64-encoded, mono, little-endian signed
//! 16-bit PCM. Everything upstream of the encoder works in `f32` in the
//! range `[-1.0, 1.0]`.

use base64::prelude::*;

use super::AudioError;

/// Outbound capture rate expected by the agent.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Rate of audio produced by the agent when the mime type carries no rate.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Mime type for outbound microphone chunks.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Convert a float sample to PCM16, clamping out-of-range input.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Convert a PCM16 sample to float.
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / 32768.0
    } else {
        sample as f32 / 32767.0
    }
}

/// Serialize PCM16 samples as little-endian bytes.
pub fn samples_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    bytes
}

/// Parse little-endian bytes into PCM16 samples.
///
/// A trailing odd byte cannot form a sample and is rejected.
pub fn le_bytes_to_samples(bytes: &[u8]) -> Result<Vec<i16>, AudioError> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::Decode(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode PCM16 samples for transport.
pub fn encode_base64(samples: &[i16]) -> String {
    BASE64_STANDARD.encode(samples_to_le_bytes(samples))
}

/// Decode a transport payload back into PCM16 samples.
pub fn decode_base64(data: &str) -> Result<Vec<i16>, AudioError> {
    let bytes = BASE64_STANDARD
        .decode(data)
        .map_err(|e| AudioError::Decode(format!("invalid base64 audio: {e}")))?;
    le_bytes_to_samples(&bytes)
}

/// Extract the sample rate from a mime type like `audio/pcm;rate=24000`.
pub fn rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("rate="))
        .and_then(|rate| rate.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_round_trip_is_lossless() {
        let samples: Vec<i16> = vec![i16::MIN, -12345, -1, 0, 1, 255, 256, 12345, i16::MAX];
        let encoded = encode_base64(&samples);
        assert_eq!(decode_base64(&encoded).unwrap(), samples);
    }

    #[test]
    fn test_little_endian_layout() {
        assert_eq!(samples_to_le_bytes(&[0x0102]), vec![0x02, 0x01]);
        assert_eq!(le_bytes_to_samples(&[0xff, 0x7f]).unwrap(), vec![i16::MAX]);
    }

    #[test]
    fn test_odd_length_payload_rejected() {
        assert!(matches!(
            le_bytes_to_samples(&[1, 2, 3]),
            Err(AudioError::Decode(_))
        ));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        assert!(decode_base64("not base64!!").is_err());
    }

    #[test]
    fn test_float_conversion_clamps() {
        assert_eq!(f32_to_i16(2.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), i16::MIN);
        assert_eq!(f32_to_i16(0.0), 0);
        assert!((i16_to_f32(i16::MAX) - 1.0).abs() < f32::EPSILON);
        assert!((i16_to_f32(i16::MIN) + 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rate_from_mime() {
        assert_eq!(rate_from_mime("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(rate_from_mime("audio/pcm; rate=16000"), Some(16000));
        assert_eq!(rate_from_mime("audio/pcm"), None);
        assert_eq!(rate_from_mime("audio/pcm;rate=abc"), None);
    }
}
