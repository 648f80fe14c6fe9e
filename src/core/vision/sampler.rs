use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};

use super::FrameError;
use crate::core::session::OutboundEnvelope;

pub const DEFAULT_VISION_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_JPEG_QUALITY: u8 = 70;
pub const DEFAULT_MAX_DIMENSION: u32 = 768;

const MIN_VISION_INTERVAL: Duration = Duration::from_millis(50);
const JPEG_MIME_TYPE: &str = "image/jpeg";

// =============================================================================
// Frame Sources
// =============================================================================

/// Something that can produce the current rendered view.
///
/// Called off the session loop on a blocking thread. Returning the same
/// `Arc` as the previous call means the view has not changed, and the last
/// encoding is reused.
pub trait FrameSource: Send {
    /// The current frame, or `Ok(None)` when the surface is not ready yet.
    fn capture(&mut self) -> Result<Option<Arc<DynamicImage>>, FrameError>;
}

/// A fixed image, e.g. the panorama asset for headless sessions.
pub struct StillImageSource {
    image: Arc<DynamicImage>,
}

impl StillImageSource {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, FrameError> {
        let image = image::open(path.as_ref())?;
        tracing::info!(
            path = %path.as_ref().display(),
            width = image.width(),
            height = image.height(),
            "Loaded still frame source"
        );
        Ok(Self::new(image))
    }
}

impl FrameSource for StillImageSource {
    fn capture(&mut self) -> Result<Option<Arc<DynamicImage>>, FrameError> {
        Ok(Some(self.image.clone()))
    }
}

/// Latest frame published by a renderer running elsewhere.
///
/// Clones share the same slot. The sampler reads whatever was published
/// last; an empty slot means the renderer has not produced anything yet.
#[derive(Clone, Default)]
pub struct FrameSlot {
    latest: Arc<Mutex<Option<Arc<DynamicImage>>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, image: DynamicImage) {
        *self.latest.lock() = Some(Arc::new(image));
    }

    pub fn clear(&self) {
        *self.latest.lock() = None;
    }

    pub fn is_ready(&self) -> bool {
        self.latest.lock().is_some()
    }
}

impl FrameSource for FrameSlot {
    fn capture(&mut self) -> Result<Option<Arc<DynamicImage>>, FrameError> {
        Ok(self.latest.lock().clone())
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Sampling cadence and encoding parameters.
#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub interval: Duration,
    /// JPEG quality, 1-100
    pub jpeg_quality: u8,
    /// Longest edge of the encoded frame. Larger frames are downscaled.
    pub max_dimension: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_VISION_INTERVAL,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// One encoded snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionFrame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl VisionFrame {
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.jpeg)
    }

    /// The realtime-input envelope carrying this frame.
    pub fn to_envelope(&self) -> OutboundEnvelope {
        OutboundEnvelope::VisionFrame {
            mime_type: JPEG_MIME_TYPE.to_string(),
            data: self.to_base64(),
        }
    }
}

/// Downscale to fit `max_dimension` and JPEG-encode.
pub fn encode_jpeg(
    image: &DynamicImage,
    max_dimension: u32,
    quality: u8,
) -> Result<VisionFrame, FrameError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(FrameError::Encode("empty frame".to_string()));
    }

    let max_dimension = max_dimension.max(1);
    let rgb = if width > max_dimension || height > max_dimension {
        image
            .resize(max_dimension, max_dimension, FilterType::Triangle)
            .to_rgb8()
    } else {
        image.to_rgb8()
    };
    let (width, height) = rgb.dimensions();

    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
    encoder
        .encode_image(&DynamicImage::ImageRgb8(rgb))
        .map_err(|e| FrameError::Encode(e.to_string()))?;

    Ok(VisionFrame {
        jpeg,
        width,
        height,
    })
}

// =============================================================================
// Sampler
// =============================================================================

type FrameJob = JoinHandle<Result<Option<VisionFrame>, FrameError>>;

/// Capture and encode state, moved onto a blocking thread for each tick.
struct FrameEncoder {
    source: Box<dyn FrameSource>,
    max_dimension: u32,
    jpeg_quality: u8,
    /// Last captured image and its encoding
    cached: Option<(Arc<DynamicImage>, VisionFrame)>,
}

impl FrameEncoder {
    fn sample(&mut self) -> Result<Option<VisionFrame>, FrameError> {
        let Some(image) = self.source.capture()? else {
            return Ok(None);
        };
        if let Some((last, frame)) = &self.cached
            && Arc::ptr_eq(last, &image)
        {
            return Ok(Some(frame.clone()));
        }

        let frame = encode_jpeg(&image, self.max_dimension, self.jpeg_quality)?;
        self.cached = Some((image, frame.clone()));
        Ok(Some(frame))
    }
}

/// Emits an encoded snapshot of the frame source on a fixed interval.
///
/// Capture, resize and encode run on the blocking pool, so the task awaiting
/// [`next_frame`](Self::next_frame) keeps serving its other inputs meanwhile.
pub struct VisionSampler {
    encoder: Arc<Mutex<FrameEncoder>>,
    config: VisionConfig,
    interval: Option<Interval>,
    /// Encode in flight; survives a cancelled `next_frame`
    job: Option<FrameJob>,
    stopped: bool,
    frames_sampled: u64,
}

impl VisionSampler {
    pub fn new(source: Box<dyn FrameSource>, config: VisionConfig) -> Self {
        let encoder = FrameEncoder {
            source,
            max_dimension: config.max_dimension,
            jpeg_quality: config.jpeg_quality,
            cached: None,
        };
        Self {
            encoder: Arc::new(Mutex::new(encoder)),
            config,
            interval: None,
            job: None,
            stopped: false,
            frames_sampled: 0,
        }
    }

    pub fn config(&self) -> &VisionConfig {
        &self.config
    }

    pub fn frames_sampled(&self) -> u64 {
        self.frames_sampled
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Capture and encode one frame on the calling thread.
    /// `Ok(None)` when the source is not ready.
    pub fn sample(&mut self) -> Result<Option<VisionFrame>, FrameError> {
        let frame = self.encoder.lock().sample()?;
        if frame.is_some() {
            self.frames_sampled += 1;
        }
        Ok(frame)
    }

    /// Wait for the next tick that yields a frame.
    ///
    /// Ticks where the source is not ready or encoding fails are logged and
    /// skipped. Returns `None` once stopped. Cancel-safe: an encode started
    /// by a dropped call is picked up by the next one.
    pub async fn next_frame(&mut self) -> Option<VisionFrame> {
        loop {
            if self.stopped {
                return None;
            }

            if self.job.is_none() {
                let period = self.config.interval.max(MIN_VISION_INTERVAL);
                let interval = self.interval.get_or_insert_with(|| {
                    let mut interval = tokio::time::interval(period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    interval
                });
                interval.tick().await;

                let encoder = self.encoder.clone();
                self.job = Some(tokio::task::spawn_blocking(move || encoder.lock().sample()));
            }
            let Some(job) = self.job.as_mut() else {
                continue;
            };

            let result = job.await;
            self.job = None;

            match result {
                Ok(Ok(Some(frame))) => {
                    self.frames_sampled += 1;
                    tracing::debug!(
                        width = frame.width,
                        height = frame.height,
                        bytes = frame.jpeg.len(),
                        "Vision frame sampled"
                    );
                    return Some(frame);
                }
                Ok(Ok(None)) => tracing::debug!("Frame source not ready, skipping vision tick"),
                Ok(Err(e)) => tracing::warn!("Vision frame skipped: {}", e),
                Err(e) => tracing::warn!("Vision encode task failed: {}", e),
            }
        }
    }

    /// Stop sampling. Later calls to [`next_frame`](Self::next_frame) return `None`.
    pub fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.interval = None;
            self.job = None;
            tracing::info!(frames = self.frames_sampled, "Vision sampler stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([40, 120, 200])))
    }

    struct Failing;

    impl FrameSource for Failing {
        fn capture(&mut self) -> Result<Option<Arc<DynamicImage>>, FrameError> {
            Err(FrameError::Source("surface lost".to_string()))
        }
    }

    /// Blocks its thread for `delay` on every capture.
    struct Slow {
        delay: Duration,
        image: Arc<DynamicImage>,
    }

    impl FrameSource for Slow {
        fn capture(&mut self) -> Result<Option<Arc<DynamicImage>>, FrameError> {
            std::thread::sleep(self.delay);
            Ok(Some(self.image.clone()))
        }
    }

    fn fast_config() -> VisionConfig {
        VisionConfig {
            interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    #[test]
    fn test_encode_produces_jpeg() {
        let frame = encode_jpeg(&solid(64, 32), 768, 80).unwrap();
        assert_eq!(&frame.jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!((frame.width, frame.height), (64, 32));
    }

    #[test]
    fn test_encode_downscales_preserving_aspect() {
        let frame = encode_jpeg(&solid(2048, 1024), 512, 70).unwrap();
        assert_eq!((frame.width, frame.height), (512, 256));
    }

    #[test]
    fn test_envelope_is_base64_jpeg() {
        let frame = encode_jpeg(&solid(8, 8), 768, 70).unwrap();
        match frame.to_envelope() {
            OutboundEnvelope::VisionFrame { mime_type, data } => {
                assert_eq!(mime_type, "image/jpeg");
                assert_eq!(BASE64.decode(data).unwrap(), frame.jpeg);
            }
            other => panic!("unexpected envelope: {}", other.kind()),
        }
    }

    #[test]
    fn test_empty_slot_is_not_ready() {
        let slot = FrameSlot::new();
        let mut sampler = VisionSampler::new(Box::new(slot.clone()), fast_config());
        assert!(sampler.sample().unwrap().is_none());

        slot.publish(solid(16, 16));
        assert!(slot.is_ready());
        assert!(sampler.sample().unwrap().is_some());
        assert_eq!(sampler.frames_sampled(), 1);
    }

    #[tokio::test]
    async fn test_next_frame_skips_until_ready() {
        let slot = FrameSlot::new();
        let mut sampler = VisionSampler::new(Box::new(slot.clone()), fast_config());

        let publisher = slot.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            publisher.publish(solid(16, 16));
        });

        let frame = tokio::time::timeout(Duration::from_secs(2), sampler.next_frame())
            .await
            .expect("sampler should produce a frame once the slot is filled");
        assert!(frame.is_some());
    }

    #[tokio::test]
    async fn test_failing_source_does_not_end_sampling() {
        let mut sampler = VisionSampler::new(Box::new(Failing), fast_config());
        let result = tokio::time::timeout(Duration::from_millis(200), sampler.next_frame()).await;
        assert!(result.is_err(), "failing ticks are skipped, not surfaced");
        assert!(!sampler.is_stopped());
    }

    #[tokio::test]
    async fn test_stopped_sampler_yields_none() {
        let mut sampler =
            VisionSampler::new(Box::new(StillImageSource::new(solid(8, 8))), fast_config());
        assert!(sampler.next_frame().await.is_some());
        sampler.stop();
        sampler.stop();
        assert!(sampler.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_source_does_not_block_the_caller() {
        let source = Slow {
            delay: Duration::from_millis(300),
            image: Arc::new(solid(64, 64)),
        };
        let mut sampler = VisionSampler::new(Box::new(source), fast_config());
        let mut ticker = tokio::time::interval(Duration::from_millis(10));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut ticks = 0;
        let frame = loop {
            tokio::select! {
                frame = sampler.next_frame() => break frame,
                _ = ticker.tick() => ticks += 1,
            }
        };

        assert!(frame.is_some());
        assert_eq!(sampler.frames_sampled(), 1);
        assert!(ticks >= 10, "caller stalled while encoding: {ticks} ticks");
    }

    #[test]
    fn test_still_source_encoded_once() {
        let mut sampler =
            VisionSampler::new(Box::new(StillImageSource::new(solid(2048, 1024))), fast_config());
        let first = sampler.sample().unwrap().unwrap();
        let cached = sampler.encoder.lock().cached.as_ref().map(|(image, _)| image.clone());

        let second = sampler.sample().unwrap().unwrap();
        assert_eq!(first, second);
        let still_cached = sampler.encoder.lock().cached.as_ref().map(|(image, _)| image.clone());
        assert!(Arc::ptr_eq(&cached.unwrap(), &still_cached.unwrap()));
        assert_eq!(sampler.frames_sampled(), 2);
    }

    #[test]
    fn test_new_publish_is_reencoded() {
        let slot = FrameSlot::new();
        let mut sampler = VisionSampler::new(Box::new(slot.clone()), fast_config());

        slot.publish(solid(16, 16));
        let small = sampler.sample().unwrap().unwrap();
        slot.publish(solid(32, 16));
        let wide = sampler.sample().unwrap().unwrap();
        assert_eq!((small.width, small.height), (16, 16));
        assert_eq!((wide.width, wide.height), (32, 16));
    }
}
