use crate::config::NormalizerConfig;
use crate::error::{Error, Result};
use crate::media::MediaKind;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, GenericImageView};
use tracing::{debug, instrument};

/// Content type of every re-encoded image
pub const NORMALIZED_CONTENT_TYPE: &str = "image/jpeg";

/// Normalizer settings, decoupled from the config loader
#[derive(Debug, Clone)]
pub struct NormalizerSettings {
    pub passthrough_threshold_bytes: usize,
    pub max_dimension: u32,
    pub jpeg_quality: u8,
}

impl From<&NormalizerConfig> for NormalizerSettings {
    fn from(config: &NormalizerConfig) -> Self {
        Self {
            passthrough_threshold_bytes: config.passthrough_threshold_bytes,
            max_dimension: config.max_dimension,
            jpeg_quality: config.jpeg_quality,
        }
    }
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self::from(&NormalizerConfig::default())
    }
}

/// A binary ready for the partitioner
#[derive(Debug, Clone)]
pub struct NormalizedMedia {
    pub kind: MediaKind,
    pub bytes: Bytes,
    /// Content type of `bytes` (the declared type when passed through)
    pub content_type: String,
    /// Whether the input was decoded and re-encoded
    pub reencoded: bool,
}

/// Asset normalizer. Validates the declared media type; large photos are
/// downsized and re-encoded, small photos and all videos pass through.
/// Pure and synchronous; callers on an async runtime should run it on a
/// blocking thread.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    settings: NormalizerSettings,
}

impl Normalizer {
    pub fn new(settings: NormalizerSettings) -> Self {
        Self { settings }
    }

    /// Validate and normalize an uploaded binary
    #[instrument(skip(self, binary), fields(size_bytes = binary.len()))]
    pub fn normalize(
        &self,
        binary: Bytes,
        declared_type: &str,
        kind: MediaKind,
    ) -> Result<NormalizedMedia> {
        if !kind.accepts(declared_type) {
            return Err(Error::InvalidMediaType {
                expected: kind.expected_family(),
                declared: declared_type.to_string(),
            });
        }

        let declared_type = declared_type.trim().to_ascii_lowercase();

        // No transcoding for video
        if kind == MediaKind::Video {
            return Ok(NormalizedMedia {
                kind,
                bytes: binary,
                content_type: declared_type,
                reencoded: false,
            });
        }

        if binary.len() < self.settings.passthrough_threshold_bytes {
            debug!("Image below threshold, passing through");
            return Ok(NormalizedMedia {
                kind,
                bytes: binary,
                content_type: declared_type,
                reencoded: false,
            });
        }

        let img = image::load_from_memory(&binary).map_err(|e| Error::Decode(e.to_string()))?;
        let (width, height) = img.dimensions();
        let (target_width, target_height) =
            fit_within(width, height, self.settings.max_dimension);

        let resized = if (target_width, target_height) == (width, height) {
            img
        } else {
            img.resize_exact(target_width, target_height, FilterType::Triangle)
        };

        let encoded = encode_jpeg(&resized, self.settings.jpeg_quality)?;

        debug!(
            original_width = width,
            original_height = height,
            width = target_width,
            height = target_height,
            original_bytes = binary.len(),
            encoded_bytes = encoded.len(),
            "Image re-encoded"
        );

        Ok(NormalizedMedia {
            kind,
            bytes: Bytes::from(encoded),
            content_type: NORMALIZED_CONTENT_TYPE.to_string(),
            reencoded: true,
        })
    }
}

/// Scale dimensions down so neither edge exceeds `max`, keeping the aspect
/// ratio. Dimensions already within bounds are returned unchanged.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    let max = max.max(1);
    if width <= max && height <= max {
        return (width, height);
    }

    let scale = max as f64 / width.max(height) as f64;
    let scaled = |edge: u32| ((edge as f64 * scale).round() as u32).clamp(1, max);

    (scaled(width), scaled(height))
}

/// Encode an image as baseline JPEG at the given quality
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();

    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(|e| Error::Decode(format!("JPEG encoding failed: {e}")))?;

    Ok(buf)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;

    /// Gradient-with-noise test image encoded in the given format
    pub(crate) fn synth_image(width: u32, height: u32, format: ImageOutputFormat) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            let noise = ((x.wrapping_mul(7919) ^ y.wrapping_mul(104729)) % 64) as u8;
            Rgb([
                ((x * 255) / width.max(1)) as u8 ^ noise,
                ((y * 255) / height.max(1)) as u8,
                noise.wrapping_mul(3),
            ])
        });

        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), format)
            .unwrap();
        buf
    }

    #[test]
    fn test_fit_within_landscape() {
        assert_eq!(fit_within(3000, 2000, 1200), (1200, 800));
    }

    #[test]
    fn test_fit_within_portrait() {
        assert_eq!(fit_within(1000, 4000, 1200), (300, 1200));
    }

    #[test]
    fn test_fit_within_keeps_small_dimensions() {
        assert_eq!(fit_within(800, 600, 1200), (800, 600));
        assert_eq!(fit_within(1200, 1200, 1200), (1200, 1200));
    }

    #[test]
    fn test_fit_within_extreme_ratio_never_zero() {
        assert_eq!(fit_within(100_000, 10, 1200), (1200, 1));
    }

    #[test]
    fn test_zero_max_dimension_does_not_panic() {
        assert_eq!(fit_within(100, 50, 0), (1, 1));

        let normalizer = Normalizer::new(NormalizerSettings {
            passthrough_threshold_bytes: 0,
            max_dimension: 0,
            ..Default::default()
        });
        let out = normalizer
            .normalize(
                Bytes::from(synth_image(40, 20, ImageOutputFormat::Png)),
                "image/png",
                MediaKind::Photo,
            )
            .unwrap();
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (1, 1));
    }

    #[test]
    fn test_rejects_wrong_family() {
        let normalizer = Normalizer::default();

        let err = normalizer
            .normalize(Bytes::from_static(b"abc"), "video/mp4", MediaKind::Photo)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMediaType { expected: "image/*", .. }));

        let err = normalizer
            .normalize(Bytes::from_static(b"abc"), "image/png", MediaKind::Video)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMediaType { expected: "video/*", .. }));
    }

    #[test]
    fn test_small_image_passes_through_unchanged() {
        let normalizer = Normalizer::default();
        let input = synth_image(200, 200, ImageOutputFormat::Png);
        assert!(input.len() < 2 * 1024 * 1024);

        let out = normalizer
            .normalize(Bytes::from(input.clone()), "image/png", MediaKind::Photo)
            .unwrap();

        assert_eq!(out.bytes.as_ref(), input.as_slice());
        assert_eq!(out.content_type, "image/png");
        assert!(!out.reencoded);
    }

    #[test]
    fn test_large_image_is_resized_with_aspect_ratio() {
        let normalizer = Normalizer::default();
        let input = synth_image(3000, 2000, ImageOutputFormat::Bmp);
        assert!(input.len() > 2 * 1024 * 1024);

        let out = normalizer
            .normalize(Bytes::from(input), "image/bmp", MediaKind::Photo)
            .unwrap();
        assert!(out.reencoded);
        assert_eq!(out.content_type, NORMALIZED_CONTENT_TYPE);

        let decoded = image::load_from_memory(&out.bytes).unwrap();
        let (w, h) = decoded.dimensions();
        assert!(w.max(h) <= 1200);
        let ratio = w as f64 / h as f64;
        assert!((ratio - 1.5).abs() < 0.01, "aspect ratio drifted: {ratio}");
    }

    #[test]
    fn test_large_image_within_bounds_is_reencoded_at_same_size() {
        let normalizer = Normalizer::new(NormalizerSettings {
            passthrough_threshold_bytes: 1024,
            ..Default::default()
        });
        let input = synth_image(400, 300, ImageOutputFormat::Bmp);

        let out = normalizer
            .normalize(Bytes::from(input), "image/bmp", MediaKind::Photo)
            .unwrap();

        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!(decoded.dimensions(), (400, 300));
    }

    #[test]
    fn test_undecodable_large_image_fails() {
        let normalizer = Normalizer::default();
        let garbage = vec![0xABu8; 3 * 1024 * 1024];

        let err = normalizer
            .normalize(Bytes::from(garbage), "image/jpeg", MediaKind::Photo)
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_video_is_passed_through() {
        let normalizer = Normalizer::default();
        let payload = Bytes::from(vec![7u8; 3 * 1024 * 1024]);

        let out = normalizer
            .normalize(payload.clone(), "video/mp4", MediaKind::Video)
            .unwrap();
        assert_eq!(out.bytes, payload);
        assert_eq!(out.content_type, "video/mp4");
    }
}
