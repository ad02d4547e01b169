//! Image preparation before upload and reverse search
//!
//! **Upload** (`prepare_upload`, driven by `[upload_media]`):
//! - PNGs larger than `convert_threshold` bytes are re-encoded as JPEG
//! - images with more than `shrink_threshold` pixels are scaled down to fit
//!   `shrink_dimensions`, keeping the aspect ratio and the original format
//!   unless converted
//!
//! **Search** (`shrink_for_search`): images over 2 MB are scaled to fit
//! 1000x1000 and sent as JPEG so reverse-search services accept them.
//!
//! Only still PNG, JPEG, WebP and BMP content is touched; GIFs and videos
//! pass through unchanged. Decoding is CPU-bound: async callers run these
//! functions on the blocking pool.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;

use crate::config::UploadConfig;

/// Images above this size are downscaled before reverse search
pub const SEARCH_SIZE_LIMIT: usize = 2_000_000;
const SEARCH_MAX_DIMENSION: u32 = 1000;
const SEARCH_JPEG_QUALITY: u8 = 75;

#[derive(Debug, Error)]
pub enum ImagePrepError {
    #[error("Could not decode image: {0}")]
    Decode(String),

    #[error("Could not encode image: {0}")]
    Encode(String),
}

/// Upload conversion settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagePrepOptions {
    pub convert_to_jpg: bool,
    pub convert_threshold: u64,
    pub convert_quality: u8,
    pub shrink: bool,
    pub shrink_threshold: u64,
    pub shrink_dimensions: [u32; 2],
}

impl Default for ImagePrepOptions {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

impl ImagePrepOptions {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            convert_to_jpg: config.convert_to_jpg,
            convert_threshold: config.convert_threshold,
            convert_quality: config.convert_quality,
            shrink: config.shrink,
            shrink_threshold: config.shrink_threshold,
            shrink_dimensions: config.shrink_dimensions,
        }
    }

    pub fn is_active(&self) -> bool {
        self.convert_to_jpg || self.shrink
    }
}

/// Re-encoded content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    pub bytes: Vec<u8>,
    /// Extension of the new encoding ("jpg", "png", ...)
    pub extension: &'static str,
}

fn still_format(bytes: &[u8]) -> Option<ImageFormat> {
    match image::guess_format(bytes) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP | ImageFormat::Bmp)) => Some(format),
        _ => None,
    }
}

fn extension_of(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Jpeg => "jpg",
        ImageFormat::WebP => "webp",
        _ => "bmp",
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, ImagePrepError> {
    image::load_from_memory(bytes).map_err(|e| ImagePrepError::Decode(e.to_string()))
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImagePrepError> {
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))
        .map_err(|e| ImagePrepError::Encode(e.to_string()))?;
    Ok(buffer)
}

fn encode_as(img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, ImagePrepError> {
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), format)
        .map_err(|e| ImagePrepError::Encode(e.to_string()))?;
    Ok(buffer)
}

/// Scale down to fit `max_width` x `max_height`; never scales up
fn fit_within(img: DynamicImage, max_width: u32, max_height: u32) -> (DynamicImage, bool) {
    if img.width() <= max_width && img.height() <= max_height {
        return (img, false);
    }
    (img.thumbnail(max_width, max_height), true)
}

/// Convert and/or shrink `bytes` for upload
///
/// Returns `Ok(None)` when nothing applies and the original bytes should be
/// sent as they are.
pub fn prepare_upload(bytes: &[u8], options: &ImagePrepOptions) -> Result<Option<PreparedImage>, ImagePrepError> {
    if !options.is_active() {
        return Ok(None);
    }
    let Some(format) = still_format(bytes) else {
        return Ok(None);
    };

    let convert = options.convert_to_jpg && format == ImageFormat::Png && bytes.len() as u64 > options.convert_threshold;
    if !convert && !options.shrink {
        return Ok(None);
    }

    let mut img = decode(bytes)?;
    let mut shrunk = false;
    let pixels = u64::from(img.width()) * u64::from(img.height());
    if options.shrink && pixels > options.shrink_threshold {
        let [max_width, max_height] = options.shrink_dimensions;
        (img, shrunk) = fit_within(img, max_width, max_height);
    }

    if convert {
        tracing::debug!(size = bytes.len(), threshold = options.convert_threshold, shrunk, "Converting to JPEG");
        return Ok(Some(PreparedImage {
            bytes: encode_jpeg(&img, options.convert_quality)?,
            extension: "jpg",
        }));
    }
    if shrunk {
        tracing::debug!(pixels, width = img.width(), height = img.height(), "Shrunk image");
        return Ok(Some(PreparedImage {
            bytes: encode_as(&img, format)?,
            extension: extension_of(format),
        }));
    }
    Ok(None)
}

/// Smaller JPEG copy of a large image for reverse search
///
/// `Ok(None)` for content at or below [`SEARCH_SIZE_LIMIT`] and for
/// anything that is not a still image.
pub fn shrink_for_search(bytes: &[u8]) -> Result<Option<Vec<u8>>, ImagePrepError> {
    if bytes.len() <= SEARCH_SIZE_LIMIT || still_format(bytes).is_none() {
        return Ok(None);
    }
    let (img, _) = fit_within(decode(bytes)?, SEARCH_MAX_DIMENSION, SEARCH_MAX_DIMENSION);
    encode_jpeg(&img, SEARCH_JPEG_QUALITY).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 40])));
        encode_as(&img, ImageFormat::Png).unwrap()
    }

    /// Noise compresses badly, so a modest size still exceeds 2 MB as PNG
    fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let mut state = 0x2545_f491_u32;
        let img = RgbImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let [r, g, b, _] = state.to_le_bytes();
            Rgb([r, g, b])
        });
        encode_as(&DynamicImage::ImageRgb8(img), ImageFormat::Png).unwrap()
    }

    fn dimensions(bytes: &[u8]) -> (u32, u32) {
        let img = image::load_from_memory(bytes).unwrap();
        (img.width(), img.height())
    }

    #[test]
    fn test_inactive_options_leave_content_alone() {
        assert_eq!(prepare_upload(&png(64, 32), &ImagePrepOptions::default()).unwrap(), None);
    }

    #[test]
    fn test_large_png_converted_to_jpeg() {
        let options = ImagePrepOptions {
            convert_to_jpg: true,
            convert_threshold: 10,
            ..Default::default()
        };
        let prepared = prepare_upload(&png(64, 32), &options).unwrap().unwrap();

        assert_eq!(prepared.extension, "jpg");
        assert_eq!(image::guess_format(&prepared.bytes).unwrap(), ImageFormat::Jpeg);
        assert_eq!(dimensions(&prepared.bytes), (64, 32));
    }

    #[test]
    fn test_small_png_not_converted() {
        let options = ImagePrepOptions {
            convert_to_jpg: true,
            ..Default::default()
        };
        assert_eq!(prepare_upload(&png(64, 32), &options).unwrap(), None);
    }

    #[test]
    fn test_shrink_keeps_format_and_aspect_ratio() {
        let options = ImagePrepOptions {
            shrink: true,
            shrink_threshold: 100,
            shrink_dimensions: [16, 16],
            ..Default::default()
        };
        let prepared = prepare_upload(&png(64, 32), &options).unwrap().unwrap();

        assert_eq!(prepared.extension, "png");
        assert_eq!(dimensions(&prepared.bytes), (16, 8));
    }

    #[test]
    fn test_shrink_below_pixel_threshold_is_noop() {
        let options = ImagePrepOptions {
            shrink: true,
            ..Default::default()
        };
        assert_eq!(prepare_upload(&png(64, 32), &options).unwrap(), None);
    }

    #[test]
    fn test_gif_passes_through() {
        let gif = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;".to_vec();
        let options = ImagePrepOptions {
            convert_to_jpg: true,
            convert_threshold: 0,
            shrink: true,
            shrink_threshold: 0,
            ..Default::default()
        };
        assert_eq!(prepare_upload(&gif, &options).unwrap(), None);
        assert_eq!(shrink_for_search(&gif).unwrap(), None);
    }

    #[test]
    fn test_search_copy_only_for_large_images() {
        assert_eq!(shrink_for_search(&png(64, 32)).unwrap(), None);

        let large = noisy_png(1200, 900);
        assert!(large.len() > SEARCH_SIZE_LIMIT);

        let small = shrink_for_search(&large).unwrap().unwrap();
        assert_eq!(image::guess_format(&small).unwrap(), ImageFormat::Jpeg);
        assert_eq!(dimensions(&small), (1000, 750));
        assert!(small.len() < large.len());
    }
}
