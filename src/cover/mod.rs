//! Cover image validation and normalization.
//!
//! Magic bytes are checked before any decoder runs, so arbitrary upload
//! bytes can never reach the image decoder. Images that are too small or
//! landscape-oriented are heuristically not book covers (banner/placeholder
//! art from external sources) and are rejected; rejection is a valid
//! outcome, not an error.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use thiserror::Error;
use tracing::debug;

/// Minimum edge for a plausible cover.
const MIN_DIMENSION: u32 = 100;
/// Minimum height/width ratio; anything flatter is banner art.
const MIN_ASPECT_RATIO: f32 = 0.8;
/// Normalized covers fit within this box; smaller sources are never upscaled.
const TARGET_WIDTH: u32 = 600;
const TARGET_HEIGHT: u32 = 900;
/// JPEG quality for re-encoded covers.
const JPEG_QUALITY: u8 = 85;

#[derive(Debug, Error)]
pub enum CoverError {
    #[error("Unrecognized image format")]
    UnknownFormat,

    #[error("Image too small: {width}x{height}")]
    TooSmall { width: u32, height: u32 },

    #[error("Landscape aspect ratio {0:.2} rejected")]
    BadAspectRatio(f32),

    #[error("Image decode failed: {0}")]
    DecodeFailed(String),

    #[error("Image encode failed: {0}")]
    EncodeFailed(String),
}

/// A validated, normalized cover.
#[derive(Debug, Clone)]
pub struct CoverResult {
    pub bytes: Vec<u8>,
    pub mime: String,
    /// Dominant color as `#rrggbb`, used as a loading placeholder.
    pub dominant_color: String,
}

/// Validate and normalize an extracted or externally supplied image.
pub fn normalize_cover(bytes: &[u8]) -> Result<CoverResult, CoverError> {
    let format = sniff_image_format(bytes).ok_or(CoverError::UnknownFormat)?;

    let image = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| CoverError::DecodeFailed(e.to_string()))?;

    let (width, height) = image.dimensions();
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        return Err(CoverError::TooSmall { width, height });
    }
    let aspect = height as f32 / width as f32;
    if aspect < MIN_ASPECT_RATIO {
        return Err(CoverError::BadAspectRatio(aspect));
    }

    let dominant_color = dominant_color(&image);

    // Downscale into the target box only; small covers stay as they are.
    let resized = if width > TARGET_WIDTH || height > TARGET_HEIGHT {
        debug!("Resizing cover from {}x{}", width, height);
        image.resize(TARGET_WIDTH, TARGET_HEIGHT, FilterType::Lanczos3)
    } else {
        image
    };

    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    resized
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| CoverError::EncodeFailed(e.to_string()))?;

    Ok(CoverResult {
        bytes: out,
        mime: "image/jpeg".to_string(),
        dominant_color,
    })
}

/// Magic-byte check, run before any decoding is attempted.
pub fn sniff_image_format(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(ImageFormat::Jpeg)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some(ImageFormat::Png)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(ImageFormat::Gif)
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some(ImageFormat::WebP)
    } else if bytes.starts_with(b"BM") {
        Some(ImageFormat::Bmp)
    } else if bytes.starts_with(&[0x49, 0x49, 0x2A, 0x00])
        || bytes.starts_with(&[0x4D, 0x4D, 0x00, 0x2A])
    {
        Some(ImageFormat::Tiff)
    } else {
        None
    }
}

/// Representative color from a one-pixel downsample.
fn dominant_color(image: &DynamicImage) -> String {
    let pixel = image
        .resize_exact(1, 1, FilterType::Triangle)
        .to_rgb8()
        .get_pixel(0, 0)
        .0;
    format!("#{:02x}{:02x}{:02x}", pixel[0], pixel[1], pixel[2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let mut img = RgbImage::new(width, height);
        for pixel in img.pixels_mut() {
            pixel.0 = rgb;
        }
        let mut out = std::io::Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_valid_portrait_cover() {
        let bytes = png_bytes(200, 300, [200, 30, 30]);
        let cover = normalize_cover(&bytes).unwrap();
        assert_eq!(cover.mime, "image/jpeg");
        assert!(!cover.bytes.is_empty());
        // Solid red image gives a red-dominant placeholder.
        assert!(cover.dominant_color.starts_with("#c"));
    }

    #[test]
    fn test_small_image_rejected() {
        let bytes = png_bytes(50, 80, [0, 0, 0]);
        assert!(matches!(
            normalize_cover(&bytes),
            Err(CoverError::TooSmall { .. })
        ));
    }

    #[test]
    fn test_banner_aspect_rejected() {
        let bytes = png_bytes(600, 200, [0, 0, 0]);
        assert!(matches!(
            normalize_cover(&bytes),
            Err(CoverError::BadAspectRatio(_))
        ));
    }

    #[test]
    fn test_square_is_accepted() {
        let bytes = png_bytes(300, 300, [10, 20, 30]);
        assert!(normalize_cover(&bytes).is_ok());
    }

    #[test]
    fn test_arbitrary_bytes_never_reach_decoder() {
        assert!(matches!(
            normalize_cover(b"PK\x03\x04 this is a zip, not an image"),
            Err(CoverError::UnknownFormat)
        ));
    }

    #[test]
    fn test_oversized_cover_is_downscaled() {
        let bytes = png_bytes(1200, 1800, [1, 2, 3]);
        let cover = normalize_cover(&bytes).unwrap();
        let reloaded = image::load_from_memory(&cover.bytes).unwrap();
        assert!(reloaded.width() <= TARGET_WIDTH);
        assert!(reloaded.height() <= TARGET_HEIGHT);
    }

    #[test]
    fn test_small_cover_not_upscaled() {
        let bytes = png_bytes(150, 200, [1, 2, 3]);
        let cover = normalize_cover(&bytes).unwrap();
        let reloaded = image::load_from_memory(&cover.bytes).unwrap();
        assert_eq!((reloaded.width(), reloaded.height()), (150, 200));
    }

    #[test]
    fn test_sniff_formats() {
        assert_eq!(
            sniff_image_format(&[0xFF, 0xD8, 0xFF, 0xE0]),
            Some(ImageFormat::Jpeg)
        );
        assert_eq!(sniff_image_format(b"GIF89a..."), Some(ImageFormat::Gif));
        assert_eq!(sniff_image_format(b"RIFF\x00\x00\x00\x00WEBP"), Some(ImageFormat::WebP));
        assert_eq!(sniff_image_format(b"plain text"), None);
    }
}
