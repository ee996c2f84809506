//! Image normalization layer
//!
//! Turns raw encoded captcha bytes into the canonical 128x32 RGB form the
//! recognition model accepts, plus a post-hoc debug overlay with per-character
//! bounding boxes.

pub mod normalize;
pub mod overlay;

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbImage};
use thiserror::Error;

use crate::capture::RawCapture;

pub use normalize::normalize;
pub use overlay::render_overlay;

/// Canonical width required by the recognition model contract.
pub const CANONICAL_WIDTH: u32 = 128;
/// Canonical height required by the recognition model contract.
pub const CANONICAL_HEIGHT: u32 = 32;

/// Raw bytes were not a valid image container. Fatal for the single item,
/// never retried; the item is still recorded downstream as an empty-text
/// result.
#[derive(Debug, Error)]
#[error("failed to decode captcha image: {0}")]
pub struct DecodeError(#[from] image::ImageError);

/// A captcha normalized to the canonical model input size.
///
/// Owned exclusively by the pipeline stage currently holding it and moved
/// between stages; the originating [`RawCapture`] rides along so the writer
/// can persist the raw source next to the derived artifacts.
pub struct NormalizedImage {
    /// Canonical 128x32 RGB pixels.
    pub canonical: RgbImage,
    /// The capture this image was derived from.
    pub raw: RawCapture,
}

/// Encode an RGB image as PNG bytes.
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img.clone()).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// An all-white canonical image, used as the stored artifact when the raw
/// bytes could not be decoded at all.
pub fn blank_canonical() -> RgbImage {
    RgbImage::from_pixel(CANONICAL_WIDTH, CANONICAL_HEIGHT, image::Rgb([255, 255, 255]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_png_roundtrip() {
        let img = blank_canonical();
        let bytes = encode_png(&img).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (CANONICAL_WIDTH, CANONICAL_HEIGHT));
        assert_eq!(decoded.get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_blank_canonical_dimensions() {
        let img = blank_canonical();
        assert_eq!(img.dimensions(), (128, 32));
    }
}
