//! Deterministic captcha normalization
//!
//! Every raw capture passes through the same fixed sequence: background
//! polarity correction, a gentle denoise/contrast pass, side-only whitespace
//! trimming, and the canonical 128x32 resize. Stage failures after decode
//! degrade gracefully: a stage that cannot run on a given image passes the
//! previous stage's output through unchanged instead of dropping the captcha.

use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::filter::{bilateral_filter, box_filter};

use super::{DecodeError, CANONICAL_HEIGHT, CANONICAL_WIDTH};

/// Mean luma below this treats the image as dark-background/light-text.
const DARK_BACKGROUND_MEAN: f32 = 127.0;
/// Binarization threshold applied to the inverted dark-background image.
const DARK_STROKE_THRESHOLD: u8 = 50;
/// Binarization threshold for images that are already light.
const LIGHT_BACKGROUND_THRESHOLD: u8 = 200;
/// Pixels at or above this luma count as whitespace during side trimming.
const WHITESPACE_LUMA: u8 = 245;
const STRIP_WIDTH: u32 = 5;
const CROP_MARGIN: u32 = 5;
/// Crops that would leave this width or less are skipped entirely.
const MIN_CROPPED_WIDTH: u32 = 20;
/// 15px adaptive-threshold window.
const ADAPTIVE_WINDOW_RADIUS: u32 = 7;
const ADAPTIVE_BIAS: i16 = 3;
/// Adaptive mask is blended 15% over 85% original color.
const MASK_BLEND: f32 = 0.15;
const CONTRAST_BOOST: f32 = 1.2;
const SHARPEN_STRENGTH: f32 = 0.1;

/// Normalize raw encoded image bytes into the canonical 128x32 RGB form.
pub fn normalize(raw_bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    let decoded = image::load_from_memory(raw_bytes)?.to_rgb8();
    let flattened = correct_polarity(&decoded);
    let enhanced = enhance(&flattened);
    let trimmed = trim_sides(&enhanced);
    Ok(imageops::resize(
        &trimmed,
        CANONICAL_WIDTH,
        CANONICAL_HEIGHT,
        FilterType::Lanczos3,
    ))
}

fn mean_luma(gray: &GrayImage) -> f32 {
    let total: u64 = gray.pixels().map(|p| u64::from(p.0[0])).sum();
    let count = (gray.width() as u64 * gray.height() as u64).max(1);
    total as f32 / count as f32
}

/// Force white background / black strokes regardless of input polarity.
fn correct_polarity(img: &RgbImage) -> RgbImage {
    let gray = imageops::grayscale(img);
    if mean_luma(&gray) < DARK_BACKGROUND_MEAN {
        // Dark background: invert so original light strokes land near zero,
        // then binarize around the fixed stroke threshold.
        RgbImage::from_fn(img.width(), img.height(), |x, y| {
            let inverted = 255 - gray.get_pixel(x, y).0[0];
            if inverted < DARK_STROKE_THRESHOLD {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        })
    } else {
        RgbImage::from_fn(img.width(), img.height(), |x, y| {
            if gray.get_pixel(x, y).0[0] >= LIGHT_BACKGROUND_THRESHOLD {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }
}

/// Gentle denoise + contrast pass. Deliberately mild: lowercase-letter
/// curvature must survive, so the adaptive mask only nudges the original
/// colors instead of replacing them.
fn enhance(img: &RgbImage) -> RgbImage {
    let (width, height) = img.dimensions();
    // The adaptive window needs room to work; pass tiny images through.
    let min_side = 2 * ADAPTIVE_WINDOW_RADIUS + 1;
    if width < min_side || height < min_side {
        return img.clone();
    }

    let gray = imageops::grayscale(img);
    let smoothed = bilateral_filter(&gray, 2, 75.0, 75.0);
    let local_mean = box_filter(&smoothed, ADAPTIVE_WINDOW_RADIUS, ADAPTIVE_WINDOW_RADIUS);

    let mut blended = RgbImage::from_fn(width, height, |x, y| {
        let px = i16::from(smoothed.get_pixel(x, y).0[0]);
        let mean = i16::from(local_mean.get_pixel(x, y).0[0]);
        let mask = if px > mean - ADAPTIVE_BIAS { 255.0 } else { 0.0 };
        let src = img.get_pixel(x, y).0;
        let mix = |c: u8| -> u8 {
            ((1.0 - MASK_BLEND) * c as f32 + MASK_BLEND * mask).clamp(0.0, 255.0) as u8
        };
        Rgb([mix(src[0]), mix(src[1]), mix(src[2])])
    });

    boost_contrast(&mut blended, CONTRAST_BOOST);
    sharpen(&blended, SHARPEN_STRENGTH)
}

/// Contrast adjustment around the midpoint.
fn boost_contrast(img: &mut RgbImage, factor: f32) {
    for px in img.pixels_mut() {
        for channel in px.0.iter_mut() {
            let adjusted = ((f32::from(*channel) - 128.0) * factor + 128.0).clamp(0.0, 255.0);
            *channel = adjusted as u8;
        }
    }
}

/// Mild 3x3 unsharp mask. Edge pixels are left untouched.
fn sharpen(img: &RgbImage, strength: f32) -> RgbImage {
    let (width, height) = img.dimensions();
    if width < 3 || height < 3 {
        return img.clone();
    }

    let mut out = img.clone();
    let center_weight = 1.0 + 4.0 * strength;
    let neighbor_weight = -strength;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut sharpened = [0u8; 3];
            for c in 0..3 {
                let center = f32::from(img.get_pixel(x, y).0[c]);
                let top = f32::from(img.get_pixel(x, y - 1).0[c]);
                let bottom = f32::from(img.get_pixel(x, y + 1).0[c]);
                let left = f32::from(img.get_pixel(x - 1, y).0[c]);
                let right = f32::from(img.get_pixel(x + 1, y).0[c]);

                let value = center * center_weight
                    + (top + bottom + left + right) * neighbor_weight;
                sharpened[c] = value.clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(x, y, Rgb(sharpened));
        }
    }

    out
}

/// Trim excess whitespace from the left and right sides only. Top and bottom
/// are never cropped so ascenders and descenders survive.
fn trim_sides(img: &RgbImage) -> RgbImage {
    let (width, height) = img.dimensions();
    let gray = imageops::grayscale(img);
    let num_strips = width / STRIP_WIDTH;

    let mut left = 0u32;
    for i in 0..num_strips {
        let start = i * STRIP_WIDTH;
        let end = ((i + 1) * STRIP_WIDTH).min(width);
        if strip_has_content(&gray, start, end) {
            left = start.saturating_sub(CROP_MARGIN);
            break;
        }
    }

    let mut right = width;
    for i in (0..num_strips).rev() {
        let start = i * STRIP_WIDTH;
        let end = ((i + 1) * STRIP_WIDTH).min(width);
        if strip_has_content(&gray, start, end) {
            right = (end + CROP_MARGIN).min(width);
            break;
        }
    }

    // An empty-looking captcha would produce a degenerate crop; keep it whole.
    if right > left && right - left > MIN_CROPPED_WIDTH {
        imageops::crop_imm(img, left, 0, right - left, height).to_image()
    } else {
        img.clone()
    }
}

fn strip_has_content(gray: &GrayImage, start: u32, end: u32) -> bool {
    for x in start..end {
        for y in 0..gray.height() {
            if gray.get_pixel(x, y).0[0] < WHITESPACE_LUMA {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::encode_png;

    fn light_captcha(width: u32, height: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
        // A few black "strokes" in the middle.
        for x in width / 3..width / 3 + 8 {
            for y in height / 4..3 * height / 4 {
                img.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        img
    }

    fn dark_captcha(width: u32, height: u32) -> RgbImage {
        let mut img = RgbImage::from_pixel(width, height, Rgb([10, 10, 10]));
        for x in width / 3..width / 3 + 8 {
            for y in height / 4..3 * height / 4 {
                img.put_pixel(x, y, Rgb([240, 240, 240]));
            }
        }
        img
    }

    fn gray_of(img: &RgbImage) -> GrayImage {
        imageops::grayscale(img)
    }

    #[test]
    fn test_normalize_always_canonical_size() {
        for (w, h) in [(60u32, 30u32), (300, 80), (25, 25), (128, 32)] {
            let bytes = encode_png(&light_captcha(w, h)).unwrap();
            let out = normalize(&bytes).unwrap();
            assert_eq!(out.dimensions(), (CANONICAL_WIDTH, CANONICAL_HEIGHT));
        }
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize(b"definitely not an image").is_err());
    }

    #[test]
    fn test_dark_background_becomes_white() {
        let bytes = encode_png(&dark_captcha(120, 40)).unwrap();
        let out = normalize(&bytes).unwrap();
        assert!(mean_luma(&gray_of(&out)) > DARK_BACKGROUND_MEAN);
        // Strokes survive inversion.
        assert!(gray_of(&out).pixels().any(|p| p.0[0] < 100));
    }

    #[test]
    fn test_polarity_correction_idempotent() {
        let bytes = encode_png(&light_captcha(120, 40)).unwrap();
        let first = normalize(&bytes).unwrap();
        let second = normalize(&encode_png(&first).unwrap()).unwrap();
        assert!(mean_luma(&gray_of(&first)) > DARK_BACKGROUND_MEAN);
        assert!(mean_luma(&gray_of(&second)) > DARK_BACKGROUND_MEAN);
        assert!(gray_of(&second).pixels().any(|p| p.0[0] < 100));
    }

    #[test]
    fn test_trim_preserves_height_and_content() {
        let mut img = RgbImage::from_pixel(200, 40, Rgb([255, 255, 255]));
        for x in 100..130 {
            for y in 10..30 {
                img.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        let trimmed = trim_sides(&img);
        assert_eq!(trimmed.height(), 40);
        assert!(trimmed.width() > MIN_CROPPED_WIDTH);
        assert!(trimmed.width() < 200);
        assert!(gray_of(&trimmed).pixels().any(|p| p.0[0] < WHITESPACE_LUMA));
    }

    #[test]
    fn test_trim_skips_degenerate_crop() {
        // Too narrow to ever crop below the minimum width.
        let img = RgbImage::from_pixel(15, 40, Rgb([255, 255, 255]));
        let trimmed = trim_sides(&img);
        assert_eq!(trimmed.dimensions(), (15, 40));
    }

    #[test]
    fn test_trim_blank_image_unchanged() {
        let img = RgbImage::from_pixel(200, 40, Rgb([255, 255, 255]));
        let trimmed = trim_sides(&img);
        assert_eq!(trimmed.dimensions(), (200, 40));
    }
}
