//! Post-hoc debug overlay
//!
//! Annotates a normalized captcha with per-character bounding boxes and the
//! characters the recognizer predicted for them. This runs after OCR, so it
//! is a visualization artifact, never an input to recognition.

use image::{imageops, GrayImage, Luma, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

/// White strip appended below the image for the predicted characters.
const GLYPH_STRIP_HEIGHT: u32 = 15;
/// Components this small are noise, not characters.
const MIN_BOX_WIDTH: u32 = 3;
const MIN_BOX_HEIGHT: u32 = 5;
const BOX_COLOR: Rgb<u8> = Rgb([144, 238, 144]);
const GLYPH_COLOR: Rgb<u8> = Rgb([180, 0, 180]);

/// Render the debug overlay for a normalized image and its recognized text.
pub fn render_overlay(canonical: &RgbImage, text: &str) -> RgbImage {
    let (width, height) = canonical.dimensions();
    let mut canvas =
        RgbImage::from_pixel(width, height + GLYPH_STRIP_HEIGHT, Rgb([255, 255, 255]));
    imageops::replace(&mut canvas, canonical, 0, 0);

    let gray = imageops::grayscale(canonical);
    let binary = GrayImage::from_fn(width, height, |x, y| {
        if gray.get_pixel(x, y).0[0] <= 127 {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });

    let mut boxes: Vec<(u32, u32, u32, u32)> = find_contours::<u32>(&binary)
        .iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .filter_map(|c| bounding_box(&c.points))
        .collect();
    boxes.sort_by_key(|b| b.0);

    let chars: Vec<char> = text.chars().collect();
    for (i, &(x, y, w, h)) in boxes.iter().enumerate() {
        if w <= MIN_BOX_WIDTH || h <= MIN_BOX_HEIGHT {
            continue;
        }
        draw_hollow_rect_mut(
            &mut canvas,
            Rect::at(x as i32, y as i32).of_size(w, h),
            BOX_COLOR,
        );
        if let Some(&ch) = chars.get(i) {
            let glyph_x = (x + w / 2).saturating_sub(2);
            draw_glyph(&mut canvas, glyph_x, height + 4, ch);
        }
    }

    canvas
}

fn bounding_box(points: &[imageproc::point::Point<u32>]) -> Option<(u32, u32, u32, u32)> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

fn draw_glyph(canvas: &mut RgbImage, x: u32, y: u32, ch: char) {
    let Some(rows) = glyph_rows(ch) else {
        return;
    };
    for (dy, row) in rows.iter().enumerate() {
        for dx in 0..5u32 {
            if row & (0x10 >> dx) != 0 {
                let px = x + dx;
                let py = y + dy as u32;
                if px < canvas.width() && py < canvas.height() {
                    canvas.put_pixel(px, py, GLYPH_COLOR);
                }
            }
        }
    }
}

/// 5x7 bitmap patterns for the recognition alphabet. Lowercase letters share
/// the uppercase pattern; the strip is an annotation aid, not a rendering of
/// the recognized case.
fn glyph_rows(ch: char) -> Option<[u8; 7]> {
    let rows = match ch.to_ascii_uppercase() {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '@' => [0x0E, 0x11, 0x01, 0x0D, 0x15, 0x15, 0x0E],
        '=' => [0x00, 0x00, 0x1F, 0x00, 0x1F, 0x00, 0x00],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_image() -> RgbImage {
        let mut img = RgbImage::from_pixel(128, 32, Rgb([255, 255, 255]));
        for x in 20..32 {
            for y in 8..24 {
                img.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        img
    }

    #[test]
    fn test_overlay_extends_canvas_below() {
        let overlay = render_overlay(&blob_image(), "A");
        assert_eq!(overlay.width(), 128);
        assert_eq!(overlay.height(), 32 + GLYPH_STRIP_HEIGHT);
    }

    #[test]
    fn test_overlay_draws_box_and_glyph() {
        let overlay = render_overlay(&blob_image(), "A");
        let has_box = overlay.pixels().any(|p| *p == BOX_COLOR);
        assert!(has_box, "expected a bounding box around the component");

        let has_glyph = (32..overlay.height())
            .any(|y| (0..overlay.width()).any(|x| *overlay.get_pixel(x, y) == GLYPH_COLOR));
        assert!(has_glyph, "expected a predicted glyph in the bottom strip");
    }

    #[test]
    fn test_overlay_ignores_noise_components() {
        let mut img = RgbImage::from_pixel(128, 32, Rgb([255, 255, 255]));
        // 2x2 speck: below the minimum component size.
        img.put_pixel(5, 5, Rgb([0, 0, 0]));
        img.put_pixel(6, 5, Rgb([0, 0, 0]));
        img.put_pixel(5, 6, Rgb([0, 0, 0]));
        img.put_pixel(6, 6, Rgb([0, 0, 0]));
        let overlay = render_overlay(&img, "A");
        assert!(!overlay.pixels().any(|p| *p == BOX_COLOR));
    }

    #[test]
    fn test_glyph_table_covers_alphabet() {
        for ch in crate::ocr::ALPHABET.chars() {
            assert!(glyph_rows(ch).is_some(), "missing glyph for {ch:?}");
        }
    }

    #[test]
    fn test_blank_image_has_no_boxes() {
        let img = RgbImage::from_pixel(128, 32, Rgb([255, 255, 255]));
        let overlay = render_overlay(&img, "");
        assert!(!overlay.pixels().any(|p| *p == BOX_COLOR));
    }
}
