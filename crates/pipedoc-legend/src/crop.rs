//! Phase 4b: raster cleanup of cropped symbol images.
//!
//! A raw crop usually carries three kinds of residue: a near-uniform gray
//! cell background, grid-line fragments along the edges, and stray text
//! (grid labels, header words, description bleed) separated from the
//! symbol by whitespace. The passes run in that order:
//! whiten → trim grid borders → auto-crop to content.

use image::{DynamicImage, GrayImage};

/// Gray-background band considered for whitening.
const GRAY_EDGE_LOW: f32 = 180.0;
const GRAY_EDGE_HIGH: f32 = 245.0;
const GRAY_BAND_LOW: f32 = 180.0;
const GRAY_BAND_HIGH: f32 = 240.0;
/// Fraction of pixels in the gray band that triggers partial-background
/// whitening.
const GRAY_BAND_FRACTION: f32 = 0.15;
/// Pixels within ± this of the detected background become white.
const GRAY_TOLERANCE: f32 = 25.0;

/// Minimum whitespace gap that separates stray edge content from the
/// symbol (~0.7 pt at 300 DPI).
const GAP_MIN_PX: u32 = 3;

fn luma_of(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    values[values.len() / 2]
}

/// Convert a near-uniform gray background to white, preserving dark lines
/// and text. Pure-white and pure-black images pass through untouched.
///
/// Two detection strategies: the median of the edge pixels (full gray
/// backgrounds), then the fraction of all pixels inside the gray band
/// (partial backgrounds, e.g. a half-gray cell).
#[must_use]
pub fn whiten_gray_background(img: DynamicImage) -> DynamicImage {
    let gray = luma_of(&img);
    let (w, h) = gray.dimensions();
    if w < 10 || h < 10 {
        return img;
    }

    let mut edges: Vec<f32> = Vec::with_capacity((2 * (w + h)) as usize);
    for x in 0..w {
        edges.push(f32::from(gray.get_pixel(x, 0)[0]));
        edges.push(f32::from(gray.get_pixel(x, h - 1)[0]));
    }
    for y in 0..h {
        edges.push(f32::from(gray.get_pixel(0, y)[0]));
        edges.push(f32::from(gray.get_pixel(w - 1, y)[0]));
    }
    let edge_median = median(&mut edges);

    let mut bg_value = edge_median;
    let mut do_whiten = (GRAY_EDGE_LOW..=GRAY_EDGE_HIGH).contains(&edge_median);

    if !do_whiten {
        let mut band: Vec<f32> = gray
            .pixels()
            .map(|p| f32::from(p[0]))
            .filter(|&v| (GRAY_BAND_LOW..=GRAY_BAND_HIGH).contains(&v))
            .collect();
        let frac = band.len() as f32 / (w * h) as f32;
        if frac > GRAY_BAND_FRACTION {
            bg_value = median(&mut band);
            do_whiten = true;
        }
    }

    if !do_whiten {
        return img;
    }

    let low = bg_value - GRAY_TOLERANCE;
    let high = bg_value + GRAY_TOLERANCE;
    let mut rgba = img.to_rgba8();
    for (x, y, pixel) in rgba.enumerate_pixels_mut() {
        let v = f32::from(gray.get_pixel(x, y)[0]);
        if (low..=high).contains(&v) {
            *pixel = image::Rgba([255, 255, 255, 255]);
        }
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Remove grid-line fragments along the crop's edges.
///
/// Two passes per edge: a strict pass catching lighter lines over a wider
/// scan band, then a loose pass for strong dark lines close to the edge.
/// The trim never removes more than a third of either dimension.
#[must_use]
pub fn trim_grid_borders(img: DynamicImage) -> DynamicImage {
    let gray = luma_of(&img);
    let (w, h) = gray.dimensions();
    if h < 10 || w < 20 {
        return img;
    }

    const DARK_STRICT: u8 = 180;
    const DARK_LOOSE: u8 = 140;
    const RATIO_STRICT: f32 = 0.25;
    const RATIO_LOOSE: f32 = 0.50;

    let max_check_x = 40.min(w / 3);
    let max_check_y = 30.min(h / 3);

    let col_dark_fraction = |x: u32, threshold: u8| -> f32 {
        let dark = (0..h).filter(|&y| gray.get_pixel(x, y)[0] < threshold).count();
        dark as f32 / h as f32
    };
    let row_dark_fraction = |y: u32, threshold: u8| -> f32 {
        let dark = (0..w).filter(|&x| gray.get_pixel(x, y)[0] < threshold).count();
        dark as f32 / w as f32
    };

    // Innermost matching line within the scan band, or None.
    let detect_v = |range: Box<dyn Iterator<Item = u32>>, threshold: u8, ratio: f32| -> Option<u32> {
        let mut best = None;
        for x in range {
            if col_dark_fraction(x, threshold) > ratio {
                best = Some(x);
            }
        }
        best
    };
    let detect_h = |range: Box<dyn Iterator<Item = u32>>, threshold: u8, ratio: f32| -> Option<u32> {
        let mut best = None;
        for y in range {
            if row_dark_fraction(y, threshold) > ratio {
                best = Some(y);
            }
        }
        best
    };

    let mut left = 0u32;
    if let Some(x) = detect_v(Box::new(0..max_check_x), DARK_STRICT, RATIO_STRICT)
        .or_else(|| detect_v(Box::new(0..15.min(w / 4)), DARK_LOOSE, RATIO_LOOSE))
    {
        left = x + 1;
    }

    let mut right = w;
    if let Some(x) = detect_v(
        Box::new((w.saturating_sub(max_check_x)..w).rev()),
        DARK_STRICT,
        RATIO_STRICT,
    )
    .or_else(|| {
        detect_v(
            Box::new((w.saturating_sub(15)..w).rev()),
            DARK_LOOSE,
            RATIO_LOOSE,
        )
    }) {
        right = x;
    }

    let mut top = 0u32;
    if let Some(y) = detect_h(Box::new(0..max_check_y), DARK_STRICT, RATIO_STRICT)
        .or_else(|| detect_h(Box::new(0..15.min(h / 4)), DARK_LOOSE, RATIO_LOOSE))
    {
        top = y + 1;
    }

    let mut bottom = h;
    if let Some(y) = detect_h(
        Box::new((h.saturating_sub(max_check_y)..h).rev()),
        DARK_STRICT,
        RATIO_STRICT,
    )
    .or_else(|| {
        detect_h(
            Box::new((h.saturating_sub(15)..h).rev()),
            DARK_LOOSE,
            RATIO_LOOSE,
        )
    }) {
        bottom = y;
    }

    // Step past detected lines, but never into the middle third.
    if left > 0 {
        left = (left + 6).min(w / 3);
    }
    if right < w {
        right = (right.saturating_sub(6)).max(w * 2 / 3);
    }
    if top > 0 {
        top = (top + 5).min(h / 3);
    }
    if bottom < h {
        bottom = (bottom.saturating_sub(5)).max(h * 2 / 3);
    }

    if left >= right || top >= bottom {
        return img;
    }
    if left == 0 && right == w && top == 0 && bottom == h {
        return img;
    }
    img.crop_imm(left, top, right - left, bottom - top)
}

/// Crop to the visible content bounds with padding, stripping isolated
/// edge content (grid labels, header fragments, description bleed)
/// separated from the symbol by a whitespace gap.
#[must_use]
pub fn auto_crop_to_content(img: DynamicImage, padding: u32) -> DynamicImage {
    let gray = luma_of(&img);
    let (w, h) = gray.dimensions();

    let is_content = |x: u32, y: u32| gray.get_pixel(x, y)[0] < 235;

    // Content bounding box.
    let mut x_min = w;
    let mut x_max = 0u32;
    let mut y_min = h;
    let mut y_max = 0u32;
    for y in 0..h {
        for x in 0..w {
            if is_content(x, y) {
                x_min = x_min.min(x);
                x_max = x_max.max(x + 1);
                y_min = y_min.min(y);
                y_max = y_max.max(y + 1);
            }
        }
    }
    if x_min >= x_max || y_min >= y_max {
        return img;
    }

    let row_has_content =
        |y: u32, xa: u32, xb: u32| -> bool { (xa..xb).any(|x| is_content(x, y)) };
    let col_has_content =
        |x: u32, ya: u32, yb: u32| -> bool { (ya..yb).any(|y| is_content(x, y)) };

    let content_h = y_max - y_min;
    let content_w = x_max - x_min;

    // Top/bottom first so the horizontal scans use the corrected y range.
    y_min = strip_forward(
        |y| row_has_content(y, x_min, x_max),
        y_min,
        y_max,
        content_h * 2 / 5,
        3,
    );
    y_max = strip_backward(
        |y| row_has_content(y, x_min, x_max),
        y_max,
        y_min,
        content_h * 2 / 5,
        3,
    );

    // Left: a single conservative pass over the first quarter, so small but
    // valid symbols (boxed flowmeter codes) survive.
    x_min = strip_forward(
        |x| col_has_content(x, y_min, y_max),
        x_min,
        x_min + content_w / 4,
        content_w / 4,
        1,
    );
    // Right: up to half the span, catching description-text bleed.
    x_max = strip_backward(
        |x| col_has_content(x, y_min, y_max),
        x_max,
        x_max.saturating_sub(content_w / 2),
        content_w / 2,
        1,
    );

    let x0 = x_min.saturating_sub(padding);
    let y0 = y_min.saturating_sub(padding);
    let x1 = (x_max + padding).min(w);
    let y1 = (y_max + padding).min(h);

    if x1 - x0 < 20 || y1 - y0 < 15 {
        return img;
    }
    img.crop_imm(x0, y0, x1 - x0, y1 - y0)
}

/// Advance a lower bound past isolated content blocks: each time a gap of
/// at least [`GAP_MIN_PX`] follows some content, the bound jumps past the
/// gap. Bounded by `max_strip` positions and `max_passes` repetitions.
fn strip_forward(
    has_content: impl Fn(u32) -> bool,
    start: u32,
    hard_end: u32,
    max_strip: u32,
    max_passes: u32,
) -> u32 {
    let mut bound = start;
    for _ in 0..max_passes {
        let stripped = bound - start;
        if stripped >= max_strip {
            break;
        }
        let limit = (bound + (max_strip - stripped)).min(hard_end);
        let mut gap_start: Option<u32> = None;
        let mut found_content = false;
        let mut advanced = false;
        for pos in bound..limit {
            if has_content(pos) {
                found_content = true;
                if let Some(gs) = gap_start {
                    if pos - gs >= GAP_MIN_PX {
                        bound = pos;
                        advanced = true;
                        break;
                    }
                }
                gap_start = None;
            } else if found_content && gap_start.is_none() {
                gap_start = Some(pos);
            }
        }
        if !advanced {
            break;
        }
    }
    bound
}

/// Mirror of [`strip_forward`] walking down from an exclusive upper bound.
fn strip_backward(
    has_content: impl Fn(u32) -> bool,
    start: u32,
    hard_end: u32,
    max_strip: u32,
    max_passes: u32,
) -> u32 {
    let mut bound = start;
    for _ in 0..max_passes {
        let stripped = start - bound;
        if stripped >= max_strip {
            break;
        }
        let limit = bound.saturating_sub(max_strip - stripped).max(hard_end);
        let mut gap_start: Option<u32> = None;
        let mut found_content = false;
        let mut advanced = false;
        let mut pos = bound;
        while pos > limit {
            pos -= 1;
            if has_content(pos) {
                found_content = true;
                if let Some(gs) = gap_start {
                    if gs - pos >= GAP_MIN_PX {
                        bound = pos + 1;
                        advanced = true;
                        break;
                    }
                }
                gap_start = None;
            } else if found_content && gap_start.is_none() {
                gap_start = Some(pos);
            }
        }
        if !advanced {
            break;
        }
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Luma, Rgba, RgbaImage};

    fn uniform(w: u32, h: u32, value: u8) -> DynamicImage {
        let mut img = RgbaImage::new(w, h);
        for pixel in img.pixels_mut() {
            *pixel = Rgba([value, value, value, 255]);
        }
        DynamicImage::ImageRgba8(img)
    }

    #[test]
    fn whiten_leaves_pure_white_and_black_untouched() {
        for value in [255u8, 0u8] {
            let img = uniform(40, 40, value);
            let out = whiten_gray_background(img);
            let gray = out.to_luma8();
            assert!(gray.pixels().all(|p| p[0] == value));
        }
    }

    #[test]
    fn whiten_clears_gray_background_keeping_dark_strokes() {
        let mut img = RgbaImage::new(40, 40);
        for pixel in img.pixels_mut() {
            *pixel = Rgba([200, 200, 200, 255]);
        }
        // A dark stroke through the middle.
        for x in 5..35 {
            img.put_pixel(x, 20, Rgba([30, 30, 30, 255]));
        }
        let out = whiten_gray_background(DynamicImage::ImageRgba8(img)).to_luma8();
        assert_eq!(out.get_pixel(0, 0)[0], 255);
        assert_eq!(out.get_pixel(20, 20)[0], 30);
    }

    #[test]
    fn trim_removes_edge_line_but_never_middle_third() {
        // White 90x60 image with a full-height dark line at x=2.
        let mut img = image::GrayImage::from_pixel(90, 60, Luma([255u8]));
        for y in 0..60 {
            img.put_pixel(2, y, Luma([0]));
        }
        let out = trim_grid_borders(DynamicImage::ImageLuma8(img));
        // Line plus margin removed from the left.
        assert!(out.width() < 90);
        // Never more than a third per side.
        assert!(out.width() >= 90 - 30 - 0);
        assert!(out.height() == 60);
    }

    #[test]
    fn trim_passes_clean_images_through() {
        let img = uniform(80, 60, 255);
        let out = trim_grid_borders(img);
        assert_eq!((out.width(), out.height()), (80, 60));
    }

    #[test]
    fn auto_crop_tightens_to_content() {
        let mut img = image::GrayImage::from_pixel(100, 100, Luma([255u8]));
        // A 20x20 block in the middle.
        for y in 40..60 {
            for x in 40..60 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        let out = auto_crop_to_content(DynamicImage::ImageLuma8(img), 6);
        assert_eq!((out.width(), out.height()), (32, 32));
    }

    #[test]
    fn auto_crop_strips_isolated_top_label() {
        let mut img = image::GrayImage::from_pixel(100, 120, Luma([255u8]));
        // Stray label near the top…
        for x in 45..55 {
            img.put_pixel(x, 10, Luma([0]));
        }
        // …then the symbol body below a 19 px gap (within the 40 % strip
        // budget of the 80 px content span).
        for y in 30..90 {
            for x in 30..70 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        let out = auto_crop_to_content(DynamicImage::ImageLuma8(img), 2);
        // The label row is stripped: the crop starts at the symbol body.
        assert_eq!((out.width(), out.height()), (44, 64));
    }

    #[test]
    fn auto_crop_on_blank_image_is_identity() {
        let img = uniform(50, 50, 255);
        let out = auto_crop_to_content(img, 6);
        assert_eq!((out.width(), out.height()), (50, 50));
    }
}
