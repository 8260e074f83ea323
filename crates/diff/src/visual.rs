//! Screenshot comparison
//!
//! Perceptual per-pixel comparison in YIQ space with anti-aliasing
//! detection, in the style of pixelmatch. Images of different sizes are
//! upscaled to the element-wise maximum before comparing.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use tracing::debug;

use crate::error::{DiffError, DiffResult};
use crate::severity::{percentage, round2, Severity, SeverityPolicy};

/// Largest possible YIQ delta between two colours
const MAX_YIQ_DELTA: f64 = 35215.0;

/// Outcome of comparing two screenshots
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualComparison {
    /// Percentage of differing pixels, rounded to 2 decimals
    pub change_score: f64,
    /// Unrounded percentage
    pub change_percentage: f64,
    pub changed_pixels: u64,
    pub total_pixels: u64,
    pub width: u32,
    pub height: u32,
    pub severity: Severity,
    /// Inputs were byte-for-byte identical
    pub identical_bytes: bool,
    /// PNG overlay: red on differing pixels, composited over the first image
    #[serde(skip)]
    pub diff_image: Vec<u8>,
}

impl VisualComparison {
    pub fn has_changes(&self) -> bool {
        self.changed_pixels > 0
    }
}

/// Visual diff engine configuration
#[derive(Debug, Clone)]
pub struct VisualDiffEngine {
    /// Matching sensitivity, 0 to 1; smaller is stricter
    pub threshold: f64,
    /// Count anti-aliased pixels as differences
    pub include_anti_aliasing: bool,
    /// Alpha of the red diff marker
    pub overlay_alpha: u8,
    pub policy: SeverityPolicy,
}

impl Default for VisualDiffEngine {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            include_anti_aliasing: false,
            overlay_alpha: 200,
            policy: SeverityPolicy::VISUAL,
        }
    }
}

impl VisualDiffEngine {
    /// Compare two encoded images (any format `image` can decode).
    pub fn compare(&self, a: &[u8], b: &[u8]) -> DiffResult<VisualComparison> {
        let identical_bytes = sha256(a) == sha256(b);
        let img_a = decode(a)?;

        if identical_bytes {
            debug!("Screenshots match exactly (same hash)");
            let (width, height) = img_a.dimensions();
            let total_pixels = width as u64 * height as u64;
            return Ok(VisualComparison {
                change_score: 0.0,
                change_percentage: 0.0,
                changed_pixels: 0,
                total_pixels,
                width,
                height,
                severity: Severity::None,
                identical_bytes: true,
                diff_image: encode_png(&img_a)?,
            });
        }

        let img_b = decode(b)?;
        self.compare_images(&img_a, &img_b)
    }

    /// Compare two decoded images.
    pub fn compare_images(&self, a: &RgbaImage, b: &RgbaImage) -> DiffResult<VisualComparison> {
        let width = a.width().max(b.width());
        let height = a.height().max(b.height());
        if width == 0 || height == 0 {
            return Err(DiffError::EmptyImage);
        }
        if a.dimensions() != b.dimensions() {
            debug!(
                "Screenshot dimensions differ: {:?} vs {:?}, upscaling to {}x{}",
                a.dimensions(),
                b.dimensions(),
                width,
                height
            );
        }

        let a = fit(a, width, height);
        let b = fit(b, width, height);

        let mask = self.diff_mask(&a, &b);
        let changed_pixels = mask.iter().filter(|&&d| d).count() as u64;
        let total_pixels = width as u64 * height as u64;
        let change_percentage = percentage(changed_pixels, total_pixels);

        let overlay = render_overlay(&a, &mask, self.overlay_alpha);

        Ok(VisualComparison {
            change_score: round2(change_percentage),
            change_percentage,
            changed_pixels,
            total_pixels,
            width,
            height,
            severity: self.policy.classify(change_percentage),
            identical_bytes: false,
            diff_image: encode_png(&overlay)?,
        })
    }

    /// One flag per pixel, row-major: true where the pixel counts as changed.
    fn diff_mask(&self, a: &RgbaImage, b: &RgbaImage) -> Vec<bool> {
        let (width, height) = a.dimensions();
        let max_delta = MAX_YIQ_DELTA * self.threshold * self.threshold;
        let mut mask = vec![false; width as usize * height as usize];

        if a.as_raw() == b.as_raw() {
            return mask;
        }

        for y in 0..height {
            for x in 0..width {
                let pa = a.get_pixel(x, y);
                let pb = b.get_pixel(x, y);
                let delta = color_delta(pa, pb, false);
                if delta.abs() <= max_delta {
                    continue;
                }
                if !self.include_anti_aliasing
                    && (anti_aliased(a, x, y, b) || anti_aliased(b, x, y, a))
                {
                    continue;
                }
                mask[(y * width + x) as usize] = true;
            }
        }
        mask
    }
}

fn sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn decode(bytes: &[u8]) -> DiffResult<RgbaImage> {
    let img = image::load_from_memory(bytes).map_err(DiffError::Decode)?;
    Ok(img.to_rgba8())
}

fn encode_png(img: &RgbaImage) -> DiffResult<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img.clone())
        .write_to(&mut out, ImageFormat::Png)
        .map_err(DiffError::Encode)?;
    Ok(out.into_inner())
}

/// Upscale to the target size. Images already that size are copied as-is.
fn fit(img: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if img.dimensions() == (width, height) {
        img.clone()
    } else {
        imageops::resize(img, width, height, FilterType::Lanczos3)
    }
}

/// Red marker composited over the base image where the mask is set.
fn render_overlay(base: &RgbaImage, mask: &[bool], alpha: u8) -> RgbaImage {
    let mut out = base.clone();
    let width = base.width();
    let marker = Rgba([255, 0, 0, alpha]);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if mask[(y * width + x) as usize] {
            *pixel = over(marker, *pixel);
        }
    }
    out
}

/// Porter-Duff "source over destination".
fn over(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    let sa = src[3] as f64 / 255.0;
    let da = dst[3] as f64 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |i: usize| {
        let c = (src[i] as f64 * sa + dst[i] as f64 * da * (1.0 - sa)) / out_a;
        c.round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round() as u8,
    ])
}

// ============================================================================
// YIQ colour metric
// ============================================================================

fn blend(c: f64, a: f64) -> f64 {
    255.0 + (c - 255.0) * a
}

fn rgb2y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.29889531 + g * 0.58662247 + b * 0.11448223
}

fn rgb2i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.59597799 - g * 0.27417610 - b * 0.32180189
}

fn rgb2q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.21147017 - g * 0.52261711 + b * 0.31114694
}

/// Channels as f64, alpha-blended over white.
fn blended(p: &Rgba<u8>) -> (f64, f64, f64) {
    let [r, g, b, a] = p.0;
    let (r, g, b) = (r as f64, g as f64, b as f64);
    if a < 255 {
        let a = a as f64 / 255.0;
        (blend(r, a), blend(g, a), blend(b, a))
    } else {
        (r, g, b)
    }
}

/// Squared YIQ distance between two pixels, signed by which one is
/// brighter. With `y_only` only the luma difference is returned.
fn color_delta(p1: &Rgba<u8>, p2: &Rgba<u8>, y_only: bool) -> f64 {
    if p1 == p2 {
        return 0.0;
    }
    let (r1, g1, b1) = blended(p1);
    let (r2, g2, b2) = blended(p2);

    let y1 = rgb2y(r1, g1, b1);
    let y2 = rgb2y(r2, g2, b2);
    let y = y1 - y2;
    if y_only {
        return y;
    }

    let i = rgb2i(r1, g1, b1) - rgb2i(r2, g2, b2);
    let q = rgb2q(r1, g1, b1) - rgb2q(r2, g2, b2);
    let delta = 0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q;
    if y1 > y2 {
        -delta
    } else {
        delta
    }
}

/// Neighbourhood bounds clamped to the image.
fn window(x: u32, y: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
    (
        x.saturating_sub(1),
        y.saturating_sub(1),
        (x + 1).min(width - 1),
        (y + 1).min(height - 1),
    )
}

/// Whether the pixel at (x1, y1) in `img` looks like anti-aliasing: it sits
/// between a darkest and brightest neighbour, and one of those lies inside a
/// flat region in both images.
fn anti_aliased(img: &RgbaImage, x1: u32, y1: u32, other: &RgbaImage) -> bool {
    let (width, height) = img.dimensions();
    let (x0, y0, x2, y2) = window(x1, y1, width, height);
    let centre = img.get_pixel(x1, y1);

    let mut zeroes = if x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2 {
        1
    } else {
        0
    };
    let (mut min, mut max) = (0.0f64, 0.0f64);
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (0, 0, 0, 0);

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            let delta = color_delta(centre, img.get_pixel(x, y), true);
            if delta == 0.0 {
                zeroes += 1;
                if zeroes > 2 {
                    return false;
                }
            } else if delta < min {
                min = delta;
                min_x = x;
                min_y = y;
            } else if delta > max {
                max = delta;
                max_x = x;
                max_y = y;
            }
        }
    }

    if min == 0.0 || max == 0.0 {
        return false;
    }

    (has_many_siblings(img, min_x, min_y) && has_many_siblings(other, min_x, min_y))
        || (has_many_siblings(img, max_x, max_y) && has_many_siblings(other, max_x, max_y))
}

/// Whether at least three neighbours share the pixel's exact colour.
fn has_many_siblings(img: &RgbaImage, x1: u32, y1: u32) -> bool {
    let (width, height) = img.dimensions();
    let (x0, y0, x2, y2) = window(x1, y1, width, height);
    let centre = img.get_pixel(x1, y1);

    let mut zeroes = if x1 == x0 || x1 == x2 || y1 == y0 || y1 == y2 {
        1
    } else {
        0
    };
    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            if img.get_pixel(x, y) == centre {
                zeroes += 1;
            }
            if zeroes > 2 {
                return true;
            }
        }
    }
    false
}
