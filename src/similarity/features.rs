//! Fixed-length visual descriptors for similarity comparison.
//!
//! Each photo is summarized by one vector: averaged corner descriptors,
//! per-channel color histograms, channel statistics and an edge-density
//! estimate. The blocks live on very different scales; the clusterer
//! standardizes columns before measuring distance.

use anyhow::{Context, Result};
use image::GrayImage;
use std::path::Path;

/// Dimensions per block.
pub const DESCRIPTOR_DIMS: usize = 32;
pub const HISTOGRAM_BINS: usize = 32;
pub const STATS_DIMS: usize = 19;

/// Total feature vector length.
pub const FEATURE_DIM: usize = DESCRIPTOR_DIMS + 3 * HISTOGRAM_BINS + STATS_DIMS;

/// Working resolution for corner detection; anything larger is shrunk.
const MAX_ANALYSIS_DIM: u32 = 256;
/// FAST-9 intensity threshold.
const FAST_THRESHOLD: i16 = 20;
/// Strongest corners kept per image.
const MAX_CORNERS: usize = 256;
/// Sobel magnitude above which a pixel counts as an edge.
const EDGE_THRESHOLD: f32 = 100.0;

/// Extracts the combined feature vector for one image file.
pub fn extract_features(path: &Path) -> Result<Vec<f32>> {
    let img = image::open(path).with_context(|| format!("Failed to decode {:?}", path))?;
    let rgb = img
        .resize(MAX_ANALYSIS_DIM, MAX_ANALYSIS_DIM, image::imageops::FilterType::Triangle)
        .to_rgb8();
    let gray = image::imageops::grayscale(&rgb);

    let mut features = Vec::with_capacity(FEATURE_DIM);
    features.extend(corner_descriptor(&gray));
    features.extend(color_histogram(&rgb));
    features.extend(channel_stats(&rgb, &gray));
    debug_assert_eq!(features.len(), FEATURE_DIM);
    Ok(features)
}

/// Averaged binary corner descriptor: FAST-9 corners, each described by
/// 256 deterministic pixel comparisons packed into 32 bytes, averaged
/// across corners and scaled to [0, 1]. An image with no detectable
/// corners (flat scans, heavy blur) contributes a zero block.
fn corner_descriptor(gray: &GrayImage) -> Vec<f32> {
    let corners = fast_corners(gray);
    if corners.is_empty() {
        return vec![0.0; DESCRIPTOR_DIMS];
    }

    let pattern = comparison_pattern();
    let mut sums = [0u32; DESCRIPTOR_DIMS];
    for &(x, y) in &corners {
        let descriptor = describe_corner(gray, x, y, &pattern);
        for (sum, byte) in sums.iter_mut().zip(descriptor) {
            *sum += byte as u32;
        }
    }
    sums.iter()
        .map(|&s| s as f32 / corners.len() as f32 / 255.0)
        .collect()
}

/// Offsets of the 16-pixel Bresenham circle used by FAST.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// FAST-9: a pixel is a corner when at least 9 contiguous circle pixels
/// are all brighter or all darker than it by the threshold. Returns the
/// strongest corners, strongest first, position-ordered on ties.
fn fast_corners(gray: &GrayImage) -> Vec<(u32, u32)> {
    let (width, height) = gray.dimensions();
    if width < 8 || height < 8 {
        return Vec::new();
    }

    let mut scored = Vec::new();
    for y in 3..height - 3 {
        for x in 3..width - 3 {
            let center = gray.get_pixel(x, y)[0] as i16;
            let ring: Vec<i16> = CIRCLE
                .iter()
                .map(|&(dx, dy)| {
                    gray.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as i16
                })
                .collect();

            if let Some(score) = fast_score(center, &ring) {
                scored.push((score, x, y));
            }
        }
    }

    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
    scored
        .into_iter()
        .take(MAX_CORNERS)
        .map(|(_, x, y)| (x, y))
        .collect()
}

fn fast_score(center: i16, ring: &[i16]) -> Option<u32> {
    let brighter: Vec<bool> = ring.iter().map(|&p| p > center + FAST_THRESHOLD).collect();
    let darker: Vec<bool> = ring.iter().map(|&p| p < center - FAST_THRESHOLD).collect();
    if !has_contiguous_run(&brighter, 9) && !has_contiguous_run(&darker, 9) {
        return None;
    }
    Some(ring.iter().map(|&p| (p - center).unsigned_abs() as u32).sum())
}

/// True when the circular sequence holds a run of `n` consecutive trues.
fn has_contiguous_run(flags: &[bool], n: usize) -> bool {
    let mut run = 0;
    // Doubling the circle handles wrap-around runs.
    for &flag in flags.iter().chain(flags.iter()) {
        if flag {
            run += 1;
            if run >= n {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// 256 pixel-pair offsets in [-8, 8], fixed across runs via a seeded
/// xorshift so descriptors stay comparable between images and sessions.
fn comparison_pattern() -> Vec<((i32, i32), (i32, i32))> {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };
    let mut offset = move || {
        let v = next();
        (
            ((v & 0xFF) % 17) as i32 - 8,
            (((v >> 8) & 0xFF) % 17) as i32 - 8,
        )
    };
    (0..256).map(|_| (offset(), offset())).collect()
}

fn describe_corner(
    gray: &GrayImage,
    x: u32,
    y: u32,
    pattern: &[((i32, i32), (i32, i32))],
) -> [u8; DESCRIPTOR_DIMS] {
    let (width, height) = gray.dimensions();
    let sample = |dx: i32, dy: i32| -> u8 {
        let sx = (x as i32 + dx).clamp(0, width as i32 - 1) as u32;
        let sy = (y as i32 + dy).clamp(0, height as i32 - 1) as u32;
        gray.get_pixel(sx, sy)[0]
    };

    let mut descriptor = [0u8; DESCRIPTOR_DIMS];
    for (bit, &((ax, ay), (bx, by))) in pattern.iter().enumerate() {
        if sample(ax, ay) < sample(bx, by) {
            descriptor[bit / 8] |= 1 << (bit % 8);
        }
    }
    descriptor
}

/// Normalized 32-bin histogram per RGB channel.
fn color_histogram(rgb: &image::RgbImage) -> Vec<f32> {
    let mut bins = [[0u32; HISTOGRAM_BINS]; 3];
    for pixel in rgb.pixels() {
        for channel in 0..3 {
            bins[channel][pixel[channel] as usize * HISTOGRAM_BINS / 256] += 1;
        }
    }
    let total = (rgb.width() * rgb.height()).max(1) as f32;
    bins.iter()
        .flat_map(|channel| channel.iter().map(move |&count| count as f32 / total))
        .collect()
}

/// Per-RGB mean, spread and range, per-HSV mean and spread, edge density.
fn channel_stats(rgb: &image::RgbImage, gray: &GrayImage) -> Vec<f32> {
    let mut stats = Vec::with_capacity(STATS_DIMS);
    for channel in 0..3 {
        let values: Vec<f32> = rgb.pixels().map(|p| p[channel] as f32).collect();
        let (mean, std) = mean_std(&values);
        let (min, max) = min_max(&values);
        stats.push(mean);
        stats.push(std);
        stats.push(min);
        stats.push(max);
    }

    let mut hsv: [Vec<f32>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    for p in rgb.pixels() {
        let (h, s, v) = rgb_to_hsv(p[0], p[1], p[2]);
        hsv[0].push(h);
        hsv[1].push(s);
        hsv[2].push(v);
    }
    for values in &hsv {
        let (mean, std) = mean_std(values);
        stats.push(mean);
        stats.push(std);
    }

    stats.push(edge_density(gray));
    stats
}

/// HSV with hue in degrees [0, 360) and saturation/value in [0, 1].
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn mean_std(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
    (mean, variance.sqrt())
}

fn min_max(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    values.iter().fold((f32::MAX, f32::MIN), |(min, max), &v| {
        (min.min(v), max.max(v))
    })
}

/// Fraction of pixels whose Sobel gradient magnitude exceeds the edge
/// threshold.
fn edge_density(gray: &GrayImage) -> f32 {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }
    let p = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f32;

    let mut edges = 0u32;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let gx = p(x + 1, y - 1) + 2.0 * p(x + 1, y) + p(x + 1, y + 1)
                - p(x - 1, y - 1)
                - 2.0 * p(x - 1, y)
                - p(x - 1, y + 1);
            let gy = p(x - 1, y + 1) + 2.0 * p(x, y + 1) + p(x + 1, y + 1)
                - p(x - 1, y - 1)
                - 2.0 * p(x, y - 1)
                - p(x + 1, y - 1);
            if (gx * gx + gy * gy).sqrt() > EDGE_THRESHOLD {
                edges += 1;
            }
        }
    }
    edges as f32 / ((width - 2) * (height - 2)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(size: u32, cell: u32) -> image::RgbImage {
        image::RgbImage::from_fn(size, size, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn test_feature_vector_has_fixed_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        checkerboard(64, 8).save(&path).unwrap();
        let features = extract_features(&path).unwrap();
        assert_eq!(features.len(), FEATURE_DIM);
        assert!(features.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("img.png");
        checkerboard(64, 8).save(&path).unwrap();
        assert_eq!(
            extract_features(&path).unwrap(),
            extract_features(&path).unwrap()
        );
    }

    #[test]
    fn test_flat_image_gets_zero_descriptor_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.png");
        image::RgbImage::from_pixel(64, 64, image::Rgb([128, 128, 128]))
            .save(&path)
            .unwrap();
        let features = extract_features(&path).unwrap();
        assert!(features[..DESCRIPTOR_DIMS].iter().all(|&v| v == 0.0));
        // The histogram block still carries signal.
        assert!(features[DESCRIPTOR_DIMS..].iter().any(|&v| v > 0.0));
    }

    #[test]
    fn test_checkerboard_has_corners_and_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.png");
        checkerboard(64, 8).save(&path).unwrap();
        let features = extract_features(&path).unwrap();
        assert!(features[..DESCRIPTOR_DIMS].iter().any(|&v| v > 0.0));
        let edge = features[FEATURE_DIM - 1];
        assert!(edge > 0.0 && edge <= 1.0);
    }

    #[test]
    fn test_unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(extract_features(&path).is_err());
    }

    #[test]
    fn test_stats_block_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        image::RgbImage::from_pixel(32, 32, image::Rgb([255, 0, 0]))
            .save(&path)
            .unwrap();
        let features = extract_features(&path).unwrap();
        let stats = &features[DESCRIPTOR_DIMS + 3 * HISTOGRAM_BINS..];
        assert_eq!(stats.len(), STATS_DIMS);
        // Red channel: mean, spread, min, max.
        assert_eq!(&stats[..4], &[255.0, 0.0, 255.0, 255.0]);
        // Green and blue are flat zero.
        assert_eq!(&stats[4..8], &[0.0; 4]);
        assert_eq!(&stats[8..12], &[0.0; 4]);
        // Pure red: hue 0, full saturation and value, no spread.
        assert!(stats[12].abs() < 1e-3 && stats[13].abs() < 1e-3);
        assert!((stats[14] - 1.0).abs() < 1e-3 && stats[15].abs() < 1e-3);
        assert!((stats[16] - 1.0).abs() < 1e-3 && stats[17].abs() < 1e-3);
        // A flat image has no edges.
        assert_eq!(stats[18], 0.0);
    }

    #[test]
    fn test_hsv_primaries() {
        assert_eq!(rgb_to_hsv(255, 0, 0), (0.0, 1.0, 1.0));
        assert_eq!(rgb_to_hsv(0, 255, 0), (120.0, 1.0, 1.0));
        assert_eq!(rgb_to_hsv(0, 0, 255), (240.0, 1.0, 1.0));
        let (h, s, v) = rgb_to_hsv(128, 128, 128);
        assert_eq!((h, s), (0.0, 0.0));
        assert!((v - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_histogram_sums_to_channel_count() {
        let img = checkerboard(32, 4);
        let hist = color_histogram(&img);
        let sum: f32 = hist.iter().sum();
        assert!((sum - 3.0).abs() < 1e-3);
    }
}
