//! 64-bit image fingerprints.
//!
//! Both hashes are rendered as 64-character strings of `'0'`/`'1'` in
//! row-major order. The resampling filter and the region layout are part of
//! the stored format: two indexes are only comparable if they were built with
//! the same area-average downscale and the same grid order.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

pub const HASH_BITS: usize = 64;

const AVERAGE_SIDE: u32 = 8;
const PERCEPTUAL_SIDE: u32 = 32;
const REGIONS_PER_SIDE: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprints {
    pub average: String,
    pub perceptual: String,
}

impl Fingerprints {
    pub fn compute(image: &GrayImage) -> Self {
        Self {
            average: average_hash(image),
            perceptual: perceptual_hash(image),
        }
    }
}

/// aHash: 8x8 area-average downscale, one bit per sample, set when the
/// sample is at or above the mean of all 64 samples.
pub fn average_hash(image: &GrayImage) -> String {
    let small = resize_area(image, AVERAGE_SIDE, AVERAGE_SIDE);
    let samples: Vec<f64> = small.pixels().map(|p| p[0] as f64).collect();
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;

    samples
        .iter()
        .map(|&v| if v >= mean { '1' } else { '0' })
        .collect()
}

/// pHash as used by this index: 32x32 area-average downscale, an 8x8 grid of
/// 4x4 region means, one bit per region set when the mean is strictly above
/// the median of the 64 means.
pub fn perceptual_hash(image: &GrayImage) -> String {
    let small = resize_area(image, PERCEPTUAL_SIDE, PERCEPTUAL_SIDE);
    let means = region_means(&small, REGIONS_PER_SIDE);
    let median = median(&means);

    means
        .iter()
        .map(|&v| if v > median { '1' } else { '0' })
        .collect()
}

fn region_means(image: &GrayImage, regions: u32) -> Vec<f64> {
    let region_w = image.width() / regions;
    let region_h = image.height() / regions;
    let area = (region_w * region_h) as f64;
    let mut means = Vec::with_capacity((regions * regions) as usize);

    for ry in 0..regions {
        for rx in 0..regions {
            let mut sum = 0u32;
            for y in ry * region_h..(ry + 1) * region_h {
                for x in rx * region_w..(rx + 1) * region_w {
                    sum += image.get_pixel(x, y)[0] as u32;
                }
            }
            means.push(sum as f64 / area);
        }
    }

    means
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Area-average resampling: every output pixel is the mean of the source
/// area it covers, with fractional edge pixels weighted by their overlap.
/// Results are rounded half-to-even into 8 bits.
pub fn resize_area(image: &GrayImage, width: u32, height: u32) -> GrayImage {
    let (src_w, src_h) = image.dimensions();
    if src_w == 0 || src_h == 0 || width == 0 || height == 0 {
        return GrayImage::new(width, height);
    }
    if (src_w, src_h) == (width, height) {
        return image.clone();
    }

    let x_weights = axis_weights(src_w, width);
    let y_weights = axis_weights(src_h, height);

    // Horizontal pass: each source row collapses to `width` columns.
    let mut rows = vec![0f64; (src_h * width) as usize];
    for y in 0..src_h {
        let out_row = &mut rows[(y * width) as usize..((y + 1) * width) as usize];
        for (ox, taps) in x_weights.iter().enumerate() {
            out_row[ox] = taps
                .iter()
                .map(|&(sx, w)| image.get_pixel(sx, y)[0] as f64 * w)
                .sum();
        }
    }

    GrayImage::from_fn(width, height, |ox, oy| {
        let value: f64 = y_weights[oy as usize]
            .iter()
            .map(|&(sy, w)| rows[(sy * width + ox) as usize] * w)
            .sum();
        Luma([value.round_ties_even().clamp(0.0, 255.0) as u8])
    })
}

/// For each output index, the contributing source indices and their
/// normalised weights (summing to 1).
fn axis_weights(src: u32, dst: u32) -> Vec<Vec<(u32, f64)>> {
    let scale = src as f64 / dst as f64;

    (0..dst)
        .map(|o| {
            let start = o as f64 * scale;
            let end = ((o + 1) as f64 * scale).min(src as f64);
            let first = start.floor() as u32;
            let last = (end.ceil() as u32).min(src);

            let mut taps: Vec<(u32, f64)> = (first..last)
                .filter_map(|i| {
                    let overlap = end.min(i as f64 + 1.0) - start.max(i as f64);
                    (overlap > 1e-12).then_some((i, overlap))
                })
                .collect();

            let total: f64 = taps.iter().map(|&(_, w)| w).sum();
            for tap in &mut taps {
                tap.1 /= total;
            }
            taps
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x * 7 + y * 3) % 256) as u8]))
    }

    fn is_bit_string(hash: &str) -> bool {
        hash.len() == HASH_BITS && hash.chars().all(|c| c == '0' || c == '1')
    }

    #[test]
    fn test_hash_shape() {
        for (w, h) in [(8, 8), (32, 32), (640, 480), (7, 3), (1, 1), (1000, 17)] {
            let img = gradient(w, h);
            assert!(is_bit_string(&average_hash(&img)), "aHash {}x{}", w, h);
            assert!(is_bit_string(&perceptual_hash(&img)), "pHash {}x{}", w, h);
        }
    }

    #[test]
    fn test_hashes_are_deterministic() {
        let img = gradient(333, 222);
        assert_eq!(Fingerprints::compute(&img), Fingerprints::compute(&img));
    }

    #[test]
    fn test_average_hash_on_halves() {
        // Left half dark, right half bright.
        let img = GrayImage::from_fn(64, 64, |x, _| Luma([if x < 32 { 10 } else { 200 }]));
        let hash = average_hash(&img);
        for row in 0..8 {
            assert_eq!(&hash[row * 8..row * 8 + 8], "00001111");
        }
    }

    #[test]
    fn test_flat_image_hashes() {
        let img = GrayImage::from_pixel(50, 50, Luma([128]));
        // Every sample equals the mean; every region equals the median.
        assert_eq!(average_hash(&img), "1".repeat(64));
        assert_eq!(perceptual_hash(&img), "0".repeat(64));
    }

    #[test]
    fn test_perceptual_hash_brightness_shift_invariance() {
        let img = GrayImage::from_fn(128, 128, |x, y| Luma([((x + 2 * y) / 2) as u8]));
        let brighter = GrayImage::from_fn(128, 128, |x, y| {
            Luma([img.get_pixel(x, y)[0].saturating_add(20)])
        });
        assert!(img.pixels().all(|p| p[0] <= 235));
        assert_eq!(perceptual_hash(&img), perceptual_hash(&brighter));
    }

    #[test]
    fn test_resize_area_integer_ratio_is_box_mean() {
        let img = GrayImage::from_fn(4, 4, |x, y| Luma([(x + 4 * y) as u8 * 10]));
        let small = resize_area(&img, 2, 2);
        // Top-left block: 0, 10, 40, 50 -> 25
        assert_eq!(small.get_pixel(0, 0)[0], 25);
        // Bottom-right block: 100, 110, 140, 150 -> 125
        assert_eq!(small.get_pixel(1, 1)[0], 125);
    }

    #[test]
    fn test_resize_area_fractional_ratio_preserves_flat_value() {
        let img = GrayImage::from_pixel(13, 9, Luma([77]));
        let small = resize_area(&img, 8, 8);
        assert!(small.pixels().all(|p| p[0] == 77));

        let large = resize_area(&GrayImage::from_pixel(3, 2, Luma([9])), 8, 8);
        assert!(large.pixels().all(|p| p[0] == 9));
    }

    #[test]
    fn test_axis_weights_sum_to_one() {
        for (src, dst) in [(10, 8), (8, 8), (3, 8), (1000, 32)] {
            for taps in axis_weights(src, dst) {
                let total: f64 = taps.iter().map(|&(_, w)| w).sum();
                assert!((total - 1.0).abs() < 1e-9);
                assert!(taps.iter().all(|&(i, _)| i < src));
            }
        }
    }
}
