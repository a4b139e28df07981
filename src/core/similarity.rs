use image::imageops::{self, FilterType};
use image::GrayImage;

/// Number of positions where the two bit strings differ. Only the common
/// prefix is compared when lengths disagree.
pub fn hamming_distance(a: &str, b: &str) -> u32 {
    a.bytes().zip(b.bytes()).filter(|(x, y)| x != y).count() as u32
}

/// Confirmation score in `[0, 1]`: one minus the mean absolute pixel
/// difference scaled by 255. The second image is resized to the first's
/// dimensions when they differ.
pub fn confirmation_score(first: &GrayImage, second: &GrayImage) -> f64 {
    if first.width() == 0 || first.height() == 0 || second.width() == 0 || second.height() == 0
    {
        return 0.0;
    }

    let resized;
    let second = if first.dimensions() == second.dimensions() {
        second
    } else {
        resized = imageops::resize(second, first.width(), first.height(), FilterType::Triangle);
        &resized
    };

    let total: u64 = first
        .as_raw()
        .iter()
        .zip(second.as_raw())
        .map(|(&a, &b)| a.abs_diff(b) as u64)
        .sum();
    let mean_diff = total as f64 / first.as_raw().len() as f64;

    if mean_diff > 255.0 {
        return 0.0;
    }
    1.0 - mean_diff / 255.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_hamming_distance() {
        let a = "0101".repeat(16);
        let b = "1010".repeat(16);
        assert_eq!(hamming_distance(&a, &a), 0);
        assert_eq!(hamming_distance(&a, &b), 64);
        assert_eq!(hamming_distance(&a, &b), hamming_distance(&b, &a));
        assert_eq!(hamming_distance("0000", "0001"), 1);
        assert_eq!(hamming_distance("0000", "11"), 2);
        assert_eq!(hamming_distance("", "1111"), 0);
    }

    #[test]
    fn test_identical_images_score_one() {
        let img = GrayImage::from_fn(40, 30, |x, y| Luma([((x + y) % 256) as u8]));
        assert_eq!(confirmation_score(&img, &img), 1.0);
    }

    #[test]
    fn test_score_reflects_mean_difference() {
        let black = GrayImage::from_pixel(10, 10, Luma([0]));
        let white = GrayImage::from_pixel(10, 10, Luma([255]));
        let grey = GrayImage::from_pixel(10, 10, Luma([51]));

        assert_eq!(confirmation_score(&black, &white), 0.0);
        assert!((confirmation_score(&black, &grey) - 0.8).abs() < 1e-12);
        assert_eq!(
            confirmation_score(&black, &grey),
            confirmation_score(&grey, &black)
        );
    }

    #[test]
    fn test_score_decreases_with_difference() {
        let base = GrayImage::from_pixel(16, 16, Luma([100]));
        let mut previous = 1.0;
        for delta in [5u8, 20, 60, 120] {
            let other = GrayImage::from_pixel(16, 16, Luma([100 + delta]));
            let score = confirmation_score(&base, &other);
            assert!(score < previous);
            previous = score;
        }
    }

    #[test]
    fn test_mismatched_dimensions_are_resized() {
        let small = GrayImage::from_pixel(20, 10, Luma([90]));
        let large = GrayImage::from_pixel(200, 100, Luma([90]));
        assert_eq!(confirmation_score(&small, &large), 1.0);
    }

    #[test]
    fn test_empty_image_scores_zero() {
        let empty = GrayImage::new(0, 0);
        let img = GrayImage::from_pixel(4, 4, Luma([1]));
        assert_eq!(confirmation_score(&empty, &img), 0.0);
        assert_eq!(confirmation_score(&img, &empty), 0.0);
    }
}
