//! Wavelet hash: Haar low-frequency band of a power-of-two grayscale
//! thumbnail, thresholded at its median. Not provided by image_hasher.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};

use crate::engine::features::HashBits;

const HASH_SIDE: u32 = 8;
/// Largest working resolution; the LL band barely changes above this.
const MAX_SCALE: u32 = 256;

pub fn wavelet_hash(image: &DynamicImage) -> HashBits {
    let gray = image.to_luma8();
    let scale = working_scale(gray.width().min(gray.height()));
    let resized = imageops::resize(&gray, scale, scale, FilterType::Lanczos3);
    let band = haar_low_band(&resized);
    median_bits(&band)
}

/// Largest power of two not above `min_side`, clamped to `HASH_SIDE..=MAX_SCALE`.
fn working_scale(min_side: u32) -> u32 {
    if min_side < HASH_SIDE {
        return HASH_SIDE;
    }
    let pow2 = 1u32 << (31 - min_side.leading_zeros());
    pow2.min(MAX_SCALE)
}

/// Repeated 2-D Haar decomposition keeping only the LL quadrant until it is
/// `HASH_SIDE` wide.
fn haar_low_band(image: &GrayImage) -> Vec<f32> {
    let mut side = image.width() as usize;
    let mut values: Vec<f32> = image.pixels().map(|p| f32::from(p[0]) / 255.0).collect();

    while side > HASH_SIDE as usize {
        let half = side / 2;
        let mut next = vec![0.0f32; half * half];
        for y in 0..half {
            for x in 0..half {
                let top = 2 * y * side + 2 * x;
                let bottom = top + side;
                next[y * half + x] =
                    (values[top] + values[top + 1] + values[bottom] + values[bottom + 1]) / 2.0;
            }
        }
        values = next;
        side = half;
    }

    values
}

/// Bit i (row-major) is set when coefficient i is above the median.
fn median_bits(values: &[f32]) -> HashBits {
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };

    let bits = values
        .iter()
        .enumerate()
        .filter(|(_, v)| **v > median)
        .fold(0u64, |acc, (i, _)| acc | 1 << (63 - i));
    HashBits(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let img = ImageBuffer::from_fn(width, height, |x, _y| {
            let intensity = (x * 255 / width.max(1)) as u8;
            Rgb([intensity, intensity, intensity])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_working_scale() {
        assert_eq!(working_scale(3), 8);
        assert_eq!(working_scale(8), 8);
        assert_eq!(working_scale(100), 64);
        assert_eq!(working_scale(4000), MAX_SCALE);
    }

    #[test]
    fn test_uniform_image_has_no_bits() {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(32, 32, Rgb([90, 90, 90])));
        assert_eq!(wavelet_hash(&img), HashBits(0));
    }

    #[test]
    fn test_gradient_sets_right_half() {
        let hash = wavelet_hash(&gradient(64, 64));
        assert_eq!(hash.0.count_ones(), 32);
        // Every row reads 00001111.
        assert_eq!(hash, HashBits(0x0f0f_0f0f_0f0f_0f0f));
    }

    #[test]
    fn test_stable_under_scaling() {
        let large = wavelet_hash(&gradient(512, 512));
        let small = wavelet_hash(&gradient(64, 64));
        assert!(large.distance(&small) <= 2);
    }
}
