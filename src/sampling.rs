//! Box-smoothed intensity lookups shared by the binary descriptors.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::integral_image::integral_image;

/// An 8-bit image together with its integral image.
///
/// The integral image is one pixel wider and taller than the source; its
/// first row and column are zero, so the sum over the inclusive rectangle
/// `[x0, x1] x [y0, y1]` is `I(x1+1, y1+1) - I(x0, y1+1) - I(x1+1, y0) + I(x0, y0)`.
pub struct SmoothedImage<'a> {
    image: &'a GrayImage,
    integral: ImageBuffer<Luma<u32>, Vec<u32>>,
}

impl<'a> SmoothedImage<'a> {
    pub fn new(image: &'a GrayImage) -> Self {
        Self {
            image,
            integral: integral_image::<_, u32>(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Sum and pixel count of the inclusive rectangle, clamped to the image.
    pub fn box_sum(&self, x0: i64, y0: i64, x1: i64, y1: i64) -> (u32, u32) {
        let max_x = i64::from(self.width()) - 1;
        let max_y = i64::from(self.height()) - 1;
        let x0 = x0.clamp(0, max_x) as u32;
        let y0 = y0.clamp(0, max_y) as u32;
        let x1 = x1.clamp(0, max_x) as u32 + 1;
        let y1 = y1.clamp(0, max_y) as u32 + 1;
        let at = |x: u32, y: u32| self.integral.get_pixel(x, y)[0];
        let sum = (at(x1, y1) + at(x0, y0)) - (at(x0, y1) + at(x1, y0));
        (sum, (x1 - x0) * (y1 - y0))
    }

    /// Mean intensity over a square around the pattern point `origin + offset`.
    ///
    /// The square has a side of `2 * radius.round() + 1` pixels and is centered
    /// on the pixel nearest to the point. The offset is rounded apart from the
    /// integer part of the origin, so moving the origin by whole pixels moves the
    /// square by exactly as many pixels. Radii below half a pixel fall back to
    /// bilinear interpolation.
    pub fn smoothed_intensity(&self, origin: (f32, f32), offset: (f32, f32), radius: f32) -> f32 {
        if radius < 0.5 {
            return self.bilinear(origin.0 + offset.0, origin.1 + offset.1);
        }
        let half = radius.round() as i64;
        let cx = nearest_pixel(origin.0, offset.0);
        let cy = nearest_pixel(origin.1, offset.1);
        let (sum, count) = self.box_sum(cx - half, cy - half, cx + half, cy + half);
        sum as f32 / count as f32
    }

    pub fn bilinear(&self, x: f32, y: f32) -> f32 {
        let max_x = (self.width() - 1) as f32;
        let max_y = (self.height() - 1) as f32;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.width() - 1);
        let y1 = (y0 + 1).min(self.height() - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let p = |x: u32, y: u32| f32::from(self.image.get_pixel(x, y)[0]);
        let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
        let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

/// Set bit `index` of a packed descriptor (least significant bit first).
pub fn set_bit(bytes: &mut [u8], index: usize) {
    bytes[index / 8] |= 1 << (index % 8);
}

/// The pixel nearest to `origin + offset`.
fn nearest_pixel(origin: f32, offset: f32) -> i64 {
    let base = origin.round();
    base as i64 + (origin - base + offset).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_sum_matches_direct_sum() {
        let image = GrayImage::from_fn(9, 7, |x, y| Luma([(x * 3 + y * 5) as u8]));
        let smoothed = SmoothedImage::new(&image);
        let direct: u32 = (2..=5)
            .flat_map(|y| (1..=4).map(move |x| (x * 3 + y * 5) as u32))
            .sum();
        assert_eq!(smoothed.box_sum(1, 2, 4, 5), (direct, 16));
    }

    #[test]
    fn smoothed_intensity_of_flat_image() {
        let image = GrayImage::from_pixel(20, 20, Luma([77]));
        let smoothed = SmoothedImage::new(&image);
        let mean = |origin, offset, radius| smoothed.smoothed_intensity(origin, offset, radius);
        assert!((mean((10.3, 9.7), (0.0, 0.0), 2.4) - 77.0).abs() < 1e-4);
        assert!((mean((10.3, 9.7), (0.0, 0.0), 0.2) - 77.0).abs() < 1e-4);
        // Rectangles leaving the image are clamped.
        assert!((mean((0.0, 0.0), (0.0, 0.0), 3.0) - 77.0).abs() < 1e-4);
    }

    #[test]
    fn box_moves_with_whole_pixel_shifts() {
        let image = GrayImage::from_fn(64, 48, |x, y| Luma([((x * 7 + y * 13) % 251) as u8]));
        let smoothed = SmoothedImage::new(&image);
        // Offsets on and around rounding ties.
        for &offset in &[(5.5, -2.5), (3.667, 1.833), (5.499_999_5, 0.500_000_1), (-1.5, 4.5)] {
            let reference = smoothed.smoothed_intensity((20.0, 17.0), offset, 1.833);
            for &(sx, sy) in &[(1.0, 0.0), (10.0, 10.0), (23.0, 19.0)] {
                let origin = (20.0 + sx, 17.0 + sy);
                let shifted = smoothed.smoothed_intensity(origin, offset, 1.833);
                let expected = {
                    let (cx, cy) = (nearest_pixel(20.0, offset.0), nearest_pixel(17.0, offset.1));
                    let (cx, cy) = (cx + sx as i64, cy + sy as i64);
                    let (sum, count) = smoothed.box_sum(cx - 2, cy - 2, cx + 2, cy + 2);
                    sum as f32 / count as f32
                };
                assert_eq!(shifted, expected, "offset {:?} shift {:?}", offset, (sx, sy));
            }
            assert!(reference.is_finite());
        }
    }

    #[test]
    fn nearest_pixel_rounds_the_offset_alone() {
        assert_eq!(nearest_pixel(62.0, 5.5), 68);
        assert_eq!(nearest_pixel(52.0, 5.5), 58);
        assert_eq!(nearest_pixel(62.0, -2.5), 59);
        assert_eq!(nearest_pixel(10.4, 0.2), 11);
        assert_eq!(nearest_pixel(10.4, 0.0), 10);
    }

    #[test]
    fn bits_are_packed_lsb_first() {
        let mut bytes = [0u8; 2];
        set_bit(&mut bytes, 0);
        set_bit(&mut bytes, 9);
        assert_eq!(bytes, [0b0000_0001, 0b0000_0010]);
    }
}
