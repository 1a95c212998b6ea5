use super::{ensure_not_empty, FeatureDetector};
use crate::image::{reflect_101, sobel_horizontal, sobel_vertical, GrayFloatImage};
use crate::{KeyPoint, Result};
use float_ord::FloatOrd;
use image::GrayImage;
use log::debug;
use ndarray::{azip, Array2};

/// Corner detection on the structure tensor ("good features to track").
///
/// The response is either the minimum eigenvalue of the gradient covariance
/// over a `block_size` window (Shi-Tomasi) or the Harris measure
/// `det - k * trace^2`. Corners are local maxima above `quality_level` times
/// the strongest response, taken strongest first while keeping a minimum
/// distance of `(1 - max_overlap) * block_size` between them.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GoodFeatures {
    /// Size of the averaging window of the gradient covariance.
    pub block_size: usize,
    /// Allowed overlap between the windows of two corners, in `[0, 1]`.
    pub max_overlap: f32,
    pub quality_level: f32,
    /// Harris free parameter.
    pub k: f32,
    pub use_harris: bool,
}

impl Default for GoodFeatures {
    fn default() -> Self {
        Self::shi_tomasi()
    }
}

impl GoodFeatures {
    pub fn shi_tomasi() -> Self {
        Self {
            block_size: 4,
            max_overlap: 0.0,
            quality_level: 0.01,
            k: 0.04,
            use_harris: false,
        }
    }

    pub fn harris() -> Self {
        Self {
            use_harris: true,
            ..Self::shi_tomasi()
        }
    }

    pub fn min_distance(&self) -> f32 {
        (1.0 - self.max_overlap) * self.block_size as f32
    }

    /// The largest number of corners reported for an image of this size.
    pub fn max_corners(&self, width: usize, height: usize) -> usize {
        ((width * height) as f32 / self.min_distance().max(1.0)) as usize
    }

    /// The corner response of every pixel, indexed `[(y, x)]`.
    pub fn response(&self, image: &GrayImage) -> Array2<f32> {
        let image = GrayFloatImage::from_gray(image);
        // Normalizes the Sobel gradients of 8-bit data.
        let scale = 1.0 / (4.0 * self.block_size as f32 * 255.0);
        let dx = sobel_horizontal(&image).to_array2() * scale;
        let dy = sobel_vertical(&image).to_array2() * scale;

        let mut dxx = Array2::zeros(dx.dim());
        let mut dxy = Array2::zeros(dx.dim());
        let mut dyy = Array2::zeros(dx.dim());
        azip!((xx in &mut dxx, xy in &mut dxy, yy in &mut dyy, &x in &dx, &y in &dy) {
            *xx = x * x;
            *xy = x * y;
            *yy = y * y;
        });
        let dxx = box_sum(&dxx, self.block_size);
        let dxy = box_sum(&dxy, self.block_size);
        let dyy = box_sum(&dyy, self.block_size);

        let mut response = Array2::zeros(dx.dim());
        let (use_harris, k) = (self.use_harris, self.k);
        azip!((r in &mut response, &a in &dxx, &b in &dxy, &c in &dyy) {
            *r = if use_harris {
                a * c - b * b - k * (a + c) * (a + c)
            } else {
                let (a, c) = (a * 0.5, c * 0.5);
                (a + c) - ((a - c) * (a - c) + b * b).sqrt()
            };
        });
        response
    }
}

/// Unnormalized box filter of width `block` with the anchor at `block / 2`.
fn box_sum(src: &Array2<f32>, block: usize) -> Array2<f32> {
    let (height, width) = src.dim();
    let anchor = (block / 2) as isize;
    let rows = Array2::from_shape_fn((height, width), |(y, x)| {
        (0..block as isize)
            .map(|i| src[(y, reflect_101(x as isize + i - anchor, width))])
            .sum::<f32>()
    });
    Array2::from_shape_fn((height, width), |(y, x)| {
        (0..block as isize)
            .map(|i| rows[(reflect_101(y as isize + i - anchor, height), x)])
            .sum::<f32>()
    })
}

/// 3x3 local maxima above `threshold`, excluding the image border.
fn local_maxima(response: &Array2<f32>, threshold: f32) -> Vec<(usize, usize, f32)> {
    let (height, width) = response.dim();
    let mut maxima = vec![];
    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            let value = response[(y, x)];
            if value <= threshold {
                continue;
            }
            let is_max = (y - 1..=y + 1)
                .flat_map(|ny| (x - 1..=x + 1).map(move |nx| (ny, nx)))
                .all(|idx| response[idx] <= value);
            if is_max {
                maxima.push((x, y, value));
            }
        }
    }
    maxima
}

impl FeatureDetector for GoodFeatures {
    fn name(&self) -> &'static str {
        if self.use_harris {
            "Harris"
        } else {
            "Shi-Tomasi"
        }
    }

    fn detect(&self, image: &GrayImage) -> Result<Vec<KeyPoint>> {
        ensure_not_empty(image)?;
        let (width, height) = (image.width() as usize, image.height() as usize);
        let response = self.response(image);
        let max = response.iter().copied().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return Ok(vec![]);
        }

        let mut candidates = local_maxima(&response, max * self.quality_level);
        candidates.sort_by_key(|&(_, _, value)| std::cmp::Reverse(FloatOrd(value)));
        debug!("{} corner candidates", candidates.len());

        let max_corners = self.max_corners(width, height);
        let min_distance = self.min_distance();
        let mut keypoints = Vec::new();
        if min_distance < 1.0 {
            keypoints.extend(candidates.iter().take(max_corners).map(|&c| self.keypoint(c)));
            return Ok(keypoints);
        }

        // Accepted corners bucketed into cells of the minimum distance.
        let cell = min_distance.round() as usize;
        let grid_width = (width + cell - 1) / cell;
        let grid_height = (height + cell - 1) / cell;
        let mut grid: Vec<Vec<(usize, usize)>> = vec![vec![]; grid_width * grid_height];
        let min_distance_sq = min_distance * min_distance;

        for &(x, y, value) in &candidates {
            let (cx, cy) = (x / cell, y / cell);
            let too_close = (cy.saturating_sub(1)..=(cy + 1).min(grid_height - 1))
                .flat_map(|gy| {
                    (cx.saturating_sub(1)..=(cx + 1).min(grid_width - 1)).map(move |gx| (gx, gy))
                })
                .flat_map(|(gx, gy)| grid[gy * grid_width + gx].iter())
                .any(|&(ox, oy)| {
                    let dx = x as f32 - ox as f32;
                    let dy = y as f32 - oy as f32;
                    dx * dx + dy * dy < min_distance_sq
                });
            if too_close {
                continue;
            }
            grid[cy * grid_width + cx].push((x, y));
            keypoints.push(self.keypoint((x, y, value)));
            if keypoints.len() == max_corners {
                break;
            }
        }
        Ok(keypoints)
    }
}

impl GoodFeatures {
    fn keypoint(&self, (x, y, value): (usize, usize, f32)) -> KeyPoint {
        KeyPoint {
            response: value,
            ..KeyPoint::new(x as f32, y as f32, self.block_size as f32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// A bright square on a dark background.
    fn square() -> GrayImage {
        GrayImage::from_fn(60, 60, |x, y| {
            if (20..40).contains(&x) && (20..40).contains(&y) {
                Luma([200])
            } else {
                Luma([20])
            }
        })
    }

    fn near(keypoints: &[KeyPoint], x: f32, y: f32) -> bool {
        keypoints
            .iter()
            .any(|kp| (kp.x() - x).abs() <= 2.0 && (kp.y() - y).abs() <= 2.0)
    }

    #[test]
    fn tracking_parameters() {
        let detector = GoodFeatures::shi_tomasi();
        assert_eq!(detector.min_distance(), 4.0);
        assert_eq!(detector.max_corners(640, 480), 640 * 480 / 4);
        assert!(GoodFeatures::harris().use_harris);
    }

    #[test]
    fn box_sum_of_ones_counts_window() {
        let ones = Array2::from_elem((6, 6), 1.0f32);
        let sums = box_sum(&ones, 4);
        assert!(sums.iter().all(|&v| (v - 16.0).abs() < 1e-6));
    }

    #[test]
    fn shi_tomasi_finds_square_corners() {
        let keypoints = GoodFeatures::shi_tomasi().detect(&square()).unwrap();
        for &(x, y) in &[(20.0, 20.0), (39.0, 20.0), (20.0, 39.0), (39.0, 39.0)] {
            assert!(near(&keypoints, x, y), "no corner near ({}, {})", x, y);
        }
        assert!(keypoints.iter().all(|kp| kp.size == 4.0 && !kp.is_oriented()));
    }

    #[test]
    fn harris_finds_square_corners() {
        let keypoints = GoodFeatures::harris().detect(&square()).unwrap();
        for &(x, y) in &[(20.0, 20.0), (39.0, 20.0), (20.0, 39.0), (39.0, 39.0)] {
            assert!(near(&keypoints, x, y), "no corner near ({}, {})", x, y);
        }
        // Straight edges are not corners.
        assert!(!near(&keypoints, 30.0, 20.0));
    }

    #[test]
    fn corners_respect_min_distance() {
        let keypoints = GoodFeatures::shi_tomasi().detect(&square()).unwrap();
        for (i, a) in keypoints.iter().enumerate() {
            for b in &keypoints[i + 1..] {
                let d = ((a.x() - b.x()).powi(2) + (a.y() - b.y()).powi(2)).sqrt();
                assert!(d >= 4.0);
            }
        }
        // Sorted strongest first.
        assert!(keypoints
            .windows(2)
            .all(|w| w[0].response >= w[1].response));
    }
}
