//! Oriented FAST and rotated BRIEF.
//!
//! FAST-9 corners are found on every level of a scale pyramid, ranked by their
//! Harris response and oriented with the intensity centroid of a circular
//! patch. The descriptor is a BRIEF test pattern rotated by that orientation
//! and evaluated on the blurred pyramid level.

use crate::descriptor::DescriptorExtractor;
use crate::detector::{ensure_not_empty, FeatureDetector};
use crate::image::scale_down;
use crate::sampling::set_bit;
use crate::{DescriptorKind, Descriptors, KeyPoint, Result};
use float_ord::FloatOrd;
use image::GrayImage;
use imageproc::corners::corners_fast9;
use imageproc::filter::gaussian_blur_f32;
use imageproc::suppress::local_maxima;
use log::debug;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

/// Number of binary tests, 32 bytes.
const ORB_TESTS: usize = 256;
const HARRIS_BLOCK_SIZE: i64 = 7;
const HARRIS_K: f32 = 0.04;
/// Blur applied to every level before sampling the descriptor.
const DESCRIPTOR_SIGMA: f32 = 2.0;
const PATTERN_SEED: u64 = 0x3498_5739;

/// ORB detector and descriptor configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Orb {
    /// Maximum number of keypoints over all levels.
    pub n_features: usize,
    /// Size ratio between consecutive pyramid levels.
    pub scale_factor: f32,
    pub n_levels: usize,
    /// Keypoints closer than this to the border of a level are dropped.
    pub edge_threshold: u32,
    /// Diameter of the oriented patch at level zero.
    pub patch_size: u32,
    pub fast_threshold: u8,
}

impl Default for Orb {
    fn default() -> Self {
        Self {
            n_features: 500,
            scale_factor: 1.2,
            n_levels: 8,
            edge_threshold: 31,
            patch_size: 31,
            fast_threshold: 20,
        }
    }
}

struct Level {
    scale: f32,
    image: GrayImage,
}

impl Orb {
    pub fn new(n_features: usize) -> Self {
        Self {
            n_features,
            ..Self::default()
        }
    }

    /// Radius of the oriented patch; patches narrower than three pixels are
    /// widened to three.
    fn half_patch(&self) -> i64 {
        i64::from(self.patch_size / 2).max(1)
    }

    fn pyramid(&self, image: &GrayImage) -> Vec<Level> {
        (0..self.n_levels.max(1))
            .map(|level| {
                let scale = self.scale_factor.powi(level as i32);
                let image = if level == 0 {
                    image.clone()
                } else {
                    scale_down(image, scale)
                };
                Level { scale, image }
            })
            .collect()
    }

    /// Keypoint budget of every level, a geometric series summing to `n_features`.
    fn features_per_level(&self) -> Vec<usize> {
        let n_levels = self.n_levels.max(1);
        let factor = 1.0 / self.scale_factor;
        let mut desired = self.n_features as f32 * (1.0 - factor)
            / (1.0 - factor.powi(n_levels as i32));
        let mut budgets = Vec::with_capacity(n_levels);
        let mut total = 0;
        for _ in 0..n_levels - 1 {
            let n = desired.round() as usize;
            budgets.push(n);
            total += n;
            desired *= factor;
        }
        budgets.push(self.n_features.saturating_sub(total));
        budgets
    }

    /// Sample offsets of the circular patch: the half width of every row.
    fn umax(&self) -> Vec<i64> {
        let half = self.half_patch();
        let vmax = (half as f32 * std::f32::consts::FRAC_1_SQRT_2 + 1.0).floor() as i64;
        let vmin = (half as f32 * std::f32::consts::FRAC_1_SQRT_2).ceil() as i64;
        let mut umax = vec![0i64; half as usize + 2];
        for v in 0..=vmax.min(half) {
            umax[v as usize] = ((half * half - v * v) as f32).sqrt().round() as i64;
        }
        // Make the patch symmetric about the diagonal.
        let mut v0 = 0usize;
        let mut v = half;
        while v >= vmin {
            while umax[v0] == umax[v0 + 1] {
                v0 += 1;
            }
            umax[v as usize] = v0 as i64;
            v0 += 1;
            v -= 1;
        }
        umax.truncate(half as usize + 1);
        umax
    }

    /// Random test pairs uniformly distributed over the patch.
    fn pattern(&self) -> Vec<[(i64, i64); 2]> {
        let half = self.half_patch();
        let mut rng = Pcg64::seed_from_u64(PATTERN_SEED);
        let mut point = || (rng.gen_range(-half..=half), rng.gen_range(-half..=half));
        (0..ORB_TESTS).map(|_| [point(), point()]).collect()
    }
}

fn pixel(image: &GrayImage, x: i64, y: i64) -> f32 {
    let x = x.clamp(0, i64::from(image.width()) - 1) as u32;
    let y = y.clamp(0, i64::from(image.height()) - 1) as u32;
    f32::from(image.get_pixel(x, y)[0])
}

/// Harris measure over a block centered on the pixel, with Sobel gradients.
fn harris_response(image: &GrayImage, x: i64, y: i64) -> f32 {
    let r = HARRIS_BLOCK_SIZE / 2;
    let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
    for v in -r..=HARRIS_BLOCK_SIZE - r - 1 {
        for u in -r..=HARRIS_BLOCK_SIZE - r - 1 {
            let (px, py) = (x + u, y + v);
            let p = |dx: i64, dy: i64| pixel(image, px + dx, py + dy);
            let dx = (p(1, 0) - p(-1, 0)) * 2.0 + (p(1, -1) - p(-1, -1)) + (p(1, 1) - p(-1, 1));
            let dy = (p(0, 1) - p(0, -1)) * 2.0 + (p(-1, 1) - p(-1, -1)) + (p(1, 1) - p(1, -1));
            a += dx * dx;
            b += dy * dy;
            c += dx * dy;
        }
    }
    let scale = 1.0 / (4.0 * HARRIS_BLOCK_SIZE as f32 * 255.0);
    let scale_sq_sq = scale * scale * scale * scale;
    (a * b - c * c - HARRIS_K * (a + b) * (a + b)) * scale_sq_sq
}

/// Orientation of the intensity centroid in degrees.
fn intensity_centroid_angle(image: &GrayImage, x: i64, y: i64, umax: &[i64]) -> f32 {
    let (mut m_01, mut m_10) = (0.0f32, 0.0f32);
    let half = umax.len() as i64 - 1;
    for v in -half..=half {
        let d = umax[v.unsigned_abs() as usize];
        for u in -d..=d {
            let value = pixel(image, x + u, y + v);
            m_10 += u as f32 * value;
            m_01 += v as f32 * value;
        }
    }
    m_01.atan2(m_10).to_degrees().rem_euclid(360.0)
}

impl FeatureDetector for Orb {
    fn name(&self) -> &'static str {
        "ORB"
    }

    fn detect(&self, image: &GrayImage) -> Result<Vec<KeyPoint>> {
        ensure_not_empty(image)?;
        let umax = self.umax();
        let border = self.edge_threshold;
        let mut keypoints = vec![];
        for (octave, (level, budget)) in self
            .pyramid(image)
            .iter()
            .zip(self.features_per_level())
            .enumerate()
        {
            let (width, height) = level.image.dimensions();
            if width <= 2 * border || height <= 2 * border {
                break;
            }
            let fast = corners_fast9(&level.image, self.fast_threshold);
            let mut corners: Vec<_> = local_maxima(&fast, 1)
                .into_iter()
                .filter(|c| {
                    c.x >= border && c.y >= border && c.x < width - border && c.y < height - border
                })
                .collect();
            debug!("ORB level {} has {} FAST corners", octave, corners.len());

            // Keep twice the budget by FAST score, then rank by Harris response.
            corners.sort_by_key(|c| std::cmp::Reverse(FloatOrd(c.score)));
            corners.truncate(2 * budget);
            let mut ranked: Vec<(f32, u32, u32)> = corners
                .iter()
                .map(|c| (harris_response(&level.image, c.x.into(), c.y.into()), c.x, c.y))
                .collect();
            ranked.sort_by_key(|&(response, _, _)| std::cmp::Reverse(FloatOrd(response)));
            ranked.truncate(budget);

            for (response, x, y) in ranked {
                let angle = intensity_centroid_angle(&level.image, x.into(), y.into(), &umax);
                keypoints.push(KeyPoint {
                    point: (x as f32 * level.scale, y as f32 * level.scale),
                    size: self.patch_size as f32 * level.scale,
                    angle,
                    response,
                    octave: octave as i32,
                    class_id: -1,
                });
            }
        }
        Ok(keypoints)
    }
}

impl DescriptorExtractor for Orb {
    fn name(&self) -> &'static str {
        "ORB"
    }

    fn kind(&self) -> DescriptorKind {
        DescriptorKind::Binary
    }

    fn compute(
        &self,
        image: &GrayImage,
        keypoints: Vec<KeyPoint>,
    ) -> Result<(Vec<KeyPoint>, Descriptors)> {
        ensure_not_empty(image)?;
        let umax = self.umax();
        let pattern = self.pattern();
        let pyramid = self.pyramid(image);
        let blurred: Vec<GrayImage> = pyramid
            .iter()
            .map(|level| gaussian_blur_f32(&level.image, DESCRIPTOR_SIGMA))
            .collect();

        let border = self.edge_threshold as f32;
        let (width, height) = (image.width() as f32, image.height() as f32);
        let mut kept = vec![];
        let mut rows = vec![];
        for mut kp in keypoints {
            let (x, y) = kp.point;
            if x < border || y < border || x >= width - border || y >= height - border {
                continue;
            }
            let index = (kp.octave.max(0) as usize).min(pyramid.len() - 1);
            let level = &pyramid[index];
            let lx = (x / level.scale).round() as i64;
            let ly = (y / level.scale).round() as i64;
            if !kp.is_oriented() {
                kp.angle = intensity_centroid_angle(&level.image, lx, ly, &umax);
            }

            let (sin, cos) = kp.angle.to_radians().sin_cos();
            let sample = |(px, py): (i64, i64)| {
                let (px, py) = (px as f32, py as f32);
                let rx = (px * cos - py * sin).round() as i64;
                let ry = (px * sin + py * cos).round() as i64;
                pixel(&blurred[index], lx + rx, ly + ry)
            };
            let mut bytes = [0u8; ORB_TESTS / 8];
            for (bit, &[p0, p1]) in pattern.iter().enumerate() {
                if sample(p0) < sample(p1) {
                    set_bit(&mut bytes, bit);
                }
            }
            kept.push(kp);
            rows.push(bytes);
        }
        let descriptors = Descriptors::from_bytes(ORB_TESTS / 8, rows.iter().map(|r| &r[..]));
        Ok((kept, descriptors))
    }
}
