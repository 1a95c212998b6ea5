//! Binary Robust Invariant Scalable Keypoints.
//!
//! Detection runs the FAST-9 segment test on a scale space of octaves
//! (halvings) and intra-octaves (at 1.5 times each octave), keeps maxima in
//! position and scale, and refines both. The descriptor compares box-smoothed
//! intensities on a concentric 60 point sampling pattern that is rotated by an
//! orientation estimated from the long distance pairs.

use crate::descriptor::DescriptorExtractor;
use crate::detector::{ensure_not_empty, FeatureDetector};
use crate::image::scale_down;
use crate::sampling::{set_bit, SmoothedImage};
use crate::{DescriptorKind, Descriptors, KeyPoint, Result};
use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};
use imageproc::suppress::local_maxima;
use log::debug;
use ndarray::Array2;
use std::f32::consts::PI;

/// Keypoint diameter at scale one.
const BASIC_SIZE: f32 = 12.0;
/// Number of quantized pattern scales.
const N_SCALES: usize = 64;
/// Ratio between the largest and the smallest pattern scale.
const SCALE_RANGE: f32 = 30.0;
const SIGMA_SCALE: f32 = 1.3;
/// Ring radii and point counts of the sampling pattern at scale one.
const RADII: [f32; 5] = [0.0, 2.9, 4.9, 7.4, 10.8];
const POINTS_PER_RING: [usize; 5] = [1, 10, 14, 15, 20];
/// Pairs closer than this are compared in the descriptor.
const D_MAX: f32 = 5.85;
/// Pairs further apart than this estimate the orientation.
const D_MIN: f32 = 8.2;
/// Descriptor length in bits.
const BITS: usize = 512;

/// BRISK detector and descriptor configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Brisk {
    /// FAST threshold on every layer.
    pub threshold: u8,
    /// Number of octaves; the scale space has twice as many layers.
    pub octaves: usize,
    /// Scale applied to the sampling pattern.
    pub pattern_scale: f32,
}

impl Default for Brisk {
    fn default() -> Self {
        Self {
            threshold: 30,
            octaves: 3,
            pattern_scale: 1.0,
        }
    }
}

/// One layer of the detection scale space.
struct Layer {
    scale: f32,
    sx: f32,
    sy: f32,
    corners: Vec<Corner>,
    scores: Array2<f32>,
}

impl Layer {
    fn new(image: &GrayImage, scale: f32, threshold: u8) -> Self {
        let layer = if scale == 1.0 {
            image.clone()
        } else {
            scale_down(image, scale)
        };
        let (width, height) = layer.dimensions();
        let corners = corners_fast9(&layer, threshold);
        let mut scores = Array2::zeros((height as usize, width as usize));
        for c in &corners {
            scores[(c.y as usize, c.x as usize)] = c.score;
        }
        Self {
            scale,
            sx: image.width() as f32 / width as f32,
            sy: image.height() as f32 / height as f32,
            corners,
            scores,
        }
    }

    fn to_image(&self, x: f32, y: f32) -> (f32, f32) {
        ((x + 0.5) * self.sx - 0.5, (y + 0.5) * self.sy - 0.5)
    }

    fn from_image(&self, x: f32, y: f32) -> (f32, f32) {
        ((x + 0.5) / self.sx - 0.5, (y + 0.5) / self.sy - 0.5)
    }

    fn score(&self, x: isize, y: isize) -> f32 {
        let (height, width) = self.scores.dim();
        if x < 0 || y < 0 || x as usize >= width || y as usize >= height {
            0.0
        } else {
            self.scores[(y as usize, x as usize)]
        }
    }

    /// Largest score in the 3x3 window around an image position.
    fn max_around(&self, x: f32, y: f32) -> f32 {
        let (lx, ly) = self.from_image(x, y);
        let (lx, ly) = (lx.round() as isize, ly.round() as isize);
        (ly - 1..=ly + 1)
            .flat_map(|y| (lx - 1..=lx + 1).map(move |x| (x, y)))
            .map(|(x, y)| self.score(x, y))
            .fold(0.0, f32::max)
    }

    /// Sub-pixel offset of a score maximum from a 1D parabola per axis.
    fn subpixel(&self, x: u32, y: u32) -> (f32, f32) {
        let (x, y) = (x as isize, y as isize);
        let center = self.score(x, y);
        let offset = |prev: f32, next: f32| {
            let curvature = prev - 2.0 * center + next;
            if curvature < 0.0 {
                (0.5 * (prev - next) / curvature).clamp(-0.5, 0.5)
            } else {
                0.0
            }
        };
        (
            offset(self.score(x - 1, y), self.score(x + 1, y)),
            offset(self.score(x, y - 1), self.score(x, y + 1)),
        )
    }
}

/// Vertex of the parabola through three points, limited to halfway towards
/// the outer points.
fn parabola_peak((x0, y0): (f32, f32), (x1, y1): (f32, f32), (x2, y2): (f32, f32)) -> f32 {
    let denom = (x0 - x1) * (x0 - x2) * (x1 - x2);
    let a = (x2 * (y1 - y0) + x1 * (y0 - y2) + x0 * (y2 - y1)) / denom;
    let b = (x2 * x2 * (y0 - y1) + x1 * x1 * (y2 - y0) + x0 * x0 * (y1 - y2)) / denom;
    if a >= 0.0 || !a.is_finite() {
        return x1;
    }
    (-b / (2.0 * a)).clamp(0.5 * (x0 + x1), 0.5 * (x1 + x2))
}

impl Brisk {
    fn layers(&self, image: &GrayImage) -> Vec<Layer> {
        let mut layers = vec![];
        for octave in 0..self.octaves.max(1) {
            let base = (1 << octave) as f32;
            for scale in [base, 1.5 * base] {
                let width = (image.width() as f32 / scale).round();
                let height = (image.height() as f32 / scale).round();
                // The segment test needs a 3 pixel border.
                if width < 7.0 || height < 7.0 {
                    return layers;
                }
                layers.push(Layer::new(image, scale, self.threshold));
                if self.octaves == 0 {
                    return layers;
                }
            }
        }
        layers
    }

    fn pattern(&self) -> Pattern {
        Pattern::new(self.pattern_scale)
    }
}

impl FeatureDetector for Brisk {
    fn name(&self) -> &'static str {
        "BRISK"
    }

    fn detect(&self, image: &GrayImage) -> Result<Vec<KeyPoint>> {
        ensure_not_empty(image)?;
        let layers = self.layers(image);
        debug!("BRISK scale space has {} layers", layers.len());

        let mut keypoints = vec![];
        for (i, layer) in layers.iter().enumerate() {
            for c in local_maxima(&layer.corners, 1) {
                let (x, y) = layer.to_image(c.x as f32, c.y as f32);
                let below = i.checked_sub(1).map(|j| &layers[j]);
                let above = layers.get(i + 1);
                let below_score = below.map(|l| l.max_around(x, y));
                let above_score = above.map(|l| l.max_around(x, y));
                if below_score.unwrap_or(0.0) > c.score || above_score.unwrap_or(0.0) > c.score {
                    continue;
                }

                let log_scale = match (below, above) {
                    (Some(below), Some(above)) => parabola_peak(
                        (below.scale.log2(), below_score.unwrap_or(0.0)),
                        (layer.scale.log2(), c.score),
                        (above.scale.log2(), above_score.unwrap_or(0.0)),
                    ),
                    _ => layer.scale.log2(),
                };
                let (dx, dy) = layer.subpixel(c.x, c.y);
                let (x, y) = layer.to_image(c.x as f32 + dx, c.y as f32 + dy);
                keypoints.push(KeyPoint {
                    response: c.score,
                    octave: i as i32,
                    ..KeyPoint::new(x, y, BASIC_SIZE * log_scale.exp2())
                });
            }
        }
        Ok(keypoints)
    }
}

#[derive(Debug, Clone, Copy)]
struct PatternPoint {
    /// Polar coordinates at scale one.
    radius: f32,
    alpha: f32,
    /// Smoothing radius at scale one.
    sigma: f32,
}

/// The BRISK sampling pattern and its pairs.
struct Pattern {
    points: Vec<PatternPoint>,
    short_pairs: Vec<(usize, usize)>,
    long_pairs: Vec<(usize, usize)>,
    scale_step: f32,
}

impl Pattern {
    fn new(pattern_scale: f32) -> Self {
        let f = 0.85 * pattern_scale;
        let mut points = vec![];
        for (&radius, &count) in RADII.iter().zip(&POINTS_PER_RING) {
            for j in 0..count {
                let radius = f * radius;
                let sigma = if count == 1 {
                    SIGMA_SCALE * 0.5
                } else {
                    SIGMA_SCALE * radius * (PI / count as f32).sin()
                };
                points.push(PatternPoint {
                    radius,
                    alpha: j as f32 * 2.0 * PI / count as f32,
                    sigma,
                });
            }
        }

        let (d_max, d_min) = (D_MAX * pattern_scale, D_MIN * pattern_scale);
        let mut short_pairs = vec![];
        let mut long_pairs = vec![];
        for i in 1..points.len() {
            for j in 0..i {
                let (xi, yi) = points[i].offset(1.0, 0.0);
                let (xj, yj) = points[j].offset(1.0, 0.0);
                let norm_sq = (xj - xi).powi(2) + (yj - yi).powi(2);
                if norm_sq < d_max * d_max {
                    short_pairs.push((i, j));
                } else if norm_sq > d_min * d_min {
                    long_pairs.push((i, j));
                }
            }
        }
        short_pairs.truncate(BITS);

        Self {
            points,
            short_pairs,
            long_pairs,
            scale_step: SCALE_RANGE.log2() / N_SCALES as f32,
        }
    }

    /// The quantized pattern scale for a keypoint diameter.
    fn scale_for(&self, size: f32) -> f32 {
        let index = ((size / (BASIC_SIZE * 0.6)).log2() / self.scale_step + 0.5).max(0.0);
        let index = (index as usize).min(N_SCALES - 1);
        (index as f32 * self.scale_step).exp2()
    }

    /// Distance from the keypoint the pattern needs at `scale`.
    fn border(&self, scale: f32) -> f32 {
        self.points
            .iter()
            .map(|p| scale * (p.radius + p.sigma))
            .fold(0.0, f32::max)
            .ceil()
            + 1.0
    }
}

impl PatternPoint {
    fn offset(&self, scale: f32, theta: f32) -> (f32, f32) {
        let a = self.alpha + theta;
        (scale * self.radius * a.cos(), scale * self.radius * a.sin())
    }
}

impl DescriptorExtractor for Brisk {
    fn name(&self) -> &'static str {
        "BRISK"
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
        let pattern = self.pattern();
        let smoothed = SmoothedImage::new(image);
        let (width, height) = (image.width() as f32, image.height() as f32);

        let mut kept = vec![];
        let mut rows = vec![];
        for mut kp in keypoints {
            let scale = pattern.scale_for(kp.size);
            let border = pattern.border(scale);
            let (x, y) = kp.point;
            if x < border || y < border || x >= width - border || y >= height - border {
                continue;
            }
            let intensities = |theta: f32| -> Vec<f32> {
                pattern
                    .points
                    .iter()
                    .map(|p| {
                        let (dx, dy) = p.offset(scale, theta);
                        smoothed.smoothed_intensity((x, y), (dx, dy), scale * p.sigma)
                    })
                    .collect()
            };

            // Local gradient from the long pairs of the unrotated pattern.
            let values = intensities(0.0);
            let (mut gx, mut gy) = (0.0f32, 0.0f32);
            for &(i, j) in &pattern.long_pairs {
                let (xi, yi) = pattern.points[i].offset(scale, 0.0);
                let (xj, yj) = pattern.points[j].offset(scale, 0.0);
                let (dx, dy) = (xj - xi, yj - yi);
                let weight = (values[i] - values[j]) / (dx * dx + dy * dy);
                gx += weight * dx;
                gy += weight * dy;
            }
            let theta = gy.atan2(gx);
            kp.angle = theta.to_degrees().rem_euclid(360.0);

            let values = intensities(theta);
            let mut bytes = [0u8; BITS / 8];
            for (bit, &(i, j)) in pattern.short_pairs.iter().enumerate() {
                if values[i] > values[j] {
                    set_bit(&mut bytes, bit);
                }
            }
            kept.push(kp);
            rows.push(bytes);
        }
        let descriptors = Descriptors::from_bytes(BITS / 8, rows.iter().map(|r| &r[..]));
        Ok((kept, descriptors))
    }
}
