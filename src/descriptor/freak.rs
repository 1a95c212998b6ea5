//! Fast retina keypoint descriptor.
//!
//! 43 receptive fields on seven concentric rings of six plus a center, with
//! field sizes growing towards the periphery like the retina. Bits compare
//! the mean intensities of field pairs, coarse fields first.

use super::DescriptorExtractor;
use crate::detector::ensure_not_empty;
use crate::sampling::{set_bit, SmoothedImage};
use crate::{DescriptorKind, Descriptors, KeyPoint, Result};
use image::GrayImage;
use std::f32::consts::PI;

const N_SCALES: usize = 64;
const N_RINGS: usize = 8;
const POINTS_PER_RING: [usize; N_RINGS] = [6, 6, 6, 6, 6, 6, 6, 1];
const N_POINTS: usize = 43;
/// Diameter of the smallest keypoint the pattern is defined for.
const SMALLEST_KEYPOINT_SIZE: f32 = 7.0;
/// Descriptor length in bits.
const BITS: usize = 512;

/// Pairs on opposite and neighbouring fields of the four outer rings, used to
/// estimate the orientation.
#[rustfmt::skip]
const ORIENTATION_PAIRS: [(usize, usize); 45] = [
    (0, 3), (1, 4), (2, 5), (0, 2), (1, 3), (2, 4), (3, 5), (4, 0), (5, 1),
    (6, 9), (7, 10), (8, 11), (6, 8), (7, 9), (8, 10), (9, 11), (10, 6), (11, 7),
    (12, 15), (13, 16), (14, 17), (12, 14), (13, 15), (14, 16), (15, 17), (16, 12), (17, 13),
    (18, 21), (19, 22), (20, 23), (18, 20), (19, 21), (20, 22), (21, 23), (22, 18), (23, 19),
    (24, 27), (25, 28), (26, 29), (30, 33), (31, 34), (32, 35), (36, 39), (37, 40), (38, 41),
];

/// FREAK descriptor configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Freak {
    /// Rotate the pattern by the estimated keypoint orientation.
    pub orientation_normalized: bool,
    /// Scale the pattern by the keypoint size.
    pub scale_normalized: bool,
    /// Radius of the outermost ring, in pixels, at the smallest scale.
    pub pattern_scale: f32,
    /// Number of octaves covered by the pattern scales.
    pub n_octaves: u32,
}

impl Default for Freak {
    fn default() -> Self {
        Self {
            orientation_normalized: true,
            scale_normalized: true,
            pattern_scale: 22.0,
            n_octaves: 4,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Field {
    radius: f32,
    alpha: f32,
    sigma: f32,
}

impl Field {
    fn offset(&self, scale: f32, theta: f32) -> (f32, f32) {
        let a = self.alpha + theta;
        (scale * self.radius * a.cos(), scale * self.radius * a.sin())
    }
}

struct Pattern {
    fields: Vec<Field>,
    pairs: Vec<(usize, usize)>,
    scale_step: f32,
}

impl Pattern {
    fn new(n_octaves: u32) -> Self {
        let big_r = 2.0 / 3.0;
        let small_r = 2.0 / 24.0;
        let unit = (big_r - small_r) / 21.0;
        let radii: [f32; N_RINGS] = [
            big_r,
            big_r - 6.0 * unit,
            big_r - 11.0 * unit,
            big_r - 15.0 * unit,
            big_r - 18.0 * unit,
            big_r - 20.0 * unit,
            small_r,
            0.0,
        ];

        let mut fields = Vec::with_capacity(N_POINTS);
        for (ring, &count) in POINTS_PER_RING.iter().enumerate() {
            // Odd rings are rotated by half a field.
            let beta = PI / count as f32 * (ring % 2) as f32;
            let sigma = radii[ring.min(N_RINGS - 2)] / 2.0;
            for k in 0..count {
                fields.push(Field {
                    radius: radii[ring],
                    alpha: k as f32 * 2.0 * PI / count as f32 + beta,
                    sigma,
                });
            }
        }

        let ring = |i: usize| (i / 6).min(N_RINGS - 1);
        let mut pairs: Vec<(usize, usize)> = (1..N_POINTS)
            .flat_map(|i| (0..i).map(move |j| (i, j)))
            .collect();
        pairs.sort_by_key(|&(i, j)| (ring(i) + ring(j), ring(i).max(ring(j)), i, j));
        pairs.truncate(BITS);

        Self {
            fields,
            pairs,
            scale_step: (n_octaves as f32 / N_SCALES as f32).exp2(),
        }
    }

    /// Quantized pattern scale index for a keypoint diameter.
    fn scale_index(&self, size: f32) -> usize {
        let octaves = (size / SMALLEST_KEYPOINT_SIZE).log2();
        let index = (octaves / self.scale_step.log2() + 0.5).max(0.0);
        (index as usize).min(N_SCALES - 1)
    }

    fn scaling(&self, index: usize) -> f32 {
        self.scale_step.powi(index as i32)
    }

    /// Distance from the keypoint the pattern needs at `scale`.
    fn border(&self, scale: f32) -> f32 {
        self.fields
            .iter()
            .map(|f| (scale * (f.radius + f.sigma)).ceil() + 1.0)
            .fold(0.0, f32::max)
    }
}

impl Freak {
    fn pattern(&self) -> Pattern {
        Pattern::new(self.n_octaves)
    }
}

impl DescriptorExtractor for Freak {
    fn name(&self) -> &'static str {
        "FREAK"
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
            let index = if self.scale_normalized {
                pattern.scale_index(kp.size)
            } else {
                pattern.scale_index(3.0 * SMALLEST_KEYPOINT_SIZE)
            };
            let scale = pattern.scaling(index) * self.pattern_scale;
            let border = pattern.border(scale);
            let (x, y) = kp.point;
            if x <= border || y <= border || x >= width - border || y >= height - border {
                continue;
            }
            let intensities = |theta: f32| -> Vec<f32> {
                pattern
                    .fields
                    .iter()
                    .map(|f| {
                        let (dx, dy) = f.offset(scale, theta);
                        smoothed.smoothed_intensity((x, y), (dx, dy), scale * f.sigma)
                    })
                    .collect()
            };

            let theta = if self.orientation_normalized {
                let values = intensities(0.0);
                let (mut gx, mut gy) = (0.0f32, 0.0f32);
                for &(i, j) in &ORIENTATION_PAIRS {
                    let (xi, yi) = pattern.fields[i].offset(1.0, 0.0);
                    let (xj, yj) = pattern.fields[j].offset(1.0, 0.0);
                    let (dx, dy) = (xi - xj, yi - yj);
                    let weight = (values[i] - values[j]) / (dx * dx + dy * dy);
                    gx += weight * dx;
                    gy += weight * dy;
                }
                let theta = gy.atan2(gx);
                kp.angle = theta.to_degrees().rem_euclid(360.0);
                theta
            } else {
                0.0
            };

            let values = intensities(theta);
            let mut bytes = [0u8; BITS / 8];
            for (bit, &(i, j)) in pattern.pairs.iter().enumerate() {
                if values[i] >= values[j] {
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

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn disc_image() -> GrayImage {
        GrayImage::from_fn(140, 120, |x, y| {
            let (dx, dy) = (x as f32 - 62.0, y as f32 - 57.0);
            let ring = ((dx * dx + dy * dy).sqrt() / 6.0) as u32;
            Luma([(40 + (ring * 37 + x / 9) % 180) as u8])
        })
    }

    #[test]
    fn pattern_layout() {
        let pattern = Pattern::new(4);
        assert_eq!(pattern.fields.len(), N_POINTS);
        assert_eq!(pattern.pairs.len(), BITS);
        assert_eq!(pattern.fields[42].radius, 0.0);
        assert!(pattern.pairs.iter().all(|&(i, j)| i > j && i < N_POINTS));
        // The first pairs compare fields on the outermost ring.
        assert!(pattern.pairs[..15].iter().all(|&(i, _)| i < 6));
    }

    #[test]
    fn scale_index_of_keypoint_sizes() {
        let pattern = Pattern::new(4);
        assert_eq!(pattern.scale_index(7.0), 0);
        assert_eq!(pattern.scale_index(3.0), 0);
        // Sixteen indices per octave.
        assert_eq!(pattern.scale_index(14.0), 16);
        assert_eq!(pattern.scale_index(1e6), N_SCALES - 1);
        assert!((pattern.scaling(16) - 2.0).abs() < 1e-4);
        let border = pattern.border(22.0);
        assert!((23.0..=24.0).contains(&border));
    }

    #[test]
    fn descriptors_are_translation_invariant() {
        let image = disc_image();
        let shifted = GrayImage::from_fn(130, 110, |x, y| *image.get_pixel(x + 10, y + 10));
        let freak = Freak::default();
        let (kps_a, desc_a) = freak
            .compute(&image, vec![KeyPoint::new(62.0, 57.0, 7.0)])
            .unwrap();
        let (kps_b, desc_b) = freak
            .compute(&shifted, vec![KeyPoint::new(52.0, 47.0, 7.0)])
            .unwrap();
        assert_eq!(kps_a.len(), 1);
        assert_eq!(kps_b.len(), 1);
        assert!(kps_a[0].is_oriented());
        assert!((kps_a[0].angle - kps_b[0].angle).abs() < 1e-3);
        assert_eq!(
            desc_a.binary_rows().unwrap()[0].bytes(),
            desc_b.binary_rows().unwrap()[0].bytes()
        );
        assert_eq!(desc_a.width(), 64);
    }

    #[test]
    fn border_keypoints_are_dropped_and_orientation_is_optional() {
        let freak = Freak {
            orientation_normalized: false,
            ..Freak::default()
        };
        let keypoints = vec![
            KeyPoint::new(22.0, 60.0, 7.0),
            KeyPoint::new(25.0, 60.0, 7.0),
            KeyPoint::new(70.0, 60.0, 40.0),
        ];
        let (kept, descriptors) = freak.compute(&disc_image(), keypoints).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(descriptors.len(), 1);
        assert_eq!(kept[0].point, (25.0, 60.0));
        assert!(!kept[0].is_oriented());
    }
}
