//! Accelerated KAZE features.
//!
//! AKAZE finds blobs as maxima of the Hessian determinant in a nonlinear
//! scale space, built by Fast Explicit Diffusion so that smoothing stops at
//! edges, and describes them with rotated M-LDB binary strings sampled from
//! the same scale space.

mod contrast_factor;
mod derivatives;
mod detector_response;
mod evolution;
mod fed_tau;
mod mldb;
mod nonlinear_diffusion;
mod scale_space_extrema;

use crate::descriptor::DescriptorExtractor;
use crate::detector::{ensure_not_empty, FeatureDetector};
use crate::image::GrayFloatImage;
use crate::{DescriptorKind, Descriptors, Error, KeyPoint, Result};
use evolution::EvolutionStep;
use image::GrayImage;
use log::*;

/// AKAZE detector and descriptor configuration.
///
/// Keypoints carry the index of the evolution they were found in as their
/// `class_id`, which is where their descriptors are sampled from. The most
/// important parameter is `detector_threshold`; [`AkazeFeatures::new`] sets
/// it and leaves everything else at the defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AkazeFeatures {
    /// Evolutions per octave.
    pub num_sublevels: u32,
    /// Maximum number of octaves.
    pub max_octave_evolution: u32,
    /// Scale of the first evolution, in sigma units.
    pub base_scale_offset: f64,
    /// Percentile of the gradient histogram used as the contrast factor.
    pub contrast_percentile: f64,
    pub contrast_factor_num_bins: usize,
    /// Derivative scale relative to the evolution scale.
    pub derivative_factor: f64,
    /// Minimum Hessian response of a keypoint, for intensities in `0..=1`.
    pub detector_threshold: f64,
    /// 1: intensity, 2: intensity and gradient magnitude, 3: intensity and
    /// both rotated gradient components.
    pub descriptor_channels: usize,
    /// Half the side of the descriptor pattern, in keypoint scale units.
    pub descriptor_pattern_size: usize,
}

impl Default for AkazeFeatures {
    fn default() -> Self {
        Self {
            num_sublevels: 4,
            max_octave_evolution: 4,
            base_scale_offset: 1.6,
            contrast_percentile: 0.7,
            contrast_factor_num_bins: 300,
            derivative_factor: 1.5,
            detector_threshold: 0.001,
            descriptor_channels: 3,
            descriptor_pattern_size: 10,
        }
    }
}

impl AkazeFeatures {
    pub fn new(detector_threshold: f64) -> Self {
        Self {
            detector_threshold,
            ..Default::default()
        }
    }

    /// Descriptor length in bytes.
    pub fn descriptor_bytes(&self) -> usize {
        (self.descriptor_bits() + 7) / 8
    }

    /// The nonlinear scale space of `image` with its detector response.
    fn scale_space(&self, image: &GrayImage) -> Vec<EvolutionStep> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let unit = GrayFloatImage::from_fn(width, height, |x, y| {
            f32::from(image[(x as u32, y as u32)][0]) / 255.0
        });
        let mut evolutions = self.nonlinear_scale_space(&unit);
        self.detector_response(&mut evolutions);
        trace!("built {} evolutions", evolutions.len());
        evolutions
    }
}

impl FeatureDetector for AkazeFeatures {
    fn name(&self) -> &'static str {
        "AKAZE"
    }

    fn detect(&self, image: &GrayImage) -> Result<Vec<KeyPoint>> {
        ensure_not_empty(image)?;
        let evolutions = self.scale_space(image);
        Ok(self.find_keypoints(&evolutions))
    }
}

impl DescriptorExtractor for AkazeFeatures {
    fn name(&self) -> &'static str {
        "AKAZE"
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
        let incompatible = Error::IncompatibleKeypoints {
            descriptor: "AKAZE",
        };
        if keypoints.iter().any(|kp| kp.class_id < 0) {
            return Err(incompatible);
        }

        let evolutions = self.scale_space(image);
        let mut kept = Vec::with_capacity(keypoints.len());
        let mut rows = Vec::with_capacity(keypoints.len());
        for kp in keypoints {
            let evolution = match evolutions.get(kp.class_id as usize) {
                Some(evolution) if evolution.octave as i32 == kp.octave => evolution,
                _ => return Err(incompatible),
            };
            if let Some(row) = self.mldb_descriptor(&kp, evolution) {
                kept.push(kp);
                rows.push(row);
            }
        }
        debug!("described {} AKAZE keypoints", kept.len());
        Ok((
            kept,
            Descriptors::Binary {
                length: self.descriptor_bytes(),
                rows,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    const DISCS: [(i32, i32, i32); 3] = [(66, 66, 5), (96, 70, 7), (78, 96, 6)];

    fn spots(offset: (i32, i32)) -> GrayImage {
        let mut image = GrayImage::from_pixel(176, 168, Luma([30]));
        for &(cx, cy, r) in &DISCS {
            let (cx, cy) = (cx + offset.0, cy + offset.1);
            for y in cy - r..=cy + r {
                for x in cx - r..=cx + r {
                    if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                        image.put_pixel(x as u32, y as u32, Luma([220]));
                    }
                }
            }
        }
        image
    }

    #[test]
    fn descriptors_require_akaze_keypoints() {
        let image = spots((0, 0));
        let keypoints = vec![KeyPoint::new(66.0, 66.0, 7.0)];
        assert!(matches!(
            AkazeFeatures::default().compute(&image, keypoints),
            Err(Error::IncompatibleKeypoints { descriptor: "AKAZE" })
        ));
        // An evolution index the image does not have.
        let mut foreign = KeyPoint::new(66.0, 66.0, 7.0);
        foreign.class_id = 40;
        assert!(AkazeFeatures::default()
            .compute(&image, vec![foreign])
            .is_err());
    }

    #[test]
    fn detected_keypoints_can_be_described() {
        let image = spots((0, 0));
        let akaze = AkazeFeatures::default();
        let keypoints = akaze.detect(&image).unwrap();
        assert!(!keypoints.is_empty());
        for kp in &keypoints {
            assert!(kp.class_id >= 0 && kp.is_oriented() && kp.angle < 360.0);
            assert!(kp.response > 0.001);
        }
        let (kept, descriptors) = akaze.compute(&image, keypoints.clone()).unwrap();
        assert_eq!(kept, keypoints);
        assert_eq!(descriptors.len(), keypoints.len());
        assert_eq!(descriptors.kind(), DescriptorKind::Binary);
        assert_eq!(descriptors.width(), 61);
    }

    #[test]
    fn features_move_with_the_scene() {
        let shift = (16, 8);
        let akaze = AkazeFeatures::default();
        let (image_a, image_b) = (spots((0, 0)), spots(shift));
        let (kps_a, desc_a) = akaze
            .compute(&image_a, akaze.detect(&image_a).unwrap())
            .unwrap();
        let (kps_b, desc_b) = akaze
            .compute(&image_b, akaze.detect(&image_b).unwrap())
            .unwrap();
        let (rows_a, rows_b) = (desc_a.binary_rows().unwrap(), desc_b.binary_rows().unwrap());

        let mut pairs = 0;
        for (a, row_a) in kps_a.iter().zip(rows_a) {
            let twin = kps_b.iter().zip(rows_b).find(|(b, _)| {
                b.class_id == a.class_id
                    && (b.point.0 - a.point.0 - shift.0 as f32).abs() < 1e-3
                    && (b.point.1 - a.point.1 - shift.1 as f32).abs() < 1e-3
            });
            if let Some((b, row_b)) = twin {
                pairs += 1;
                assert!((a.angle - b.angle).abs() < 1e-2);
                let differing: u32 = row_a
                    .bytes()
                    .iter()
                    .zip(row_b.bytes())
                    .map(|(x, y)| (x ^ y).count_ones())
                    .sum();
                assert!(differing <= 10, "{} bits differ", differing);
            }
        }
        assert!(pairs > 0);
    }

    #[test]
    fn tiny_images_have_no_keypoints() {
        let image = GrayImage::from_pixel(30, 60, Luma([90]));
        let akaze = AkazeFeatures::new(0.0001);
        assert!(akaze.detect(&image).unwrap().is_empty());
        let (kept, descriptors) = akaze.compute(&image, vec![]).unwrap();
        assert!(kept.is_empty() && descriptors.is_empty());
    }
}
