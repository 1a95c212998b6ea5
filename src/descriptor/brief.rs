use super::DescriptorExtractor;
use crate::detector::ensure_not_empty;
use crate::sampling::{set_bit, SmoothedImage};
use crate::{DescriptorKind, Descriptors, KeyPoint, Result};
use image::GrayImage;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::f32::consts::PI;

const PATTERN_SEED: u64 = 0x0b71_ef00;

/// Binary robust independent elementary features.
///
/// Every bit compares the box-smoothed intensity of two points drawn from an
/// isotropic Gaussian around the keypoint, with a standard deviation of a
/// fifth of the patch size. The pattern is not rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Brief {
    /// Descriptor length in bytes: 16, 32 or 64.
    pub bytes: usize,
    pub patch_size: u32,
    /// Side of the smoothing box.
    pub kernel_size: u32,
}

impl Default for Brief {
    fn default() -> Self {
        Self {
            bytes: 32,
            patch_size: 48,
            kernel_size: 9,
        }
    }
}

impl Brief {
    /// Distance from a keypoint to the image border needed to describe it.
    pub fn border(&self) -> u32 {
        self.patch_size / 2 + self.kernel_size / 2
    }

    fn pattern(&self) -> Vec<[(i64, i64); 2]> {
        let sigma = self.patch_size as f32 / 5.0;
        let limit = i64::from(self.patch_size / 2 - self.kernel_size / 2) - 1;
        let mut rng = Pcg64::seed_from_u64(PATTERN_SEED);
        // Box-Muller transform.
        let mut gaussian = || {
            let u1: f32 = 1.0 - rng.gen::<f32>();
            let u2: f32 = rng.gen();
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
            ((z * sigma).round() as i64).clamp(-limit, limit)
        };
        (0..self.bytes * 8)
            .map(|_| [(gaussian(), gaussian()), (gaussian(), gaussian())])
            .collect()
    }
}

impl DescriptorExtractor for Brief {
    fn name(&self) -> &'static str {
        "BRIEF"
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
        let smoothed = SmoothedImage::new(image);
        let pattern = self.pattern();
        let border = self.border() as f32;
        let (width, height) = (image.width() as f32, image.height() as f32);
        let half = i64::from(self.kernel_size / 2);

        let mut kept = vec![];
        let mut rows = vec![];
        for kp in keypoints {
            let (x, y) = kp.point;
            if x < border || y < border || x >= width - border || y >= height - border {
                continue;
            }
            let (cx, cy) = ((x + 0.5) as i64, (y + 0.5) as i64);
            let sum = |(dx, dy): (i64, i64)| {
                let (px, py) = (cx + dx, cy + dy);
                smoothed.box_sum(px - half, py - half, px + half, py + half).0
            };
            let mut bytes = vec![0u8; self.bytes];
            for (bit, &[p0, p1]) in pattern.iter().enumerate() {
                if sum(p0) < sum(p1) {
                    set_bit(&mut bytes, bit);
                }
            }
            kept.push(kp);
            rows.push(bytes);
        }
        let descriptors = Descriptors::from_bytes(self.bytes, rows.iter().map(Vec::as_slice));
        Ok((kept, descriptors))
    }
}
