use super::{ensure_not_empty, FeatureDetector};
use crate::{KeyPoint, Result};
use image::GrayImage;
use imageproc::corners::{corners_fast9, Corner};
use imageproc::suppress::local_maxima;

/// Diameter given to FAST keypoints, the extent of the Bresenham circle.
pub const FAST_KEYPOINT_SIZE: f32 = 7.0;

/// FAST-9 segment test corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fast {
    /// Intensity difference between the center and the contiguous arc.
    pub threshold: u8,
    /// Keep only corners whose score is maximal in their 3x3 neighbourhood.
    pub nonmax_suppression: bool,
}

impl Default for Fast {
    fn default() -> Self {
        Self {
            threshold: 30,
            nonmax_suppression: true,
        }
    }
}

impl Fast {
    /// The raw corners with their scores.
    pub fn corners(&self, image: &GrayImage) -> Vec<Corner> {
        let corners = corners_fast9(image, self.threshold);
        if self.nonmax_suppression {
            local_maxima(&corners, 1)
        } else {
            corners
        }
    }
}

impl FeatureDetector for Fast {
    fn name(&self) -> &'static str {
        "FAST"
    }

    fn detect(&self, image: &GrayImage) -> Result<Vec<KeyPoint>> {
        ensure_not_empty(image)?;
        Ok(self
            .corners(image)
            .into_iter()
            .map(|c| KeyPoint {
                response: c.score,
                ..KeyPoint::new(c.x as f32, c.y as f32, FAST_KEYPOINT_SIZE)
            })
            .collect())
    }
}
