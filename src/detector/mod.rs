mod corners;
mod fast;

pub use corners::GoodFeatures;
pub use fast::Fast;

use crate::{AkazeFeatures, Brisk, Error, KeyPoint, Orb, Result, Sift, Timed};
use image::GrayImage;
use log::info;
use std::str::FromStr;

/// Finds keypoints in an 8-bit grayscale image.
pub trait FeatureDetector {
    /// Human readable name used in log output.
    fn name(&self) -> &'static str;

    fn detect(&self, image: &GrayImage) -> Result<Vec<KeyPoint>>;
}

/// The keypoint detectors that can be selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DetectorType {
    ShiTomasi,
    Harris,
    Fast,
    Brisk,
    Sift,
    Orb,
    Akaze,
}

impl DetectorType {
    pub const ALL: [DetectorType; 7] = [
        Self::ShiTomasi,
        Self::Harris,
        Self::Fast,
        Self::Brisk,
        Self::Sift,
        Self::Orb,
        Self::Akaze,
    ];

    /// The detector configured for feature tracking.
    pub fn create(self) -> Box<dyn FeatureDetector> {
        match self {
            Self::ShiTomasi => Box::new(GoodFeatures::shi_tomasi()),
            Self::Harris => Box::new(GoodFeatures::harris()),
            Self::Fast => Box::new(Fast::default()),
            Self::Brisk => Box::new(Brisk::default()),
            Self::Sift => Box::new(Sift::default()),
            Self::Orb => Box::new(Orb::new(1000)),
            Self::Akaze => Box::new(AkazeFeatures::default()),
        }
    }
}

impl FromStr for DetectorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SHITOMASI" => Ok(Self::ShiTomasi),
            "HARRIS" => Ok(Self::Harris),
            "FAST" => Ok(Self::Fast),
            "BRISK" => Ok(Self::Brisk),
            "SIFT" => Ok(Self::Sift),
            "ORB" => Ok(Self::Orb),
            "AKAZE" => Ok(Self::Akaze),
            _ => Err(Error::UnknownDetector(s.to_owned())),
        }
    }
}

/// Fails on images without pixels, which no detector can process.
pub(crate) fn ensure_not_empty(image: &GrayImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        Err(Error::EmptyImage)
    } else {
        Ok(())
    }
}

fn detect_timed(
    detector: &dyn FeatureDetector,
    image: &GrayImage,
) -> Result<Timed<Vec<KeyPoint>>> {
    let timed = Timed::measure(|| detector.detect(image)).transpose()?;
    info!(
        "{} detection with n={} keypoints in {} ms",
        detector.name(),
        timed.value.len(),
        timed.millis()
    );
    Ok(timed)
}

/// Detect corners with the minimum eigenvalue (Shi-Tomasi) response.
pub fn detect_keypoints_shi_tomasi(image: &GrayImage) -> Result<Timed<Vec<KeyPoint>>> {
    detect_timed(&GoodFeatures::shi_tomasi(), image)
}

/// Detect corners with the Harris response.
pub fn detect_keypoints_harris(image: &GrayImage) -> Result<Timed<Vec<KeyPoint>>> {
    detect_timed(&GoodFeatures::harris(), image)
}

/// Detect keypoints with any of the named detectors.
pub fn detect_keypoints_modern(
    image: &GrayImage,
    detector: DetectorType,
) -> Result<Timed<Vec<KeyPoint>>> {
    detect_timed(detector.create().as_ref(), image)
}
