//! Keypoint detection, descriptor extraction and descriptor matching for
//! tracking features between camera images.
//!
//! Every algorithm is a plain struct whose public fields are its tuning
//! parameters. The [`DetectorType`], [`DescriptorType`], [`MatcherType`] and
//! [`SelectorType`] enums select an algorithm by name and configure it the
//! way a 2D feature tracking pipeline typically does:
//!
//! ```no_run
//! use cv_feature_matching::*;
//!
//! # fn run(img_a: &image::GrayImage, img_b: &image::GrayImage) -> Result<()> {
//! let detection_a = detect_keypoints_modern(img_a, DetectorType::Fast)?;
//! let detection_b = detect_keypoints_modern(img_b, DetectorType::Fast)?;
//! let a = describe_keypoints(detection_a.value, img_a, DescriptorType::Brief)?.value;
//! let b = describe_keypoints(detection_b.value, img_b, DescriptorType::Brief)?.value;
//! let matches = match_descriptors(
//!     &a.descriptors,
//!     &b.descriptors,
//!     DescriptorKind::Binary,
//!     MatcherType::BruteForce,
//!     SelectorType::KNearestNeighbors,
//! )?;
//! println!("{} matches in {:?}", matches.value.len(), matches.elapsed);
//! # Ok(())
//! # }
//! ```

mod akaze;
mod brisk;
mod descriptor;
mod descriptors;
mod detector;
mod draw;
mod error;
mod image;
mod keypoint;
mod matching;
mod orb;
mod sampling;
mod sift;

pub use brisk::Brisk;
pub use crate::akaze::AkazeFeatures;
pub use crate::image::{gaussian_blur, GrayFloatImage};
pub use descriptor::{
    describe_keypoints, Brief, DescriptorExtractor, DescriptorType, Features, Freak,
};
pub use descriptors::{BinaryDescriptor, DescriptorKind, Descriptors, MAX_BINARY_BYTES};
pub use detector::{
    detect_keypoints_harris, detect_keypoints_modern, detect_keypoints_shi_tomasi, DetectorType,
    Fast, FeatureDetector, GoodFeatures,
};
pub use draw::draw_keypoints;
pub use error::{Error, Result};
pub use keypoint::{DMatch, KeyPoint};
pub use matching::{
    match_descriptors, ratio_test, Matcher, MatcherType, SelectorType, L2,
    DEFAULT_DISTANCE_RATIO,
};
pub use orb::Orb;
pub use sift::Sift;

use std::time::{Duration, Instant};

/// The result of an operation together with how long it took.
#[derive(Debug, Clone)]
pub struct Timed<T> {
    pub value: T,
    pub elapsed: Duration,
}

impl<T> Timed<T> {
    /// Run `f` and measure its wall-clock time.
    pub fn measure(f: impl FnOnce() -> T) -> Self {
        let start = Instant::now();
        let value = f();
        Self {
            value,
            elapsed: start.elapsed(),
        }
    }

    pub fn millis(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

impl<T, E> Timed<std::result::Result<T, E>> {
    /// Move the error of a timed fallible operation outwards.
    pub fn transpose(self) -> std::result::Result<Timed<T>, E> {
        let elapsed = self.elapsed;
        self.value.map(|value| Timed { value, elapsed })
    }
}
