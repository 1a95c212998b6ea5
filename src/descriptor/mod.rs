mod brief;
mod freak;

pub use brief::Brief;
pub use freak::Freak;

use crate::{
    AkazeFeatures, Brisk, DescriptorKind, Descriptors, Error, KeyPoint, Orb, Result, Sift, Timed,
};
use image::GrayImage;
use log::info;
use std::str::FromStr;

/// Computes a descriptor for every keypoint it can describe.
pub trait DescriptorExtractor {
    /// Human readable name used in log output.
    fn name(&self) -> &'static str;

    /// Whether the descriptors are binary or real valued.
    fn kind(&self) -> DescriptorKind;

    /// Describe `keypoints` in `image`.
    ///
    /// Keypoints that cannot be described, usually because their patch leaves
    /// the image, are removed. The returned keypoints correspond row by row to
    /// the descriptors and may have their orientation filled in.
    fn compute(
        &self,
        image: &GrayImage,
        keypoints: Vec<KeyPoint>,
    ) -> Result<(Vec<KeyPoint>, Descriptors)>;
}

/// The descriptor extractors that can be selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DescriptorType {
    Brisk,
    Sift,
    Orb,
    Akaze,
    Freak,
    Brief,
}

impl DescriptorType {
    pub const ALL: [DescriptorType; 6] = [
        Self::Brisk,
        Self::Sift,
        Self::Orb,
        Self::Akaze,
        Self::Freak,
        Self::Brief,
    ];

    /// The descriptor family, which decides the brute force matching norm.
    pub fn kind(self) -> DescriptorKind {
        match self {
            Self::Sift => DescriptorKind::Float,
            _ => DescriptorKind::Binary,
        }
    }

    /// The extractor configured for feature tracking.
    pub fn create(self) -> Box<dyn DescriptorExtractor> {
        match self {
            Self::Brisk => Box::new(Brisk::default()),
            Self::Sift => Box::new(Sift::default()),
            Self::Orb => Box::new(Orb::new(1000)),
            Self::Akaze => Box::new(AkazeFeatures::default()),
            Self::Freak => Box::new(Freak::default()),
            Self::Brief => Box::new(Brief::default()),
        }
    }
}

impl FromStr for DescriptorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BRISK" => Ok(Self::Brisk),
            "SIFT" => Ok(Self::Sift),
            "ORB" => Ok(Self::Orb),
            "AKAZE" => Ok(Self::Akaze),
            "FREAK" => Ok(Self::Freak),
            "BRIEF" => Ok(Self::Brief),
            _ => Err(Error::UnknownDescriptor(s.to_owned())),
        }
    }
}

/// Described keypoints; `descriptors` has one row per keypoint.
#[derive(Debug, Clone)]
pub struct Features {
    pub keypoints: Vec<KeyPoint>,
    pub descriptors: Descriptors,
}

/// Describe keypoints with one of the named extractors.
pub fn describe_keypoints(
    keypoints: Vec<KeyPoint>,
    image: &GrayImage,
    descriptor: DescriptorType,
) -> Result<Timed<Features>> {
    let extractor = descriptor.create();
    let timed = Timed::measure(|| extractor.compute(image, keypoints)).transpose()?;
    info!(
        "{} descriptor extraction in {} ms",
        extractor.name(),
        timed.millis()
    );
    let elapsed = timed.elapsed;
    let (keypoints, descriptors) = timed.value;
    Ok(Timed {
        value: Features {
            keypoints,
            descriptors,
        },
        elapsed,
    })
}
