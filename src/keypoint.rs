#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A point of interest in an image.
/// This pretty much follows from OpenCV conventions.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KeyPoint {
    /// The horizontal coordinate in a coordinate system is
    /// defined s.t. +x faces right and starts from the top
    /// of the image.
    /// the vertical coordinate in a coordinate system is defined
    /// s.t. +y faces toward the bottom of an image and starts
    /// from the left side of the image.
    pub point: (f32, f32),
    /// The diameter of the meaningful neighborhood, in pixel units.
    pub size: f32,
    /// The orientation in degrees within `[0, 360)`, or `-1.0` if the
    /// detector does not assign one.
    pub angle: f32,
    /// The magnitude of response from the detector.
    pub response: f32,
    /// The pyramid level the keypoint was found on.
    pub octave: i32,
    /// A detector specific classification ID, `-1` when unused.
    pub class_id: i32,
}

impl KeyPoint {
    /// A keypoint without orientation or pyramid information.
    pub fn new(x: f32, y: f32, size: f32) -> Self {
        Self {
            point: (x, y),
            size,
            angle: -1.0,
            response: 0.0,
            octave: 0,
            class_id: -1,
        }
    }

    pub fn x(&self) -> f32 {
        self.point.0
    }

    pub fn y(&self) -> f32 {
        self.point.1
    }

    /// Whether a detector or extractor assigned an orientation.
    pub fn is_oriented(&self) -> bool {
        self.angle >= 0.0
    }
}

/// A correspondence between a query descriptor and a train descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DMatch {
    /// Index of the descriptor in the query (source) set.
    pub query_idx: usize,
    /// Index of the descriptor in the train (reference) set.
    pub train_idx: usize,
    pub distance: f32,
}

impl DMatch {
    pub fn new(query_idx: usize, train_idx: usize, distance: f32) -> Self {
        Self {
            query_idx,
            train_idx,
            distance,
        }
    }
}
