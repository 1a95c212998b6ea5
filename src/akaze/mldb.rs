//! Modified local difference binary descriptor.
//!
//! The pattern around a keypoint is divided into grids of 2x2, 3x3 and 4x4
//! cells. Every cell is summarized by its mean intensity and, depending on
//! the channel count, its mean gradient. Each bit compares one channel of two
//! cells of the same grid.

use super::evolution::EvolutionStep;
use super::AkazeFeatures;
use crate::sampling::set_bit;
use crate::{BinaryDescriptor, KeyPoint, MAX_BINARY_BYTES};

/// Cell sizes of the three grids relative to the pattern size.
const GRID_SCALES: [f32; 3] = [1.0, 2.0 / 3.0, 1.0 / 2.0];

impl AkazeFeatures {
    pub(super) fn channels(&self) -> usize {
        self.descriptor_channels.clamp(1, 3)
    }

    fn cell_size(&self, grid_scale: f32) -> usize {
        ((self.descriptor_pattern_size as f32 * grid_scale).ceil() as usize).max(1)
    }

    /// Number of meaningful bits in a descriptor.
    pub(super) fn descriptor_bits(&self) -> usize {
        let bits: usize = GRID_SCALES
            .iter()
            .map(|&scale| {
                let cell_size = self.cell_size(scale);
                let side = (2 * self.descriptor_pattern_size + cell_size - 1) / cell_size;
                let cells = side * side;
                cells * cells.saturating_sub(1) / 2
            })
            .sum();
        (bits * self.channels()).min(MAX_BINARY_BYTES * 8)
    }

    /// Descriptor of a keypoint found in `evolution`, rotated by its angle.
    ///
    /// Returns `None` when part of the pattern falls outside the evolution.
    pub(super) fn mldb_descriptor(
        &self,
        keypoint: &KeyPoint,
        evolution: &EvolutionStep,
    ) -> Option<BinaryDescriptor> {
        let ratio = evolution.ratio();
        let frame = Frame {
            scale: (0.5 * keypoint.size / ratio).round(),
            x: keypoint.point.0 / ratio,
            y: keypoint.point.1 / ratio,
            theta: if keypoint.is_oriented() {
                keypoint.angle.to_radians()
            } else {
                0.0
            },
        };
        let channels = self.channels();
        let capacity = self.descriptor_bits();
        let mut descriptor = BinaryDescriptor::zeros();
        let mut bit = 0;
        for &grid_scale in &GRID_SCALES {
            let cells = self.cell_values(&frame, self.cell_size(grid_scale), evolution)?;
            for channel in 0..channels {
                for i in 0..cells.len() {
                    for j in i + 1..cells.len() {
                        if bit < capacity && cells[i][channel] > cells[j][channel] {
                            set_bit(descriptor.bytes_mut(), bit);
                        }
                        bit += 1;
                    }
                }
            }
        }
        Some(descriptor)
    }

    /// Mean intensity and gradient channels of the cells of one grid.
    fn cell_values(
        &self,
        frame: &Frame,
        cell_size: usize,
        evolution: &EvolutionStep,
    ) -> Option<Vec<[f32; 3]>> {
        let pattern = self.descriptor_pattern_size as i32;
        let step = cell_size as i32;
        let (sin, cos) = frame.theta.sin_cos();
        let (width, height) = (evolution.lt.width() as isize, evolution.lt.height() as isize);
        let mut cells = vec![];
        for i in (-pattern..pattern).step_by(cell_size) {
            for j in (-pattern..pattern).step_by(cell_size) {
                let mut sum = [0.0f32; 3];
                let mut samples = 0;
                for k in i..i + step {
                    for l in j..j + step {
                        let (k, l) = (k as f32 * frame.scale, l as f32 * frame.scale);
                        let x = (frame.x - l * sin + k * cos).round() as isize;
                        let y = (frame.y + l * cos + k * sin).round() as isize;
                        if x < 0 || y < 0 || x >= width || y >= height {
                            return None;
                        }
                        let (x, y) = (x as usize, y as usize);
                        sum[0] += evolution.lt.get(x, y);
                        let (gx, gy) = (evolution.lx.get(x, y), evolution.ly.get(x, y));
                        match self.channels() {
                            2 => sum[1] += gx.hypot(gy),
                            3 => {
                                sum[1] += -gx * sin + gy * cos;
                                sum[2] += gx * cos + gy * sin;
                            }
                            _ => {}
                        }
                        samples += 1;
                    }
                }
                cells.push(sum.map(|v| v / samples as f32));
            }
        }
        Some(cells)
    }
}

/// Position, scale and rotation of a pattern in evolution pixels.
struct Frame {
    scale: f32,
    x: f32,
    y: f32,
    theta: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::GrayFloatImage;

    #[test]
    fn default_descriptor_has_486_bits() {
        let akaze = AkazeFeatures::default();
        assert_eq!(akaze.descriptor_bits(), 486);
        let single = AkazeFeatures {
            descriptor_channels: 1,
            ..AkazeFeatures::default()
        };
        assert_eq!(single.descriptor_bits(), 162);
    }

    #[test]
    fn pattern_outside_the_image_is_rejected() {
        let akaze = AkazeFeatures::default();
        let mut evolution = akaze.allocate_evolutions(80, 80).remove(0);
        let image = GrayFloatImage::from_fn(80, 80, |x, y| ((x * 3 + y * 5) % 7) as f32 / 7.0);
        evolution.lt = image.clone();
        evolution.lx = image.clone();
        evolution.ly = image;
        let mut inside = KeyPoint::new(40.0, 40.0, 2.4);
        inside.angle = 30.0;
        let descriptor = akaze.mldb_descriptor(&inside, &evolution).unwrap();
        assert!(descriptor.bytes()[61..].iter().all(|&b| b == 0));
        assert!(descriptor.bytes()[..61].iter().any(|&b| b != 0));
        assert!(akaze
            .mldb_descriptor(&KeyPoint::new(5.0, 40.0, 2.4), &evolution)
            .is_none());
    }
}
