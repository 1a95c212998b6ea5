use super::evolution::EvolutionStep;
use super::AkazeFeatures;
use crate::KeyPoint;
use log::*;
use std::f32::consts::{PI, SQRT_2};

/// Radius of the orientation sampling disc in units of the keypoint scale.
const ORIENTATION_RADIUS: i32 = 6;
/// Angular step and width of the sliding orientation window.
const WINDOW_STEP: f32 = 0.15;
const WINDOW_WIDTH: f32 = PI / 3.0;

/// Full resolution coordinate of pixel `v` of a level `ratio` times smaller.
fn to_full_resolution(v: f32, ratio: f32) -> f32 {
    v * ratio + 0.5 * (ratio - 1.0)
}

fn to_level(v: f32, ratio: f32) -> f32 {
    (v - 0.5 * (ratio - 1.0)) / ratio
}

fn squared_distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    (a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)
}

impl AkazeFeatures {
    /// Local maxima of the Hessian response across position and scale.
    ///
    /// A maximum suppresses weaker ones of its own and the next finer
    /// evolution within its size, and is dropped when the next coarser
    /// evolution has one nearby. Maxima too close to the border for the
    /// descriptor pattern are skipped.
    fn scale_space_extrema(&self, evolutions: &[EvolutionStep]) -> Vec<KeyPoint> {
        let smax = 10.0 * SQRT_2;
        let threshold = self.detector_threshold as f32;
        let mut candidates: Vec<KeyPoint> = vec![];
        for (level, evolution) in evolutions.iter().enumerate() {
            let det = &evolution.ldet;
            let (width, height) = (det.width(), det.height());
            let ratio = evolution.ratio();
            let size = (evolution.esigma * self.derivative_factor) as f32;
            let reach = smax * (size / ratio).round();
            for y in 1..height.saturating_sub(1) {
                for x in 1..width.saturating_sub(1) {
                    let value = det.get(x, y);
                    if value <= threshold
                        || value <= det.get(x - 1, y)
                        || value <= det.get(x + 1, y)
                        || value <= det.get(x, y - 1)
                        || value <= det.get(x, y + 1)
                    {
                        continue;
                    }
                    let (xf, yf) = (x as f32, y as f32);
                    if (xf - reach).round() - 1.0 < 0.0
                        || (xf + reach).round() + 1.0 >= width as f32
                        || (yf - reach).round() - 1.0 < 0.0
                        || (yf + reach).round() + 1.0 >= height as f32
                    {
                        continue;
                    }

                    let keypoint = KeyPoint {
                        point: (to_full_resolution(xf, ratio), to_full_resolution(yf, ratio)),
                        size,
                        angle: -1.0,
                        response: value.abs(),
                        octave: evolution.octave as i32,
                        class_id: level as i32,
                    };
                    let neighbour = candidates.iter().position(|other| {
                        (other.class_id == keypoint.class_id
                            || other.class_id + 1 == keypoint.class_id)
                            && squared_distance(other.point, keypoint.point) <= size * size
                    });
                    match neighbour {
                        None => candidates.push(keypoint),
                        Some(i) if candidates[i].response < keypoint.response => {
                            candidates[i] = keypoint
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        let extrema: Vec<KeyPoint> = candidates
            .iter()
            .filter(|kp| {
                !candidates.iter().any(|coarser| {
                    coarser.class_id == kp.class_id + 1
                        && squared_distance(coarser.point, kp.point) <= kp.size * kp.size
                })
            })
            .copied()
            .collect();
        debug!(
            "{} of {} scale space maxima survive suppression",
            extrema.len(),
            candidates.len()
        );
        extrema
    }

    /// Detect keypoints in a scale space whose detector response has been
    /// computed: refined to sub-pixel accuracy and oriented.
    pub(super) fn find_keypoints(&self, evolutions: &[EvolutionStep]) -> Vec<KeyPoint> {
        let extrema = self.scale_space_extrema(evolutions);
        let mut keypoints: Vec<KeyPoint> = extrema
            .iter()
            .filter_map(|kp| subpixel_refinement(kp, &evolutions[kp.class_id as usize]))
            .collect();
        debug!(
            "{} of {} maxima remain after sub-pixel refinement",
            keypoints.len(),
            extrema.len()
        );
        for kp in &mut keypoints {
            let theta = main_orientation(kp, &evolutions[kp.class_id as usize]);
            kp.angle = theta.to_degrees().rem_euclid(360.0);
        }
        keypoints
    }
}

/// Fit a quadratic to the 3x3 response neighbourhood and move the keypoint to
/// its peak. Keypoints whose peak lies more than a pixel away are rejected.
fn subpixel_refinement(keypoint: &KeyPoint, evolution: &EvolutionStep) -> Option<KeyPoint> {
    let det = &evolution.ldet;
    let ratio = evolution.ratio();
    let x = to_level(keypoint.point.0, ratio).round() as usize;
    let y = to_level(keypoint.point.1, ratio).round() as usize;
    if x == 0 || y == 0 || x + 1 >= det.width() || y + 1 >= det.height() {
        return None;
    }
    let at = |dx: isize, dy: isize| {
        det.get((x as isize + dx) as usize, (y as isize + dy) as usize)
    };

    let d_x = 0.5 * (at(1, 0) - at(-1, 0));
    let d_y = 0.5 * (at(0, 1) - at(0, -1));
    let d_xx = at(1, 0) + at(-1, 0) - 2.0 * at(0, 0);
    let d_yy = at(0, 1) + at(0, -1) - 2.0 * at(0, 0);
    let d_xy = 0.25 * (at(1, 1) + at(-1, -1) - at(1, -1) - at(-1, 1));
    let inverse_det = (d_xx * d_yy - d_xy * d_xy).recip();
    let offset_x = -inverse_det * (d_yy * d_x - d_xy * d_y);
    let offset_y = -inverse_det * (d_xx * d_y - d_xy * d_x);
    // Also rejects singular fits, whose offsets are not finite.
    if !(offset_x.abs() <= 1.0 && offset_y.abs() <= 1.0) {
        return None;
    }
    Some(KeyPoint {
        point: (
            to_full_resolution(x as f32 + offset_x, ratio),
            to_full_resolution(y as f32 + offset_y, ratio),
        ),
        ..*keypoint
    })
}

/// Weight of a sample `i`, `j` scale units from the keypoint: a Gaussian with
/// a standard deviation of 2.5 units.
fn gaussian_weight(i: i32, j: i32) -> f32 {
    let sigma2 = 2.5f32 * 2.5;
    (-((i * i + j * j) as f32) / (2.0 * sigma2)).exp() / (2.0 * PI * sigma2)
}

/// The dominant gradient direction around a keypoint, in radians.
///
/// Gradients sampled on a disc of six scale units are summed over a window
/// of 60 degrees that slides around the circle; the longest sum wins.
fn main_orientation(keypoint: &KeyPoint, evolution: &EvolutionStep) -> f32 {
    let ratio = evolution.ratio();
    let scale = (0.5 * keypoint.size / ratio).round();
    let (xf, yf) = (keypoint.point.0 / ratio, keypoint.point.1 / ratio);
    let r = ORIENTATION_RADIUS;
    let mut samples = vec![];
    for i in -r..=r {
        for j in -r..=r {
            if i * i + j * j >= r * r {
                continue;
            }
            let x = (xf + i as f32 * scale).round() as isize;
            let y = (yf + j as f32 * scale).round() as isize;
            let weight = gaussian_weight(i, j);
            let gx = weight * evolution.lx.get_reflected(x, y);
            let gy = weight * evolution.ly.get_reflected(x, y);
            samples.push((gx, gy, gy.atan2(gx).rem_euclid(2.0 * PI)));
        }
    }

    let mut best = (0.0f32, 0.0f32);
    let mut longest = 0.0f32;
    let mut start = 0.0f32;
    while start < 2.0 * PI {
        let end = if start + WINDOW_WIDTH > 2.0 * PI {
            start - 5.0 * WINDOW_WIDTH
        } else {
            start + WINDOW_WIDTH
        };
        let (mut sum_x, mut sum_y) = (0.0f32, 0.0f32);
        for &(gx, gy, angle) in &samples {
            let inside = if start < end {
                start < angle && angle < end
            } else {
                angle < end || start < angle
            };
            if inside {
                sum_x += gx;
                sum_y += gy;
            }
        }
        let length = sum_x * sum_x + sum_y * sum_y;
        if length > longest {
            longest = length;
            best = (sum_x, sum_y);
        }
        start += WINDOW_STEP;
    }
    best.1.atan2(best.0)
}
