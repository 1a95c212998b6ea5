//! Scale-invariant feature transform.
//!
//! The image is upsampled by two, blurred into octaves of Gaussian layers and
//! differenced. Extrema of the difference of Gaussians are refined with a
//! quadratic fit, screened for contrast and edge response and given one
//! keypoint per dominant gradient orientation. Descriptors are 4x4 spatial
//! histograms of 8 orientation bins sampled on the Gaussian layer that
//! matches the keypoint scale.

use crate::descriptor::DescriptorExtractor;
use crate::detector::{ensure_not_empty, FeatureDetector};
use crate::image::{gaussian_blur, GrayFloatImage};
use crate::{DescriptorKind, Descriptors, KeyPoint, Result};
use float_ord::FloatOrd;
use image::GrayImage;
use log::debug;

/// Blur assumed to be present in the input image.
const INIT_SIGMA: f32 = 0.5;
/// Extrema closer than this to the layer border are ignored.
const IMG_BORDER: usize = 5;
const MAX_INTERP_STEPS: usize = 5;
const ORI_HIST_BINS: usize = 36;
/// Gaussian weighting of the orientation histogram, relative to the keypoint scale.
const ORI_SIG_FCTR: f32 = 1.5;
const ORI_RADIUS: f32 = 3.0 * ORI_SIG_FCTR;
/// Secondary orientation peaks above this fraction of the maximum become keypoints too.
const ORI_PEAK_RATIO: f32 = 0.8;
/// Width of the descriptor grid, in cells.
const DESCR_WIDTH: usize = 4;
const DESCR_HIST_BINS: usize = 8;
/// Cell width relative to the keypoint scale.
const DESCR_SCL_FCTR: f32 = 3.0;
/// Descriptor elements are clipped at this fraction of the vector norm.
const DESCR_MAG_THR: f32 = 0.2;
const INT_DESCR_FCTR: f32 = 512.0;
/// Layer intensities are kept in gray levels; derivatives are normalized by this.
const IMG_SCALE: f32 = 1.0 / 255.0;

/// Length of a SIFT descriptor.
pub const SIFT_DESCRIPTOR_DIMS: usize = DESCR_WIDTH * DESCR_WIDTH * DESCR_HIST_BINS;

/// SIFT detector and descriptor configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sift {
    /// Keep this many of the strongest keypoints, or all of them when zero.
    pub n_features: usize,
    /// Layers per octave in which extrema are searched.
    pub n_octave_layers: usize,
    /// Minimum contrast of a refined extremum, divided by the layer count.
    pub contrast_threshold: f32,
    /// Maximum ratio of principal curvatures.
    pub edge_threshold: f32,
    /// Blur of the first layer of every octave.
    pub sigma: f32,
}

impl Default for Sift {
    fn default() -> Self {
        Self {
            n_features: 0,
            n_octave_layers: 3,
            contrast_threshold: 0.04,
            edge_threshold: 10.0,
            sigma: 1.6,
        }
    }
}

/// Gaussian and difference of Gaussian layers, octave by octave.
///
/// Octave zero has twice the resolution of the input image.
struct Pyramid {
    gaussian: Vec<Vec<GrayFloatImage>>,
    dog: Vec<Vec<GrayFloatImage>>,
}

/// A refined scale space extremum in octave coordinates.
struct Extremum {
    octave: usize,
    layer: usize,
    x: usize,
    y: usize,
    offset: [f32; 3],
    response: f32,
}

impl Sift {
    fn base_image(&self, image: &GrayImage) -> GrayFloatImage {
        let image = GrayFloatImage::from_gray(image);
        let upsampled = image.resize(image.width() * 2, image.height() * 2);
        let sig_diff = (self.sigma * self.sigma - 4.0 * INIT_SIGMA * INIT_SIGMA)
            .max(0.01)
            .sqrt();
        gaussian_blur(&upsampled, sig_diff)
    }

    fn n_octaves(base: &GrayFloatImage) -> usize {
        let min = base.width().min(base.height()) as f32;
        // One more octave for the upsampled base.
        ((min.log2() - 2.0).round() as isize + 1).max(1) as usize
    }

    fn build_pyramid(&self, image: &GrayImage) -> Pyramid {
        let base = self.base_image(image);
        let n_octaves = Self::n_octaves(&base);
        let s = self.n_octave_layers;

        // Incremental blur from one layer to the next.
        let k = 2f32.powf(1.0 / s as f32);
        let mut sigmas = vec![self.sigma];
        for i in 1..s + 3 {
            let prev = k.powi(i as i32 - 1) * self.sigma;
            let total = prev * k;
            sigmas.push((total * total - prev * prev).sqrt());
        }

        let mut gaussian: Vec<Vec<GrayFloatImage>> = Vec::with_capacity(n_octaves);
        for o in 0..n_octaves {
            let first = match o {
                0 => base.clone(),
                _ => gaussian[o - 1][s].decimate(),
            };
            let mut layers = vec![first];
            for &sigma in &sigmas[1..] {
                let next = gaussian_blur(&layers[layers.len() - 1], sigma);
                layers.push(next);
            }
            gaussian.push(layers);
        }
        let dog = gaussian
            .iter()
            .map(|layers| layers.windows(2).map(|w| w[1].difference(&w[0])).collect())
            .collect();
        debug!(
            "SIFT pyramid with {} octaves starting at {}x{}",
            n_octaves,
            base.width(),
            base.height()
        );
        Pyramid { gaussian, dog }
    }

    fn find_extrema(&self, pyramid: &Pyramid) -> Vec<Extremum> {
        let s = self.n_octave_layers;
        let threshold = (0.5 * self.contrast_threshold / s as f32 * 255.0).floor();
        let mut extrema = vec![];
        for (o, dog) in pyramid.dog.iter().enumerate() {
            let (width, height) = (dog[0].width(), dog[0].height());
            if width <= 2 * IMG_BORDER || height <= 2 * IMG_BORDER {
                continue;
            }
            for layer in 1..=s {
                for y in IMG_BORDER..height - IMG_BORDER {
                    for x in IMG_BORDER..width - IMG_BORDER {
                        let value = dog[layer].get(x, y);
                        if value.abs() <= threshold || !is_extremum(dog, layer, x, y) {
                            continue;
                        }
                        if let Some(extremum) = self.refine(dog, o, layer, x, y) {
                            extrema.push(extremum);
                        }
                    }
                }
            }
        }
        extrema
    }

    /// Fit a quadratic to the scale space around an extremum and move to the
    /// sample closest to its vertex.
    fn refine(
        &self,
        dog: &[GrayFloatImage],
        octave: usize,
        mut layer: usize,
        mut x: usize,
        mut y: usize,
    ) -> Option<Extremum> {
        let s = self.n_octave_layers;
        let (width, height) = (dog[0].width(), dog[0].height());
        let mut offset = [0.0f32; 3];
        let mut converged = false;
        for _ in 0..MAX_INTERP_STEPS {
            let (gradient, hessian) = derivatives(dog, layer, x, y);
            let solution = solve3(&hessian, &gradient)?;
            offset = [-solution[0], -solution[1], -solution[2]];
            if offset.iter().all(|v| v.abs() < 0.5) {
                converged = true;
                break;
            }
            if offset.iter().any(|v| v.abs() > (i32::MAX / 3) as f32) {
                return None;
            }
            let nx = x as isize + offset[0].round() as isize;
            let ny = y as isize + offset[1].round() as isize;
            let nl = layer as isize + offset[2].round() as isize;
            if nl < 1
                || nl > s as isize
                || nx < IMG_BORDER as isize
                || nx >= (width - IMG_BORDER) as isize
                || ny < IMG_BORDER as isize
                || ny >= (height - IMG_BORDER) as isize
            {
                return None;
            }
            x = nx as usize;
            y = ny as usize;
            layer = nl as usize;
        }
        if !converged {
            return None;
        }

        let (gradient, hessian) = derivatives(dog, layer, x, y);
        let t: f32 = gradient.iter().zip(&offset).map(|(g, o)| g * o).sum();
        let contrast = dog[layer].get(x, y) * IMG_SCALE + t * 0.5;
        if contrast.abs() * (s as f32) < self.contrast_threshold {
            return None;
        }

        // Principal curvature ratio.
        let (dxx, dyy, dxy) = (hessian[0][0], hessian[1][1], hessian[0][1]);
        let trace = dxx + dyy;
        let det = dxx * dyy - dxy * dxy;
        let edge = self.edge_threshold;
        if det <= 0.0 || trace * trace * edge >= (edge + 1.0) * (edge + 1.0) * det {
            return None;
        }

        Some(Extremum {
            octave,
            layer,
            x,
            y,
            offset,
            response: contrast.abs(),
        })
    }

    /// Octave and layer of the Gaussian pyramid matching a keypoint diameter
    /// given in input image pixels.
    fn octave_layer_for(&self, size: f32, n_octaves: usize) -> (usize, usize) {
        let s = self.n_octave_layers;
        let levels = (s as f32 * (size / self.sigma).log2()).round().max(0.0) as usize;
        let octave = (levels / s).min(n_octaves - 1);
        let layer = (levels - octave * s).min(s + 2);
        (octave, layer)
    }
}

/// Whether the sample is at least as large (or small) as its 26 neighbours.
fn is_extremum(dog: &[GrayFloatImage], layer: usize, x: usize, y: usize) -> bool {
    let value = dog[layer].get(x, y);
    let mut neighbors = (layer - 1..=layer + 1).flat_map(|l| {
        (y - 1..=y + 1).flat_map(move |ny| (x - 1..=x + 1).map(move |nx| (l, nx, ny)))
    });
    if value > 0.0 {
        neighbors.all(|(l, nx, ny)| dog[l].get(nx, ny) <= value)
    } else {
        neighbors.all(|(l, nx, ny)| dog[l].get(nx, ny) >= value)
    }
}

/// Gradient and Hessian of the difference of Gaussians in `(x, y, layer)`.
fn derivatives(
    dog: &[GrayFloatImage],
    layer: usize,
    x: usize,
    y: usize,
) -> ([f32; 3], [[f32; 3]; 3]) {
    let deriv_scale = IMG_SCALE * 0.5;
    let second_deriv_scale = IMG_SCALE;
    let cross_deriv_scale = IMG_SCALE * 0.25;
    let (prev, img, next) = (&dog[layer - 1], &dog[layer], &dog[layer + 1]);

    let gradient = [
        (img.get(x + 1, y) - img.get(x - 1, y)) * deriv_scale,
        (img.get(x, y + 1) - img.get(x, y - 1)) * deriv_scale,
        (next.get(x, y) - prev.get(x, y)) * deriv_scale,
    ];
    let v2 = img.get(x, y) * 2.0;
    let dxx = (img.get(x + 1, y) + img.get(x - 1, y) - v2) * second_deriv_scale;
    let dyy = (img.get(x, y + 1) + img.get(x, y - 1) - v2) * second_deriv_scale;
    let dss = (next.get(x, y) + prev.get(x, y) - v2) * second_deriv_scale;
    let dxy = (img.get(x + 1, y + 1) - img.get(x - 1, y + 1) - img.get(x + 1, y - 1)
        + img.get(x - 1, y - 1))
        * cross_deriv_scale;
    let dxs = (next.get(x + 1, y) - next.get(x - 1, y) - prev.get(x + 1, y)
        + prev.get(x - 1, y))
        * cross_deriv_scale;
    let dys = (next.get(x, y + 1) - next.get(x, y - 1) - prev.get(x, y + 1)
        + prev.get(x, y - 1))
        * cross_deriv_scale;
    (gradient, [[dxx, dxy, dxs], [dxy, dyy, dys], [dxs, dys, dss]])
}

/// Solve the 3x3 system `a * x = b` with Cramer's rule.
fn solve3(a: &[[f32; 3]; 3], b: &[f32; 3]) -> Option<[f32; 3]> {
    let det3 = |m: &[[f32; 3]; 3]| {
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    };
    let det = det3(a);
    if det.abs() < f32::EPSILON * f32::EPSILON || !det.is_finite() {
        return None;
    }
    let mut x = [0.0; 3];
    for (col, x) in x.iter_mut().enumerate() {
        let mut m = *a;
        for row in 0..3 {
            m[row][col] = b[row];
        }
        *x = det3(&m) / det;
    }
    Some(x)
}

/// Gradient orientation histogram around `(x, y)` in degrees, smoothed, with
/// the y axis pointing up.
fn orientation_histogram(
    image: &GrayFloatImage,
    x: usize,
    y: usize,
    radius: isize,
    sigma: f32,
) -> [f32; ORI_HIST_BINS] {
    let n = ORI_HIST_BINS;
    let exp_scale = -1.0 / (2.0 * sigma * sigma);
    let mut raw = [0.0f32; ORI_HIST_BINS];
    for i in -radius..=radius {
        let py = y as isize + i;
        if py <= 0 || py >= image.height() as isize - 1 {
            continue;
        }
        for j in -radius..=radius {
            let px = x as isize + j;
            if px <= 0 || px >= image.width() as isize - 1 {
                continue;
            }
            let (px, py) = (px as usize, py as usize);
            let dx = image.get(px + 1, py) - image.get(px - 1, py);
            let dy = image.get(px, py - 1) - image.get(px, py + 1);
            let weight = (((i * i + j * j) as f32) * exp_scale).exp();
            let angle = dy.atan2(dx).to_degrees().rem_euclid(360.0);
            let bin = ((n as f32 / 360.0) * angle).round() as usize % n;
            raw[bin] += weight * (dx * dx + dy * dy).sqrt();
        }
    }

    let mut hist = [0.0f32; ORI_HIST_BINS];
    for (i, h) in hist.iter_mut().enumerate() {
        let at = |offset: isize| raw[(i as isize + offset).rem_euclid(n as isize) as usize];
        *h = (at(-2) + at(2)) * (1.0 / 16.0)
            + (at(-1) + at(1)) * (4.0 / 16.0)
            + at(0) * (6.0 / 16.0);
    }
    hist
}

/// Keypoint angles of the dominant peaks of an orientation histogram.
fn dominant_orientations(hist: &[f32; ORI_HIST_BINS]) -> Vec<f32> {
    let n = ORI_HIST_BINS;
    let max = hist.iter().copied().fold(0.0, f32::max);
    let threshold = max * ORI_PEAK_RATIO;
    let mut angles = vec![];
    for j in 0..n {
        let left = hist[(j + n - 1) % n];
        let right = hist[(j + 1) % n];
        let value = hist[j];
        if value > left && value > right && value >= threshold {
            let bin = j as f32 + 0.5 * (left - right) / (left - 2.0 * value + right);
            let bin = bin.rem_euclid(n as f32);
            let mut angle = 360.0 - (360.0 / n as f32) * bin;
            if (angle - 360.0).abs() < f32::EPSILON {
                angle = 0.0;
            }
            angles.push(angle.rem_euclid(360.0));
        }
    }
    angles
}

/// The 128 element descriptor of a point in octave coordinates.
///
/// `angle` is the rotation in degrees with the y axis pointing up, `scale` the
/// keypoint radius in octave pixels.
fn descriptor(
    image: &GrayFloatImage,
    x: f32,
    y: f32,
    angle: f32,
    scale: f32,
) -> [f32; SIFT_DESCRIPTOR_DIMS] {
    let d = DESCR_WIDTH;
    let n = DESCR_HIST_BINS;
    let (px, py) = (x.round() as isize, y.round() as isize);
    let bins_per_deg = n as f32 / 360.0;
    let exp_scale = -1.0 / (d as f32 * d as f32 * 0.5);
    let hist_width = DESCR_SCL_FCTR * scale;
    let diagonal = ((image.width().pow(2) + image.height().pow(2)) as f32).sqrt();
    let radius = (hist_width * std::f32::consts::SQRT_2 * (d as f32 + 1.0) * 0.5)
        .round()
        .min(diagonal) as isize;
    let cos_t = angle.to_radians().cos() / hist_width;
    let sin_t = angle.to_radians().sin() / hist_width;

    // Histogram with one cell of padding around the grid and two extra
    // orientation bins for wrap around.
    let mut hist = vec![0.0f32; (d + 2) * (d + 2) * (n + 2)];
    let (rows, cols) = (image.height() as isize, image.width() as isize);
    for i in -radius..=radius {
        for j in -radius..=radius {
            let c_rot = j as f32 * cos_t - i as f32 * sin_t;
            let r_rot = j as f32 * sin_t + i as f32 * cos_t;
            let rbin = r_rot + d as f32 / 2.0 - 0.5;
            let cbin = c_rot + d as f32 / 2.0 - 0.5;
            let (r, c) = (py + i, px + j);
            if !(rbin > -1.0 && rbin < d as f32 && cbin > -1.0 && cbin < d as f32) {
                continue;
            }
            if r <= 0 || r >= rows - 1 || c <= 0 || c >= cols - 1 {
                continue;
            }
            let (r, c) = (r as usize, c as usize);
            let dx = image.get(c + 1, r) - image.get(c - 1, r);
            let dy = image.get(c, r - 1) - image.get(c, r + 1);
            let weight = ((c_rot * c_rot + r_rot * r_rot) * exp_scale).exp();
            let magnitude = (dx * dx + dy * dy).sqrt() * weight;
            let ori = dy.atan2(dx).to_degrees().rem_euclid(360.0);
            let obin = (ori - angle) * bins_per_deg;

            let (r0, c0, o0) = (rbin.floor(), cbin.floor(), obin.floor());
            let (rbin, cbin, obin) = (rbin - r0, cbin - c0, obin - o0);
            let o0 = (o0 as isize).rem_euclid(n as isize) as usize;
            let (r0, c0) = ((r0 as isize + 1) as usize, (c0 as isize + 1) as usize);

            // Trilinear distribution over the 8 neighbouring bins.
            let v_r1 = magnitude * rbin;
            let v_r0 = magnitude - v_r1;
            let v_rc11 = v_r1 * cbin;
            let v_rc10 = v_r1 - v_rc11;
            let v_rc01 = v_r0 * cbin;
            let v_rc00 = v_r0 - v_rc01;
            let idx = (r0 * (d + 2) + c0) * (n + 2) + o0;
            for (base, v) in [
                (idx, v_rc00),
                (idx + (n + 2), v_rc01),
                (idx + (d + 2) * (n + 2), v_rc10),
                (idx + (d + 3) * (n + 2), v_rc11),
            ] {
                let v1 = v * obin;
                hist[base] += v - v1;
                hist[base + 1] += v1;
            }
        }
    }

    let mut out = [0.0f32; SIFT_DESCRIPTOR_DIMS];
    for i in 0..d {
        for j in 0..d {
            let idx = ((i + 1) * (d + 2) + (j + 1)) * (n + 2);
            hist[idx] += hist[idx + n];
            hist[idx + 1] += hist[idx + n + 1];
            out[(i * d + j) * n..(i * d + j + 1) * n].copy_from_slice(&hist[idx..idx + n]);
        }
    }

    let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
    let threshold = norm * DESCR_MAG_THR;
    for v in out.iter_mut() {
        *v = v.min(threshold);
    }
    let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
    let factor = INT_DESCR_FCTR / norm.max(f32::EPSILON);
    for v in out.iter_mut() {
        *v = (*v * factor).round().clamp(0.0, 255.0);
    }
    out
}

impl FeatureDetector for Sift {
    fn name(&self) -> &'static str {
        "SIFT"
    }

    fn detect(&self, image: &GrayImage) -> Result<Vec<KeyPoint>> {
        ensure_not_empty(image)?;
        let pyramid = self.build_pyramid(image);
        let extrema = self.find_extrema(&pyramid);
        debug!("{} refined SIFT extrema", extrema.len());

        let s = self.n_octave_layers as f32;
        let mut keypoints = vec![];
        for e in extrema {
            let [xc, xr, xi] = e.offset;
            let octave_scale = (1usize << e.octave) as f32;
            // Diameter in octave pixels.
            let size = self.sigma * 2f32.powf((e.layer as f32 + xi) / s) * 2.0;
            let hist = orientation_histogram(
                &pyramid.gaussian[e.octave][e.layer],
                e.x,
                e.y,
                (ORI_RADIUS * size * 0.5).round() as isize,
                ORI_SIG_FCTR * size * 0.5,
            );
            // Octave zero is upsampled, so input coordinates are half of them.
            let to_input = octave_scale * 0.5;
            for angle in dominant_orientations(&hist) {
                keypoints.push(KeyPoint {
                    point: (
                        (e.x as f32 + xc) * to_input,
                        (e.y as f32 + xr) * to_input,
                    ),
                    size: size * to_input,
                    angle,
                    response: e.response,
                    octave: e.octave as i32 - 1,
                    class_id: -1,
                });
            }
        }

        keypoints.sort_by_key(|kp| {
            (
                FloatOrd(kp.point.0),
                FloatOrd(kp.point.1),
                FloatOrd(kp.size),
                FloatOrd(kp.angle),
            )
        });
        keypoints.dedup_by(|a, b| a.point == b.point && a.size == b.size && a.angle == b.angle);

        if self.n_features > 0 && keypoints.len() > self.n_features {
            keypoints.sort_by_key(|kp| std::cmp::Reverse(FloatOrd(kp.response)));
            keypoints.truncate(self.n_features);
        }
        Ok(keypoints)
    }
}

impl DescriptorExtractor for Sift {
    fn name(&self) -> &'static str {
        "SIFT"
    }

    fn kind(&self) -> DescriptorKind {
        DescriptorKind::Float
    }

    fn compute(
        &self,
        image: &GrayImage,
        keypoints: Vec<KeyPoint>,
    ) -> Result<(Vec<KeyPoint>, Descriptors)> {
        ensure_not_empty(image)?;
        let pyramid = self.build_pyramid(image);
        let mut values = Vec::with_capacity(keypoints.len() * SIFT_DESCRIPTOR_DIMS);
        for kp in &keypoints {
            let (octave, layer) = self.octave_layer_for(kp.size, pyramid.gaussian.len());
            // Input pixels per octave pixel.
            let to_input = (1usize << octave) as f32 * 0.5;
            let angle = if kp.is_oriented() { kp.angle } else { 0.0 };
            let mut angle = 360.0 - angle;
            if (angle - 360.0).abs() < f32::EPSILON {
                angle = 0.0;
            }
            values.extend_from_slice(&descriptor(
                &pyramid.gaussian[octave][layer],
                kp.x() / to_input,
                kp.y() / to_input,
                angle,
                kp.size / to_input * 0.5,
            ));
        }
        Ok((
            keypoints,
            Descriptors::Float {
                dims: SIFT_DESCRIPTOR_DIMS,
                values,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// A bright Gaussian blob on a darker background.
    fn blob(width: u32, height: u32, cx: f32, cy: f32, sigma: f32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let r2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
            Luma([(40.0 + 180.0 * (-r2 / (2.0 * sigma * sigma)).exp()) as u8])
        })
    }

    #[test]
    fn solve3_solves_diagonal_and_full_systems() {
        let a = [[2.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 8.0]];
        let x = solve3(&a, &[2.0, 2.0, 2.0]).unwrap();
        assert_eq!(x, [1.0, 0.5, 0.25]);
        let a = [[1.0, 2.0, 0.0], [0.0, 1.0, 1.0], [1.0, 0.0, 1.0]];
        let x = solve3(&a, &[5.0, 5.0, 4.0]).unwrap();
        for (v, e) in x.iter().zip([1.0, 2.0, 3.0]) {
            assert!((v - e).abs() < 1e-5);
        }
        assert!(solve3(&[[0.0; 3]; 3], &[1.0, 1.0, 1.0]).is_none());
    }

    #[test]
    fn single_peak_gives_one_orientation() {
        let mut hist = [0.0f32; ORI_HIST_BINS];
        hist[9] = 10.0;
        hist[8] = 5.0;
        hist[10] = 5.0;
        let angles = dominant_orientations(&hist);
        assert_eq!(angles.len(), 1);
        assert!((angles[0] - 270.0).abs() < 1e-3);
    }

    #[test]
    fn octave_layer_follows_size() {
        let sift = Sift::default();
        assert_eq!(sift.octave_layer_for(1.6, 6), (0, 0));
        assert_eq!(sift.octave_layer_for(3.2, 6), (1, 0));
        assert_eq!(sift.octave_layer_for(1000.0, 6), (5, 5));
        assert_eq!(sift.octave_layer_for(0.0, 6), (0, 0));
    }

    #[test]
    fn detects_blob_center() {
        // Elongated so that the orientation histogram has a single clear peak.
        let image = GrayImage::from_fn(96, 96, |x, y| {
            let (dx, dy) = ((x as f32 - 48.0) / 6.0, (y as f32 - 48.0) / 4.0);
            Luma([(40.0 + 180.0 * (-0.5 * (dx * dx + dy * dy)).exp()) as u8])
        });
        let keypoints = Sift::default().detect(&image).unwrap();
        assert!(keypoints
            .iter()
            .any(|kp| (kp.x() - 48.0).abs() < 2.0 && (kp.y() - 48.0).abs() < 2.0));
        assert!(keypoints.iter().all(|kp| kp.is_oriented() && kp.angle < 360.0));
    }

    #[test]
    fn flat_image_has_no_keypoints() {
        let image = GrayImage::from_pixel(64, 64, Luma([128]));
        assert!(Sift::default().detect(&image).unwrap().is_empty());
    }

    #[test]
    fn n_features_limits_output() {
        let mut image = blob(128, 96, 40.0, 40.0, 4.0);
        let other = blob(128, 96, 90.0, 60.0, 6.0);
        for (a, b) in image.pixels_mut().zip(other.pixels()) {
            a[0] = a[0].max(b[0]);
        }
        let sift = Sift {
            n_features: 1,
            ..Sift::default()
        };
        assert!(sift.detect(&image).unwrap().len() <= 1);
    }

    #[test]
    fn descriptors_are_normalized_and_shift_invariant() {
        let image = blob(112, 112, 60.0, 60.0, 6.0);
        let shifted = GrayImage::from_fn(96, 96, |x, y| *image.get_pixel(x + 16, y + 16));
        let sift = Sift::default();
        let kp_a = KeyPoint {
            angle: 30.0,
            ..KeyPoint::new(60.0, 60.0, 12.0)
        };
        let kp_b = KeyPoint {
            point: (44.0, 44.0),
            ..kp_a
        };
        let (_, a) = sift.compute(&image, vec![kp_a]).unwrap();
        let (_, b) = sift.compute(&shifted, vec![kp_b]).unwrap();
        let a: Vec<f32> = a.float_rows().unwrap().next().unwrap().to_vec();
        let b: Vec<f32> = b.float_rows().unwrap().next().unwrap().to_vec();
        assert_eq!(a.len(), SIFT_DESCRIPTOR_DIMS);
        assert!(a.iter().all(|&v| (0.0..=255.0).contains(&v)));
        let norm = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!(norm > 400.0 && norm < 600.0);
        let distance = a.iter().zip(&b).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt();
        assert!(distance < 0.05 * norm, "distance {}", distance);
    }
}
