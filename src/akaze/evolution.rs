use super::fed_tau::fed_tau_by_process_time;
use super::{contrast_factor, derivatives, nonlinear_diffusion, AkazeFeatures};
use crate::image::{gaussian_blur, GrayFloatImage};
use log::*;

/// Levels whose smaller side is below this many pixels carry too little
/// structure to detect features in.
const MIN_LEVEL_SIDE: usize = 40;
/// Below this side length an octave gets a single sublevel.
const FULL_OCTAVE_SIDE: usize = 80;
/// Stability limit of the explicit diffusion scheme.
const TAU_MAX: f64 = 0.25;

/// One level of the nonlinear scale space.
#[derive(Debug)]
pub struct EvolutionStep {
    /// Scale in sigma units; linear diffusion time is `sigma^2 / 2`.
    pub esigma: f64,
    pub etime: f64,
    pub octave: u32,
    /// The evolved image.
    pub lt: GrayFloatImage,
    pub lsmooth: GrayFloatImage,
    /// First order derivatives at the detector scale.
    pub lx: GrayFloatImage,
    pub ly: GrayFloatImage,
    /// Second order derivatives at the detector scale.
    pub lxx: GrayFloatImage,
    pub lyy: GrayFloatImage,
    pub lxy: GrayFloatImage,
    /// Perona-Malik conductivity.
    pub lflow: GrayFloatImage,
    /// Scale normalized determinant of the Hessian.
    pub ldet: GrayFloatImage,
    pub fed_tau_steps: Vec<f64>,
}

impl EvolutionStep {
    fn new(octave: u32, sublevel: u32, config: &AkazeFeatures) -> Self {
        let esigma = config.base_scale_offset
            * 2f64.powf(f64::from(sublevel) / f64::from(config.num_sublevels) + f64::from(octave));
        let empty = || GrayFloatImage::new(0, 0);
        Self {
            esigma,
            etime: 0.5 * esigma * esigma,
            octave,
            lt: empty(),
            lsmooth: empty(),
            lx: empty(),
            ly: empty(),
            lxx: empty(),
            lyy: empty(),
            lxy: empty(),
            lflow: empty(),
            ldet: empty(),
            fed_tau_steps: vec![],
        }
    }

    /// Factor between full resolution coordinates and this level's pixels.
    pub fn ratio(&self) -> f32 {
        (1u32 << self.octave) as f32
    }
}

impl AkazeFeatures {
    /// Lay out the evolutions for an image of the given size, with the FED
    /// steps that lead from each evolution to the next.
    pub(super) fn allocate_evolutions(&self, width: usize, height: usize) -> Vec<EvolutionStep> {
        let mut evolutions: Vec<EvolutionStep> = (0..self.max_octave_evolution)
            .filter_map(|octave| {
                let side = width.min(height) >> octave;
                if side < MIN_LEVEL_SIDE {
                    return None;
                }
                let sublevels = if side < FULL_OCTAVE_SIDE {
                    1
                } else {
                    self.num_sublevels
                };
                Some(
                    (0..sublevels)
                        .map(move |sublevel| EvolutionStep::new(octave, sublevel, self)),
                )
            })
            .flatten()
            .collect();
        for i in 1..evolutions.len() {
            let time = evolutions[i].etime - evolutions[i - 1].etime;
            evolutions[i].fed_tau_steps = fed_tau_by_process_time(time, TAU_MAX);
            trace!(
                "{} diffusion steps for evolution {}",
                evolutions[i].fed_tau_steps.len(),
                i
            );
        }
        evolutions
    }

    /// Build the nonlinear scale space of `image`, whose intensities are in
    /// `0.0..=1.0`. Diffusion smooths homogeneous regions while keeping their
    /// edges.
    pub(super) fn nonlinear_scale_space(&self, image: &GrayFloatImage) -> Vec<EvolutionStep> {
        let mut evolutions = self.allocate_evolutions(image.width(), image.height());
        if evolutions.is_empty() {
            debug!(
                "{}x{} image is too small for a nonlinear scale space",
                image.width(),
                image.height()
            );
            return evolutions;
        }

        evolutions[0].lt = gaussian_blur(image, self.base_scale_offset as f32);
        evolutions[0].lsmooth = evolutions[0].lt.clone();
        let mut contrast = contrast_factor::compute_contrast_factor(
            &evolutions[0].lsmooth,
            self.contrast_percentile,
            1.0,
            self.contrast_factor_num_bins,
        );
        debug!("initial contrast factor {}", contrast);

        for i in 1..evolutions.len() {
            let (done, rest) = evolutions.split_at_mut(i);
            let (previous, evolution) = (&done[i - 1], &mut rest[0]);
            if evolution.octave > previous.octave {
                evolution.lt = previous.lt.half_size();
                contrast *= 0.75;
                trace!(
                    "octave {} is {}x{}, contrast factor {}",
                    evolution.octave,
                    evolution.lt.width(),
                    evolution.lt.height(),
                    contrast
                );
            } else {
                evolution.lt = previous.lt.clone();
            }
            evolution.lsmooth = gaussian_blur(&evolution.lt, 1.0);
            evolution.lx = derivatives::scharr_horizontal(&evolution.lsmooth, 1);
            evolution.ly = derivatives::scharr_vertical(&evolution.lsmooth, 1);
            evolution.lflow = nonlinear_diffusion::pm_g2(&evolution.lx, &evolution.ly, contrast);
            for step in evolution.fed_tau_steps.clone() {
                nonlinear_diffusion::calculate_step(evolution, step as f32);
            }
        }
        evolutions
    }
}
