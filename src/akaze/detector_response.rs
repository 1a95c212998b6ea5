use super::derivatives::{scharr_horizontal, scharr_vertical};
use super::evolution::EvolutionStep;
use super::AkazeFeatures;
use crate::image::GrayFloatImage;

impl AkazeFeatures {
    /// Edge filter spacing for the derivatives of an evolution, in that
    /// evolution's pixels.
    pub(super) fn derivative_sigma_size(&self, evolution: &EvolutionStep) -> u32 {
        let sigma = evolution.esigma * self.derivative_factor / f64::from(evolution.ratio());
        (sigma.round() as u32).max(1)
    }

    /// Compute the multiscale derivatives of every evolution and the scale
    /// normalized determinant of the Hessian from them.
    pub(super) fn detector_response(&self, evolutions: &mut [EvolutionStep]) {
        for evolution in evolutions.iter_mut() {
            let sigma_size = self.derivative_sigma_size(evolution);
            evolution.lx = scharr_horizontal(&evolution.lsmooth, sigma_size);
            evolution.ly = scharr_vertical(&evolution.lsmooth, sigma_size);
            evolution.lxx = scharr_horizontal(&evolution.lx, sigma_size);
            evolution.lyy = scharr_vertical(&evolution.ly, sigma_size);
            evolution.lxy = scharr_vertical(&evolution.lx, sigma_size);

            let normalization = (sigma_size as f32).powi(4);
            let (lxx, lyy, lxy) = (&evolution.lxx, &evolution.lyy, &evolution.lxy);
            evolution.ldet = GrayFloatImage::from_fn(lxx.width(), lxx.height(), |x, y| {
                let xy = lxy.get(x, y);
                (lxx.get(x, y) * lyy.get(x, y) - xy * xy) * normalization
            });
        }
    }
}
