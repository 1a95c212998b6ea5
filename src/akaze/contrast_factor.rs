use super::derivatives::{simple_scharr_horizontal, simple_scharr_vertical};
use crate::image::{gaussian_blur, GrayFloatImage};
use float_ord::FloatOrd;
use log::*;

/// Used when the gradient histogram is degenerate, e.g. for flat images.
const FALLBACK_CONTRAST: f64 = 0.03;

/// The `percentile` of the gradient magnitudes of `image` after a blur of
/// `gradient_histogram_scale`, read from a histogram of `num_bins` bins.
///
/// Diffusion is strong across gradients below this contrast factor and weak
/// across stronger ones. Border pixels and zero gradients are ignored.
pub fn compute_contrast_factor(
    image: &GrayFloatImage,
    percentile: f64,
    gradient_histogram_scale: f64,
    num_bins: usize,
) -> f64 {
    let smooth = gaussian_blur(image, gradient_histogram_scale as f32);
    let lx = simple_scharr_horizontal(&smooth);
    let ly = simple_scharr_vertical(&smooth);
    let magnitudes: Vec<f64> = (1..smooth.height().saturating_sub(1))
        .flat_map(|y| (1..smooth.width().saturating_sub(1)).map(move |x| (x, y)))
        .map(|(x, y)| f64::from(lx.get(x, y)).hypot(f64::from(ly.get(x, y))))
        .filter(|&magnitude| magnitude != 0.0)
        .collect();
    let hmax = magnitudes
        .iter()
        .copied()
        .map(FloatOrd)
        .max()
        .map_or(0.0, |FloatOrd(m)| m);
    if hmax == 0.0 || num_bins == 0 {
        return FALLBACK_CONTRAST;
    }

    let mut histogram = vec![0usize; num_bins];
    for magnitude in &magnitudes {
        let bin = ((num_bins as f64 * magnitude / hmax) as usize).min(num_bins - 1);
        histogram[bin] += 1;
    }
    let threshold = (magnitudes.len() as f64 * percentile) as usize;
    let mut k = 0;
    let mut count = 0;
    while count < threshold && k < num_bins {
        count += histogram[k];
        k += 1;
    }
    trace!(
        "gradient maximum {}, {} of {} below bin {}",
        hmax,
        count,
        threshold,
        k
    );
    if count >= threshold {
        hmax * k as f64 / num_bins as f64
    } else {
        FALLBACK_CONTRAST
    }
}
