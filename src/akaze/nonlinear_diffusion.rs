use super::evolution::EvolutionStep;
use crate::image::GrayFloatImage;
use ndarray::{azip, s, Array2};

/// One explicit diffusion step of `step_size` on the evolution image, using
/// its conductivity image.
///
/// The flow between two neighbours is proportional to their difference and
/// to their mean conductivity, so the total intensity is preserved.
pub fn calculate_step(evolution: &mut EvolutionStep, step_size: f32) {
    let mut image = evolution.lt.to_array2();
    let conductivity = evolution.lflow.to_array2();
    let (rows, cols) = image.dim();
    if rows < 2 || cols < 2 {
        return;
    }

    let mut horizontal = Array2::<f32>::zeros((rows, cols - 1));
    azip!((
        flow in &mut horizontal,
        &a in image.slice(s![.., ..-1]),
        &b in image.slice(s![.., 1..]),
        &ca in conductivity.slice(s![.., ..-1]),
        &cb in conductivity.slice(s![.., 1..]),
    ) {
        *flow = 0.5 * step_size * (ca + cb) * (b - a);
    });
    let mut vertical = Array2::<f32>::zeros((rows - 1, cols));
    azip!((
        flow in &mut vertical,
        &a in image.slice(s![..-1, ..]),
        &b in image.slice(s![1.., ..]),
        &ca in conductivity.slice(s![..-1, ..]),
        &cb in conductivity.slice(s![1.., ..]),
    ) {
        *flow = 0.5 * step_size * (ca + cb) * (b - a);
    });

    image
        .slice_mut(s![.., ..-1])
        .zip_mut_with(&horizontal, |v, &f| *v += f);
    image
        .slice_mut(s![.., 1..])
        .zip_mut_with(&horizontal, |v, &f| *v -= f);
    image
        .slice_mut(s![..-1, ..])
        .zip_mut_with(&vertical, |v, &f| *v += f);
    image
        .slice_mut(s![1.., ..])
        .zip_mut_with(&vertical, |v, &f| *v -= f);
    evolution.lt = GrayFloatImage::from_array2(&image);
}

/// Perona-Malik conductivity `g2 = 1 / (1 + |grad L|^2 / k^2)`.
pub fn pm_g2(lx: &GrayFloatImage, ly: &GrayFloatImage, k: f64) -> GrayFloatImage {
    debug_assert_eq!(lx.dimensions(), ly.dimensions());
    let inverse_k = (1.0 / (k * k)) as f32;
    GrayFloatImage::from_fn(lx.width(), lx.height(), |x, y| {
        let (dx, dy) = (lx.get(x, y), ly.get(x, y));
        1.0 / (1.0 + inverse_k * (dx * dx + dy * dy))
    })
}
