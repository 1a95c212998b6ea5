use crate::image::{separable_filter, GrayFloatImage};

/// The 3x3 Scharr operator in x, unnormalized.
pub fn simple_scharr_horizontal(image: &GrayFloatImage) -> GrayFloatImage {
    separable_filter(image, &[-1., 0., 1.], &[3., 10., 3.])
}

/// The 3x3 Scharr operator in y, unnormalized.
pub fn simple_scharr_vertical(image: &GrayFloatImage) -> GrayFloatImage {
    separable_filter(image, &[3., 10., 3.], &[-1., 0., 1.])
}

/// Horizontal Scharr derivative whose taps are `sigma_size` pixels apart.
///
/// For `sigma_size > 1` the kernel is normalized so that a ramp of slope one
/// per pixel has a derivative of one.
pub fn scharr_horizontal(image: &GrayFloatImage, sigma_size: u32) -> GrayFloatImage {
    if sigma_size == 1 {
        return simple_scharr_horizontal(image);
    }
    let (derivative, smoothing) = scharr_kernels(sigma_size);
    separable_filter(image, &derivative, &smoothing)
}

/// Vertical counterpart of [`scharr_horizontal`].
pub fn scharr_vertical(image: &GrayFloatImage, sigma_size: u32) -> GrayFloatImage {
    if sigma_size == 1 {
        return simple_scharr_vertical(image);
    }
    let (derivative, smoothing) = scharr_kernels(sigma_size);
    separable_filter(image, &smoothing, &derivative)
}

/// The differencing and the smoothing kernel of a widened Scharr operator.
fn scharr_kernels(sigma_size: u32) -> (Vec<f32>, Vec<f32>) {
    // Ratio between the center and the side taps of the smoothing kernel.
    let w = 10.0 / 3.0;
    let side = (1.0 / (2.0 * f64::from(sigma_size) * (w + 2.0))) as f32;
    let size = 2 * sigma_size as usize + 1;
    let mut derivative = vec![0.0; size];
    derivative[0] = -1.0;
    derivative[size - 1] = 1.0;
    let mut smoothing = vec![0.0; size];
    smoothing[0] = side;
    smoothing[size / 2] = side * w as f32;
    smoothing[size - 1] = side;
    (derivative, smoothing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widened_scharr_of_a_ramp_is_its_slope() {
        let image = GrayFloatImage::from_fn(30, 30, |x, y| 0.5 * x as f32 + 0.1 * y as f32);
        for sigma_size in 2..5 {
            let dx = scharr_horizontal(&image, sigma_size);
            let dy = scharr_vertical(&image, sigma_size);
            assert!((dx.get(15, 15) - 0.5).abs() < 1e-4);
            assert!((dy.get(15, 15) - 0.1).abs() < 1e-4);
        }
    }

    #[test]
    fn simple_scharr_is_unnormalized() {
        let image = GrayFloatImage::from_fn(9, 9, |x, _| x as f32);
        // Taps two pixels apart, smoothing weights summing to 16.
        assert!((simple_scharr_horizontal(&image).get(4, 4) - 32.0).abs() < 1e-4);
        assert!(simple_scharr_vertical(&image).get(4, 4).abs() < 1e-4);
    }
}
