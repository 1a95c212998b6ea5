use derive_more::{Deref, DerefMut};
use image::{imageops, GrayImage, ImageBuffer, Luma};
use ndarray::{azip, s, Array2};

pub type GrayImageBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A single channel float image.
///
/// Intensities keep the 8-bit range (`0.0..=255.0`) of the image they were
/// created from, so thresholds expressed in gray levels apply unchanged.
/// All filters treat the border as reflected about the edge pixel
/// (`gfedcb|abcdefgh|gfedcba`).
#[derive(Debug, Clone, Deref, DerefMut)]
pub struct GrayFloatImage(pub GrayImageBuffer);

impl GrayFloatImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self(ImageBuffer::from_pixel(
            width as u32,
            height as u32,
            Luma([0.0]),
        ))
    }

    /// Convert an 8-bit image without rescaling the intensities.
    pub fn from_gray(image: &GrayImage) -> Self {
        Self(ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
            Luma([f32::from(image[(x, y)][0])])
        }))
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        Self(ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
            Luma([f(x as usize, y as usize)])
        }))
    }

    pub fn to_array2(&self) -> Array2<f32> {
        Array2::from_shape_fn((self.height(), self.width()), |(y, x)| self.get(x, y))
    }

    pub fn from_array2(array: &Array2<f32>) -> Self {
        let (height, width) = array.dim();
        Self::from_fn(width, height, |x, y| array[[y, x]])
    }

    pub fn width(&self) -> usize {
        self.0.width() as usize
    }

    pub fn height(&self) -> usize {
        self.0.height() as usize
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.0.as_raw()[y * self.width() + x]
    }

    pub fn put(&mut self, x: usize, y: usize, pixel_value: f32) {
        let width = self.width();
        let raw: &mut [f32] = &mut self.0;
        raw[y * width + x] = pixel_value;
    }

    /// Fetch a pixel, reflecting coordinates that fall outside the image.
    pub fn get_reflected(&self, x: isize, y: isize) -> f32 {
        self.get(reflect_101(x, self.width()), reflect_101(y, self.height()))
    }

    /// Bilinear interpolation with coordinates clamped to the image.
    pub fn sample_bilinear(&self, x: f32, y: f32) -> f32 {
        let x = x.clamp(0.0, (self.width() - 1) as f32);
        let y = y.clamp(0.0, (self.height() - 1) as f32);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width() - 1);
        let y1 = (y0 + 1).min(self.height() - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let top = self.get(x0, y0) * (1.0 - fx) + self.get(x1, y0) * fx;
        let bottom = self.get(x0, y1) * (1.0 - fx) + self.get(x1, y1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Keep every second pixel in both directions.
    pub fn decimate(&self) -> Self {
        let width = (self.width() / 2).max(1);
        let height = (self.height() / 2).max(1);
        Self::from_fn(width, height, |x, y| self.get(2 * x, 2 * y))
    }

    /// Halve both dimensions by averaging 2x2 tiles. A trailing odd row or
    /// column is dropped.
    pub fn half_size(&self) -> Self {
        let (width, height) = (self.width() / 2, self.height() / 2);
        let pixels = self.to_array2();
        let mut half = Array2::zeros((height, width));
        azip!((
            out in &mut half,
            tile in pixels.slice(s![..height * 2, ..width * 2]).exact_chunks((2, 2)),
        ) {
            *out = tile.sum() * 0.25;
        });
        Self::from_array2(&half)
    }

    /// Bilinear resize with pixel centers aligned.
    pub fn resize(&self, width: usize, height: usize) -> Self {
        let sx = self.width() as f32 / width as f32;
        let sy = self.height() as f32 / height as f32;
        Self::from_fn(width, height, |x, y| {
            self.sample_bilinear((x as f32 + 0.5) * sx - 0.5, (y as f32 + 0.5) * sy - 0.5)
        })
    }

    /// Pixel-wise `self - other`; both images must have the same size.
    pub fn difference(&self, other: &Self) -> Self {
        debug_assert_eq!(self.dimensions(), other.dimensions());
        let mut out = self.clone();
        for (a, &b) in out.0.iter_mut().zip(other.0.as_raw().iter()) {
            *a -= b;
        }
        out
    }
}

/// Map an out of range coordinate back into `0..len` by reflection.
pub fn reflect_101(mut i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let len = len as isize;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= len {
            i = 2 * len - 2 - i;
        } else {
            return i as usize;
        }
    }
}

pub fn horizontal_filter(image: &GrayFloatImage, kernel: &[f32]) -> GrayFloatImage {
    debug_assert!(kernel.len() % 2 == 1);
    let half = (kernel.len() / 2) as isize;
    GrayFloatImage::from_fn(image.width(), image.height(), |x, y| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, &w)| w * image.get_reflected(x as isize + k as isize - half, y as isize))
            .sum()
    })
}

pub fn vertical_filter(image: &GrayFloatImage, kernel: &[f32]) -> GrayFloatImage {
    debug_assert!(kernel.len() % 2 == 1);
    let half = (kernel.len() / 2) as isize;
    GrayFloatImage::from_fn(image.width(), image.height(), |x, y| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, &w)| w * image.get_reflected(x as isize, y as isize + k as isize - half))
            .sum()
    })
}

pub fn separable_filter(
    image: &GrayFloatImage,
    h_kernel: &[f32],
    v_kernel: &[f32],
) -> GrayFloatImage {
    let h = horizontal_filter(image, h_kernel);
    vertical_filter(&h, v_kernel)
}

/// Generate a normalized Gaussian kernel.
///
/// # Arguments
/// * `sigma` - standard deviation.
/// * `kernel_size` - The size of the kernel, must be odd.
pub fn gaussian_kernel(sigma: f32, kernel_size: usize) -> Vec<f32> {
    assert!(kernel_size % 2 == 1, "kernel_size must be odd");
    let half = (kernel_size / 2) as i32;
    let scale = -0.5 / (sigma * sigma);
    let mut kernel: Vec<f32> = (-half..=half)
        .map(|i| (scale * (i * i) as f32).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for val in kernel.iter_mut() {
        *val /= sum;
    }
    kernel
}

/// Perform Gaussian blur on an image.
///
/// The kernel covers four standard deviations on each side.
pub fn gaussian_blur(image: &GrayFloatImage, sigma: f32) -> GrayFloatImage {
    assert!(sigma > 0.0, "sigma must be > 0.0");
    let kernel_size = ((sigma * 8.0 + 1.0).round() as usize) | 1;
    let kernel = gaussian_kernel(sigma, kernel_size.max(3));
    separable_filter(image, &kernel, &kernel)
}

/// First order horizontal derivative with the 3x3 Sobel operator.
pub fn sobel_horizontal(image: &GrayFloatImage) -> GrayFloatImage {
    separable_filter(image, &[-1., 0., 1.], &[1., 2., 1.])
}

/// First order vertical derivative with the 3x3 Sobel operator.
pub fn sobel_vertical(image: &GrayFloatImage) -> GrayFloatImage {
    separable_filter(image, &[1., 2., 1.], &[-1., 0., 1.])
}

/// Downscale an 8-bit image by `scale` (greater than one shrinks) with
/// linear interpolation.
pub fn scale_down(image: &GrayImage, scale: f32) -> GrayImage {
    let width = ((image.width() as f32 / scale).round() as u32).max(1);
    let height = ((image.height() as f32 / scale).round() as u32).max(1);
    imageops::resize(image, width, height, imageops::FilterType::Triangle)
}
