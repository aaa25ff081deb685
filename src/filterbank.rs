use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::color::lab_from_rgb;
use crate::kernel::{kernel_size, Axis, Kernel};
use crate::*;

/// Number of color channels every kernel is applied to.
pub const NUM_CHANNELS: usize = 3;

/// Scale parameters of a [`FilterBank`].
///
/// For every `scale`, each sigma list is multiplied by `sqrt(2)^scale`.
/// Training and inference must use identical parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FilterBankParams {
    pub scales: Vec<f64>,
    pub gaussian_sigmas: Vec<f64>,
    pub log_sigmas: Vec<f64>,
    pub dgaussian_sigmas: Vec<f64>,
}

impl Default for FilterBankParams {
    fn default() -> Self {
        Self {
            scales: vec![1., 2., 3.],
            gaussian_sigmas: vec![1., 2., 4.],
            log_sigmas: vec![1., 2., 4., 8.],
            dgaussian_sigmas: vec![2., 4.],
        }
    }
}

/// Fixed, ordered collection of kernels.
///
/// Per scale the order is: Gaussians, then a (d/dy, d/dx) pair for every
/// derivative sigma, then Laplacian-of-Gaussians. The order defines the
/// column layout of every [`ResponseMatrix`].
#[derive(Clone, PartialEq)]
pub struct FilterBank {
    kernels: Vec<Kernel>,
}

/// Filter responses of one image.
///
/// One row per pixel (index `row * width + col`), `3 * num_kernels` columns:
/// the L*, a*, b* responses of kernel `f` live at columns `3f..3f + 3`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl FilterBank {
    /// Build a filter bank, rejecting non-finite or non-positive sigmas.
    pub fn new(params: &FilterBankParams) -> BowResult<Self> {
        if let Some(s) = params.scales.iter().find(|s| !s.is_finite()) {
            return Err(BowErr::InvalidParameter(format!("scale {}", s)));
        }
        let sigmas = params
            .gaussian_sigmas
            .iter()
            .chain(&params.log_sigmas)
            .chain(&params.dgaussian_sigmas);
        for &s in sigmas.clone() {
            if !s.is_finite() || s <= 0. {
                return Err(BowErr::InvalidParameter(format!("sigma {}", s)));
            }
        }
        for &scale in &params.scales {
            let mut scaled = sigmas.clone().map(|s| s * 2f64.sqrt().powf(scale));
            if let Some(s) = scaled.find(|s| !s.is_finite() || *s <= 0.) {
                return Err(BowErr::InvalidParameter(format!("scaled sigma {}", s)));
            }
        }

        let bank = Self::build(params);
        if bank.kernels.is_empty() {
            return Err(BowErr::InvalidParameter(
                "filter bank parameters produce no kernels".into(),
            ));
        }
        Ok(bank)
    }

    fn build(params: &FilterBankParams) -> Self {
        let mut kernels = Vec::new();
        for &scale in &params.scales {
            let scale_multiply = 2f64.sqrt().powf(scale);

            for &s in &params.gaussian_sigmas {
                let sigma = s * scale_multiply;
                kernels.push(Kernel::gaussian_unchecked(kernel_size(sigma), sigma));
            }

            for &s in &params.dgaussian_sigmas {
                let sigma = s * scale_multiply;
                let gaussian = Kernel::gaussian_unchecked(kernel_size(sigma), sigma);
                kernels.push(gaussian.derivative(Axis::Rows));
                kernels.push(gaussian.derivative(Axis::Cols));
            }

            for &s in &params.log_sigmas {
                let sigma = s * scale_multiply;
                kernels.push(Kernel::laplacian_of_gaussian_unchecked(kernel_size(sigma), sigma));
            }
        }
        Self { kernels }
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    /// Width of a response row: `3 * len()`.
    pub fn response_dim(&self) -> usize {
        NUM_CHANNELS * self.kernels.len()
    }

    /// Compute the per-pixel response of every kernel on the L*a*b* version of `image`.
    pub fn filter(&self, image: &RgbImage) -> ResponseMatrix {
        let lab = lab_from_rgb(image);
        let rows = lab.width * lab.height;
        let cols = self.response_dim();
        let mut data = vec![0.; rows * cols];

        for (f, kernel) in self.kernels.iter().enumerate() {
            for (c, plane) in lab.channels.iter().enumerate() {
                let filtered = kernel.apply(plane, lab.width, lab.height);
                let col = NUM_CHANNELS * f + c;
                for (p, v) in filtered.into_iter().enumerate() {
                    data[p * cols + col] = v;
                }
            }
        }

        ResponseMatrix { rows, cols, data }
    }

    /// [`FilterBank::filter`] over many images in parallel. Output order matches input order.
    pub fn filter_batch(&self, images: &[RgbImage]) -> Vec<ResponseMatrix> {
        images.par_iter().map(|image| self.filter(image)).collect()
    }
}

impl Default for FilterBank {
    fn default() -> Self {
        Self::build(&FilterBankParams::default())
    }
}

impl fmt::Debug for FilterBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sizes: Vec<usize> = self.kernels.iter().map(|k| k.size()).collect();
        f.debug_struct("FilterBank")
            .field("Kernels", &self.kernels.len())
            .field("Response Dimension", &self.response_dim())
            .field("Min Kernel Size", &sizes.iter().min())
            .field("Max Kernel Size", &sizes.iter().max())
            .finish()
    }
}

impl ResponseMatrix {
    /// Build from row-major data. `data.len()` must equal `rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> BowResult<Self> {
        if data.len() != rows * cols {
            return Err(BowErr::DimensionMismatch {
                expected: rows * cols,
                found: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> {
        // chunks_exact requires a non-zero chunk size
        self.data.chunks_exact(self.cols.max(1))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::Rgb;

    fn small_params() -> FilterBankParams {
        FilterBankParams {
            scales: vec![0.],
            gaussian_sigmas: vec![0.5],
            log_sigmas: vec![0.5],
            dgaussian_sigmas: vec![0.5],
        }
    }

    #[test]
    fn test_default_layout() {
        let fb = FilterBank::default();
        assert_eq!(fb.len(), 33);
        assert_eq!(fb.response_dim(), 99);

        let first = &fb.kernels()[0];
        assert_abs_diff_eq!(first.sigma(), 2f64.sqrt(), epsilon = 1e-12);
        assert_eq!(first.size(), 10);

        // scale 1 block: 3 gaussians, 2 derivative pairs, 4 LoGs
        for k in &fb.kernels()[7..11] {
            assert_abs_diff_eq!(k.sum(), 0., epsilon = 1e-9);
        }
        assert_abs_diff_eq!(fb.kernels()[11].sigma(), 2., epsilon = 1e-12);
        assert_eq!(fb, FilterBank::new(&FilterBankParams::default()).unwrap());
    }

    #[test]
    fn test_invalid_params() {
        let mut params = small_params();
        params.log_sigmas = vec![-1.];
        assert!(matches!(
            FilterBank::new(&params),
            Err(BowErr::InvalidParameter(_))
        ));

        let empty = FilterBankParams {
            scales: vec![1.],
            gaussian_sigmas: vec![],
            log_sigmas: vec![],
            dgaussian_sigmas: vec![],
        };
        assert!(FilterBank::new(&empty).is_err());

        let mut huge = small_params();
        huge.scales = vec![5000.];
        assert!(matches!(
            FilterBank::new(&huge),
            Err(BowErr::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_response_shape_and_determinism() {
        let fb = FilterBank::new(&small_params()).unwrap();
        assert_eq!(fb.len(), 4);

        let mut image = RgbImage::new(5, 3);
        for (x, y, px) in image.enumerate_pixels_mut() {
            *px = Rgb([(x * 50) as u8, (y * 80) as u8, 30]);
        }
        let r1 = fb.filter(&image);
        let r2 = fb.filter(&image);
        assert_eq!(r1.rows(), 15);
        assert_eq!(r1.cols(), 12);
        assert_eq!(r1, r2);
        assert_eq!(r1.iter_rows().count(), 15);
    }

    #[test]
    fn test_response_column_layout() {
        let fb = FilterBank::new(&small_params()).unwrap();
        let (w, h) = (6, 4);
        let image = RgbImage::from_fn(w as u32, h as u32, |x, y| {
            Rgb([(x * 40) as u8, (y * 60 + x * 5) as u8, (255 - x * y * 9) as u8])
        });
        let lab = lab_from_rgb(&image);
        let response = fb.filter(&image);

        for (f, kernel) in fb.kernels().iter().enumerate() {
            for c in 0..NUM_CHANNELS {
                let expected = kernel.apply(&lab.channels[c], w, h);
                for p in 0..w * h {
                    assert_eq!(response.row(p)[3 * f + c], expected[p]);
                }
            }
        }
        // channels differ, so a channel-major layout would not match
        assert_ne!(response.row(0)[0], response.row(0)[1]);
    }

    #[test]
    fn test_uniform_image_gives_uniform_rows() {
        let fb = FilterBank::default();
        let image = RgbImage::from_pixel(2, 2, Rgb([200, 40, 90]));
        let response = fb.filter(&image);
        assert_eq!(response.rows(), 4);
        assert_eq!(response.cols(), 3 * fb.len());

        for i in 1..4 {
            assert_eq!(response.row(0), response.row(i));
        }
        for (f, kernel) in fb.kernels().iter().enumerate() {
            if kernel.sum().abs() < 1e-9 {
                for c in 0..3 {
                    assert_abs_diff_eq!(response.row(0)[3 * f + c], 0., epsilon = 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_filter_batch_preserves_order() {
        let fb = FilterBank::new(&small_params()).unwrap();
        let images = vec![
            RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])),
            RgbImage::from_pixel(3, 1, Rgb([255, 255, 255])),
        ];
        let responses = fb.filter_batch(&images);
        assert_eq!(responses[0], fb.filter(&images[0]));
        assert_eq!(responses[1].rows(), 3);
    }

    #[test]
    fn test_from_vec_checks_length() {
        assert!(ResponseMatrix::from_vec(2, 3, vec![0.; 6]).is_ok());
        assert!(matches!(
            ResponseMatrix::from_vec(2, 3, vec![0.; 5]),
            Err(BowErr::DimensionMismatch { expected: 6, found: 5 })
        ));
    }
}
