use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{BowErr, BowResult};

/// Gaussian weights below this magnitude are snapped to zero.
const EPS: f64 = 1e-6;

/// Central difference taps used for first-derivative kernels.
const DERIV_TAPS: [f64; 3] = [-1.0, 0.0, 1.0];

/// Direction of a first-derivative operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    /// Derivative across rows (d/dy).
    Rows,
    /// Derivative across columns (d/dx).
    Cols,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
/// Square 2-D convolution kernel with its associated scale.
///
/// Weights are stored row-major. The anchor is at `(size / 2, size / 2)`
/// for every size, so an even-sized kernel is not centred.
pub struct Kernel {
    size: usize,
    sigma: f64,
    weights: Vec<f64>,
}

/// Side length of the kernel built for a given sigma: `ceil(6 * sigma + 1)`.
pub fn kernel_size(sigma: f64) -> usize {
    (sigma * 6. + 1.).ceil() as usize
}

fn check_shape(size: usize, sigma: f64) -> BowResult<()> {
    if size == 0 {
        return Err(BowErr::InvalidParameter("kernel size must be positive".into()));
    }
    if !sigma.is_finite() || sigma <= 0. {
        return Err(BowErr::InvalidParameter(format!("sigma {}", sigma)));
    }
    Ok(())
}

impl Kernel {
    /// Unnormalized Gaussian: `exp(-(x² + y²) / 2σ²)` at offset `(x, y)` from the anchor.
    ///
    /// Fails unless `size > 0` and `sigma` is finite and positive.
    pub fn gaussian(size: usize, sigma: f64) -> BowResult<Self> {
        check_shape(size, sigma)?;
        Ok(Self::gaussian_unchecked(size, sigma))
    }

    /// Laplacian-of-Gaussian, shifted to zero mean so flat regions give no response.
    ///
    /// Same preconditions as [`Kernel::gaussian`].
    pub fn laplacian_of_gaussian(size: usize, sigma: f64) -> BowResult<Self> {
        check_shape(size, sigma)?;
        Ok(Self::laplacian_of_gaussian_unchecked(size, sigma))
    }

    pub(crate) fn gaussian_unchecked(size: usize, sigma: f64) -> Self {
        let c = 2. * sigma * sigma;
        let weights = Self::offsets(size)
            .map(|(x, y)| {
                let w = (-((x * x + y * y) as f64) / c).exp();
                if w.abs() < EPS {
                    0.
                } else {
                    w
                }
            })
            .collect();
        Self {
            size,
            sigma,
            weights,
        }
    }

    pub(crate) fn laplacian_of_gaussian_unchecked(size: usize, sigma: f64) -> Self {
        let gaussian = Self::gaussian_unchecked(size, sigma);
        let c1 = 2. * sigma * sigma;
        let c2 = sigma * sigma * sigma * sigma;
        let log: Vec<f64> = Self::offsets(size)
            .zip(&gaussian.weights)
            .map(|((x, y), g)| g * ((x * x + y * y) as f64 - c1) / c2)
            .collect();

        let mean = log.iter().sum::<f64>() / (size * size) as f64;
        Self {
            size,
            sigma,
            weights: log.into_iter().map(|w| w - mean).collect(),
        }
    }

    /// First derivative of this kernel along `axis`, computed by correlating
    /// it with `[-1, 0, 1]` under reflect-101 borders.
    pub fn derivative(&self, axis: Axis) -> Self {
        let (tw, th) = match axis {
            Axis::Rows => (1, 3),
            Axis::Cols => (3, 1),
        };
        let weights = correlate(
            &self.weights,
            self.size,
            self.size,
            &DERIV_TAPS,
            tw,
            th,
        );
        Self {
            size: self.size,
            sigma: self.sigma,
            weights,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.weights[row * self.size + col]
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    /// Apply the kernel to one `width × height` plane ("same" output size).
    pub fn apply(&self, src: &[f64], width: usize, height: usize) -> Vec<f64> {
        correlate(src, width, height, &self.weights, self.size, self.size)
    }

    /// Row-major `(row - m, col - m)` offsets with `m = size / 2`.
    fn offsets(size: usize) -> impl Iterator<Item = (i64, i64)> {
        let m = (size / 2) as i64;
        (0..size as i64).flat_map(move |i| (0..size as i64).map(move |j| (i - m, j - m)))
    }
}

/// Reflect an out-of-range coordinate back into `[0, n)` without repeating
/// the edge sample (`gfedcb|abcdefgh|gfedcba`).
pub fn reflect_101(mut p: i64, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let last = n as i64 - 1;
    loop {
        if p < 0 {
            p = -p;
        } else if p > last {
            p = 2 * last - p;
        } else {
            return p as usize;
        }
    }
}

/// Correlate a single plane with a `kw × kh` kernel anchored at `(kw / 2, kh / 2)`.
///
/// The kernel is not flipped. Borders are handled with [`reflect_101`].
pub fn correlate(
    src: &[f64],
    width: usize,
    height: usize,
    kernel: &[f64],
    kw: usize,
    kh: usize,
) -> Vec<f64> {
    let mut dst = vec![0.; width * height];
    if width == 0 || height == 0 {
        return dst;
    }

    // Source column for every (tap column, output column) pair.
    let (ax, ay) = ((kw / 2) as i64, (kh / 2) as i64);
    let cols: Vec<Vec<usize>> = (0..kw as i64)
        .map(|j| {
            (0..width as i64)
                .map(|x| reflect_101(x + j - ax, width))
                .collect()
        })
        .collect();

    dst.par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, out)| {
            for i in 0..kh {
                let sy = reflect_101(y as i64 + i as i64 - ay, height);
                let src_row = &src[sy * width..(sy + 1) * width];
                for (j, col) in cols.iter().enumerate() {
                    let w = kernel[i * kw + j];
                    if w == 0. {
                        continue;
                    }
                    for (o, &sx) in out.iter_mut().zip(col) {
                        *o += w * src_row[sx];
                    }
                }
            }
        });
    dst
}
