use image::RgbImage;

// sRGB (D65) to XYZ, rows scaled by the reference white.
const XN: f64 = 0.950456;
const ZN: f64 = 1.088754;
const RGB_TO_XYZ: [[f64; 3]; 3] = [
    [0.412453 / XN, 0.357580 / XN, 0.180423 / XN],
    [0.212671, 0.715160, 0.072169],
    [0.019334 / ZN, 0.119193 / ZN, 0.950227 / ZN],
];

const T: f64 = 0.008856;

/// Planar CIE L*a*b* image.
///
/// `channels[0]` is L* in `[0, 100]`, `channels[1]` and `channels[2]` are a* and b*.
/// Each plane holds `width * height` values in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct LabImage {
    pub width: usize,
    pub height: usize,
    pub channels: [Vec<f64>; 3],
}

/// Convert an 8-bit sRGB image to planar L*a*b*.
///
/// # Example
///
/// ```
/// use image::{Rgb, RgbImage};
/// use texton_bow::color::lab_from_rgb;
///
/// let image = RgbImage::from_pixel(4, 5, Rgb([255, 255, 255]));
/// let lab = lab_from_rgb(&image);
///
/// assert_eq!(lab.channels[0].len(), 4 * 5);
/// assert!((lab.channels[0][0] - 100.).abs() < 1e-3);
/// ```
pub fn lab_from_rgb(image: &RgbImage) -> LabImage {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let n = width * height;
    let lut: Vec<f64> = (0..=255u8).map(srgb_to_linear).collect();

    let mut channels = [vec![0.; n], vec![0.; n], vec![0.; n]];
    for (i, px) in image.pixels().enumerate() {
        let rgb = [
            lut[px.0[0] as usize],
            lut[px.0[1] as usize],
            lut[px.0[2] as usize],
        ];
        let [l, a, b] = lab_from_linear(rgb);
        channels[0][i] = l;
        channels[1][i] = a;
        channels[2][i] = b;
    }

    LabImage {
        width,
        height,
        channels,
    }
}

fn srgb_to_linear(v: u8) -> f64 {
    let c = v as f64 / 255.;
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn lab_from_linear(rgb: [f64; 3]) -> [f64; 3] {
    let xyz: Vec<f64> = RGB_TO_XYZ
        .iter()
        .map(|row| row[0] * rgb[0] + row[1] * rgb[1] + row[2] * rgb[2])
        .collect();
    let (fx, fy, fz) = (f(xyz[0]), f(xyz[1]), f(xyz[2]));

    let l = if xyz[1] > T {
        116. * fy - 16.
    } else {
        903.3 * xyz[1]
    };
    [l, 500. * (fx - fy), 200. * (fy - fz)]
}

fn f(t: f64) -> f64 {
    if t > T {
        t.cbrt()
    } else {
        7.787 * t + 16. / 116.
    }
}
