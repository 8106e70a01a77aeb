// THEORY:
// The low-level raster operations the motion detector is built from. Each one is a
// pure function from buffer to buffer so the detector stays a short, readable list
// of steps: grayscale, blur, difference, binarize, dilate.
//
// The arithmetic follows the conventions of the classical OpenCV pipeline these
// scores were calibrated against: fixed-point BT.601 luma, sigma derived from the
// kernel size when none is given, reflect-101 borders for the blur, and a dilation
// that ignores pixels outside the image.

use image::{GrayImage, Luma, Rgb, RgbImage};

/// Converts an RGB image to single-channel luma (0.299 R + 0.587 G + 0.114 B).
pub fn to_grayscale(image: &RgbImage) -> GrayImage {
    // 14-bit fixed point weights, rounded.
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const HALF: u32 = 1 << 13;

    let mut gray = GrayImage::new(image.width(), image.height());
    for (dst, src) in gray.pixels_mut().zip(image.pixels()) {
        let [r, g, b] = src.0;
        let luma = (r as u32 * R + g as u32 * G + b as u32 * B + HALF) >> 14;
        *dst = Luma([luma as u8]);
    }
    gray
}

/// Builds a normalized 1D Gaussian kernel.
///
/// A non-positive `sigma` is derived from the kernel size, so a 21-tap kernel
/// gets sigma = 3.5.
pub fn gaussian_kernel(size: u32, sigma: f64) -> Vec<f64> {
    let size = size.max(1) as usize;
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let center = (size as f64 - 1.0) / 2.0;
    let scale = -0.5 / (sigma * sigma);

    let mut kernel: Vec<f64> = (0..size)
        .map(|i| {
            let x = i as f64 - center;
            (scale * x * x).exp()
        })
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

/// Maps an out-of-range index back into `0..len` by mirroring without repeating the edge.
fn reflect_101(index: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let last = len as isize - 1;
    let mut i = index;
    while i < 0 || i > last {
        if i < 0 {
            i = -i;
        }
        if i > last {
            i = 2 * last - i;
        }
    }
    i as usize
}

/// Separable Gaussian blur with a square `kernel_size` x `kernel_size` kernel.
pub fn gaussian_blur(image: &GrayImage, kernel_size: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    if w == 0 || h == 0 {
        return image.clone();
    }

    let kernel = gaussian_kernel(kernel_size, 0.0);
    let radius = (kernel.len() / 2) as isize;
    let src = image.as_raw();

    // Horizontal pass into a float buffer, vertical pass back into bytes.
    let mut horizontal = vec![0f64; w * h];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = reflect_101(x as isize + k as isize - radius, w);
                acc += weight * row[sx] as f64;
            }
            horizontal[y * w + x] = acc;
        }
    }

    let mut out = GrayImage::new(width, height);
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = reflect_101(y as isize + k as isize - radius, h);
                acc += weight * horizontal[sy * w + x];
            }
            out.put_pixel(x as u32, y as u32, Luma([acc.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Absolute difference of two equally sized images, binarized: `|a - b| >= threshold` becomes 255.
pub fn abs_diff_threshold(a: &GrayImage, b: &GrayImage, threshold: u8) -> GrayImage {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    let mut mask = GrayImage::new(a.width(), a.height());
    for ((dst, pa), pb) in mask.pixels_mut().zip(a.pixels()).zip(b.pixels()) {
        let diff = pa.0[0].abs_diff(pb.0[0]);
        *dst = Luma([if diff >= threshold { 255 } else { 0 }]);
    }
    mask
}

/// Morphological dilation with a 3x3 rectangular structuring element.
pub fn dilate(mask: &GrayImage, iterations: u32) -> GrayImage {
    let (width, height) = mask.dimensions();
    let mut current = mask.clone();
    for _ in 0..iterations {
        let mut next = GrayImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let mut max = 0u8;
                for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                        max = max.max(current.get_pixel(nx, ny).0[0]);
                    }
                }
                next.put_pixel(x, y, Luma([max]));
            }
        }
        current = next;
    }
    current
}

/// Draws the outline of the rectangle spanning `(x0, y0)..=(x1, y1)`, `thickness` pixels wide,
/// growing inwards. Parts outside the image are clipped.
pub fn draw_rectangle(
    image: &mut RgbImage,
    (x0, y0): (u32, u32),
    (x1, y1): (u32, u32),
    color: Rgb<u8>,
    thickness: u32,
) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let x1 = x1.min(width - 1);
    let y1 = y1.min(height - 1);
    if x0 > x1 || y0 > y1 {
        return;
    }

    for t in 0..thickness {
        let (left, top) = (x0 + t, y0 + t);
        let (Some(right), Some(bottom)) = (x1.checked_sub(t), y1.checked_sub(t)) else {
            break;
        };
        if left > right || top > bottom {
            break;
        }
        for x in left..=right {
            image.put_pixel(x, top, color);
            image.put_pixel(x, bottom, color);
        }
        for y in top..=bottom {
            image.put_pixel(left, y, color);
            image.put_pixel(right, y, color);
        }
    }
}
