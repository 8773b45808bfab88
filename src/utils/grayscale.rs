//! Convert RGB frames to 8-bit luminance for optical flow
//! Y = 0.299*R + 0.587*G + 0.114*B
//! Uses fast integer arithmetic: Y = (76*R + 150*G + 29*B) >> 8
use image::{GrayImage, RgbImage};
use rayon::prelude::*;

/// Coefficients for grayscale conversion: Y = (76*R + 150*G + 29*B) >> 8
const COEF_R: u32 = 76;
const COEF_G: u32 = 150;
const COEF_B: u32 = 29;

/// Frames at or above this many pixels are converted row-parallel
const PARALLEL_THRESHOLD: usize = 320 * 240;

#[inline]
fn luminance(px: &[u8]) -> u8 {
    let lum = (COEF_R * px[0] as u32 + COEF_G * px[1] as u32 + COEF_B * px[2] as u32) >> 8;
    lum.min(255) as u8
}

/// Convert packed RGB bytes to grayscale
pub fn rgb_to_grayscale(rgb: &[u8], width: usize, height: usize) -> Vec<u8> {
    let pixel_count = width * height;
    rgb[..pixel_count * 3].chunks_exact(3).map(luminance).collect()
}

/// Convert RGB to grayscale using parallel processing
/// Processes rows in parallel for multi-core speedup
pub fn rgb_to_grayscale_parallel(rgb: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut gray = vec![0u8; width * height];
    if width == 0 {
        return gray;
    }

    gray.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        let src = &rgb[y * width * 3..(y + 1) * width * 3];
        for (dst, px) in row.iter_mut().zip(src.chunks_exact(3)) {
            *dst = luminance(px);
        }
    });

    gray
}

/// Grayscale copy of a frame
pub fn frame_to_gray(frame: &RgbImage) -> GrayImage {
    let (width, height) = frame.dimensions();
    let (w, h) = (width as usize, height as usize);
    let data = if w * h >= PARALLEL_THRESHOLD {
        rgb_to_grayscale_parallel(frame.as_raw(), w, h)
    } else {
        rgb_to_grayscale(frame.as_raw(), w, h)
    };
    // Length is exactly width * height by construction.
    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::new(width, height))
}
