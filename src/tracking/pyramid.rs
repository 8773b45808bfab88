//! Grayscale image pyramid for coarse-to-fine optical flow
//!
//! Level 0 is the full-resolution frame; each further level halves both
//! dimensions by averaging 2x2 blocks.
use image::GrayImage;
use rayon::prelude::*;

/// Levels are not built below this side length
const MIN_LEVEL_SIDE: usize = 8;

/// Single-channel image with intensities scaled to [0, 1]
#[derive(Debug, Clone)]
pub struct FloatImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl FloatImage {
    /// Convert an 8-bit grayscale image
    pub fn from_gray(gray: &GrayImage) -> Self {
        Self {
            width: gray.width() as usize,
            height: gray.height() as usize,
            data: gray.as_raw().iter().map(|&v| v as f32 / 255.0).collect(),
        }
    }

    /// Width in pixels
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Bilinear sample with coordinates clamped to the image border
    #[inline]
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        if self.width == 0 || self.height == 0 {
            return 0.0;
        }
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let top = self.at(x0, y0) * (1.0 - fx) + self.at(x1, y0) * fx;
        let bottom = self.at(x0, y1) * (1.0 - fx) + self.at(x1, y1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Downscale by 2x, each output pixel the mean of a 2x2 block
    fn downscale_by_2(&self) -> Self {
        let dst_width = self.width / 2;
        let dst_height = self.height / 2;
        let mut data = vec![0.0f32; dst_width * dst_height];
        if dst_width == 0 {
            return Self {
                width: 0,
                height: 0,
                data,
            };
        }

        data.par_chunks_mut(dst_width)
            .enumerate()
            .for_each(|(y, row)| {
                let sy = y * 2;
                for (x, out) in row.iter_mut().enumerate() {
                    let sx = x * 2;
                    *out = (self.at(sx, sy)
                        + self.at(sx + 1, sy)
                        + self.at(sx, sy + 1)
                        + self.at(sx + 1, sy + 1))
                        * 0.25;
                }
            });

        Self {
            width: dst_width,
            height: dst_height,
            data,
        }
    }
}

/// An image pyramid with up to `max_level + 1` scales
#[derive(Debug, Clone)]
pub struct Pyramid {
    levels: Vec<FloatImage>,
}

impl Pyramid {
    /// Build levels 0..=max_level, stopping early once a level would be
    /// too small to hold a meaningful patch
    pub fn build(gray: &GrayImage, max_level: usize) -> Self {
        let mut levels = vec![FloatImage::from_gray(gray)];
        while levels.len() <= max_level {
            let last = &levels[levels.len() - 1];
            if last.width / 2 < MIN_LEVEL_SIDE || last.height / 2 < MIN_LEVEL_SIDE {
                break;
            }
            let next = last.downscale_by_2();
            levels.push(next);
        }
        Self { levels }
    }

    /// Number of levels actually built
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Image at `level`
    pub fn level(&self, level: usize) -> &FloatImage {
        &self.levels[level]
    }
}
