use image::{GrayImage, Luma, RgbImage};
use imageproc::drawing::{draw_antialiased_line_segment_mut, draw_polygon_mut};
use imageproc::pixelops::interpolate;
use imageproc::point::Point as PolyPoint;
use rayon::prelude::*;

use crate::config::CompositorConfig;
use crate::models::{Point, Quad};
use crate::utils::geometry::{polygon_area, CanonicalCorners, Homography};

/// Warps a preview image into the frame just below a tracked code
#[derive(Debug, Clone, Default)]
pub struct PreviewCompositor {
    config: CompositorConfig,
}

impl PreviewCompositor {
    /// Create a compositor
    pub fn new(config: CompositorConfig) -> Self {
        Self { config }
    }

    /// Placement quad for the overlay as `[TL', TR', BR', BL']`, rounded to
    /// whole pixels.
    ///
    /// The quad hangs under the code's bottom edge, `width_scale` times as
    /// wide on each side of its midpoint and as tall as the code's left edge.
    pub fn placement_quad(&self, corners: &Quad) -> Quad {
        let c = CanonicalCorners::from_quad(corners);
        let center = c.bottom_right.midpoint(&c.bottom_left);
        let lr = (c.bottom_right - c.bottom_left) * self.config.width_scale;
        let tb = c.top_left - c.bottom_left;
        let gap = tb * self.config.gap_ratio;

        let tl = center - lr - gap;
        let tr = center + lr - gap;
        let bl = tl - tb;
        let br = tr - tb;
        [tl.round(), tr.round(), br.round(), bl.round()]
    }

    /// Blend `overlay` into `frame` at the placement derived from `corners`.
    ///
    /// The result is always `frame_width` x `frame_height`. A degenerate
    /// placement returns the frame unchanged.
    pub fn composite(
        &self,
        frame: &RgbImage,
        corners: &Quad,
        overlay: &RgbImage,
        frame_width: u32,
        frame_height: u32,
    ) -> RgbImage {
        let mut out = fit_to_size(frame, frame_width, frame_height);
        if frame_width == 0 || frame_height == 0 || overlay.width() == 0 || overlay.height() == 0 {
            return out;
        }

        let dst = self.placement_quad(corners);
        if !dst.iter().all(Point::is_finite) || polygon_area(&dst).abs() < 1.0 {
            log::debug!("skipping composite onto degenerate placement {dst:?}");
            return out;
        }

        let (ow, oh) = (overlay.width() as f32, overlay.height() as f32);
        let src = [
            Point::new(0.0, 0.0),
            Point::new(ow, 0.0),
            Point::new(ow, oh),
            Point::new(0.0, oh),
        ];
        let Some(inverse) = Homography::from_points(&src, &dst).and_then(|h| h.inverse()) else {
            log::debug!("no homography onto placement {dst:?}");
            return out;
        };

        let mask = placement_mask(&dst, frame_width, frame_height);
        let (x0, y0, x1, y1) = bounding_box(&dst, frame_width, frame_height);
        let row_len = frame_width as usize * 3;

        out.par_chunks_mut(row_len)
            .enumerate()
            .skip(y0 as usize)
            .take((y1 - y0) as usize)
            .for_each(|(y, row)| {
                for x in x0..x1 {
                    let alpha = mask.get_pixel(x, y as u32)[0] as f32 / 255.0;
                    if alpha == 0.0 {
                        continue;
                    }
                    let Some((sx, sy)) = inverse.apply_f64(x as f64, y as f64) else {
                        continue;
                    };
                    let warped = sample_constant(overlay, sx as f32, sy as f32);
                    let px = &mut row[x as usize * 3..x as usize * 3 + 3];
                    for c in 0..3 {
                        let blended = warped[c] * alpha + px[c] as f32 * (1.0 - alpha);
                        px[c] = blended.round().clamp(0.0, 255.0) as u8;
                    }
                }
            });

        out
    }
}

/// Copy `frame` into a buffer of the requested size
fn fit_to_size(frame: &RgbImage, width: u32, height: u32) -> RgbImage {
    if frame.dimensions() == (width, height) {
        return frame.clone();
    }
    let mut out = RgbImage::new(width, height);
    for y in 0..height.min(frame.height()) {
        for x in 0..width.min(frame.width()) {
            out.put_pixel(x, y, *frame.get_pixel(x, y));
        }
    }
    out
}

/// Anti-aliased coverage mask of `quad`, 255 inside and 0 outside
pub fn placement_mask(quad: &Quad, width: u32, height: u32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    let poly: Vec<PolyPoint<i32>> = quad
        .iter()
        .map(|p| PolyPoint::new(p.x as i32, p.y as i32))
        .collect();
    if poly.first() == poly.last() {
        return mask;
    }
    draw_polygon_mut(&mut mask, &poly, Luma([255u8]));
    for i in 0..poly.len() {
        let a = poly[i];
        let b = poly[(i + 1) % poly.len()];
        draw_antialiased_line_segment_mut(&mut mask, (a.x, a.y), (b.x, b.y), Luma([255u8]), interpolate);
    }
    mask
}

/// Pixel bounds of `quad` plus a one pixel margin, clipped to the frame
fn bounding_box(quad: &Quad, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let min_x = quad.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let max_x = quad.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
    let min_y = quad.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    let max_y = quad.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);
    let clip = |v: f32, hi: u32| (v.max(0.0) as u32).min(hi);
    (
        clip(min_x - 1.0, width),
        clip(min_y - 1.0, height),
        clip(max_x + 2.0, width),
        clip(max_y + 2.0, height),
    )
}

/// Bilinear sample with black outside the image
fn sample_constant(img: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let (x0, y0) = (x0 as i64, y0 as i64);
    let (w, h) = (img.width() as i64, img.height() as i64);

    let mut acc = [0.0f32; 3];
    for (dx, dy, weight) in [
        (0, 0, (1.0 - fx) * (1.0 - fy)),
        (1, 0, fx * (1.0 - fy)),
        (0, 1, (1.0 - fx) * fy),
        (1, 1, fx * fy),
    ] {
        let (px, py) = (x0 + dx, y0 + dy);
        if weight == 0.0 || px < 0 || py < 0 || px >= w || py >= h {
            continue;
        }
        let p = img.get_pixel(px as u32, py as u32);
        for c in 0..3 {
            acc[c] += p[c] as f32 * weight;
        }
    }
    acc
}
