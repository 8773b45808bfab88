//! Pyramidal Lucas-Kanade corner tracking
//!
//! Each corner is tracked independently, coarse to fine. Template intensities
//! and gradients come from the previous frame and stay fixed while the
//! displacement is refined against the current frame, so the 2x2 gradient
//! matrix is inverted once per level.
//!
//! Per-point status is reported by [`FlowTracker::track_points`], but
//! [`FlowTracker::track`] only discards a result through the aggregate gate
//! (centroid displacement and shape) unless `honor_point_status` is set.

use image::GrayImage;
use rayon::prelude::*;

use super::pyramid::{FloatImage, Pyramid};
use crate::config::{FlowConfig, GateConfig};
use crate::error::{ArqrError, Result};
use crate::models::{Point, Quad};
use crate::utils::geometry::{centroid, is_plausible_quad};

/// Outcome for one tracked point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointStatus {
    /// Converged (or ran out of iterations) inside the frame
    Tracked,
    /// Too little texture under the window at full resolution
    Lost,
    /// The estimate left the frame
    OutOfBounds,
}

/// A point's new position together with its status
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPoint {
    /// Estimated position on the current frame
    pub position: Point,
    /// How the estimate was obtained
    pub status: PointStatus,
}

/// Propagates a code's corners from one frame onto the next
pub trait CornerTracker: Sync {
    /// Track `prior` corners from `prev` onto `curr`.
    ///
    /// Returns [`ArqrError::TrackingLoss`] when the result cannot be trusted.
    fn track(&self, prev: &GrayImage, curr: &GrayImage, prior: &Quad) -> Result<Quad>;

    /// Track several quads across the same pair of frames, one result per
    /// quad in input order
    fn track_all(&self, prev: &GrayImage, curr: &GrayImage, priors: &[Quad]) -> Vec<Result<Quad>> {
        priors.par_iter().map(|prior| self.track(prev, curr, prior)).collect()
    }
}

/// Pyramidal Lucas-Kanade tracker with a displacement and shape gate
#[derive(Debug, Clone, Default)]
pub struct FlowTracker {
    flow: FlowConfig,
    gate: GateConfig,
}

enum LevelResult {
    Converged(f32, f32),
    MaxIter(f32, f32),
    Singular,
    Outside(f32, f32),
}

impl FlowTracker {
    /// Create a tracker
    pub fn new(flow: FlowConfig, gate: GateConfig) -> Self {
        Self { flow, gate }
    }

    /// Flow parameters in use
    pub fn flow_config(&self) -> &FlowConfig {
        &self.flow
    }

    /// Track raw points between two pyramids, one status per point
    pub fn track_points(&self, prev: &Pyramid, curr: &Pyramid, points: &[Point]) -> Vec<TrackedPoint> {
        let num_levels = (self.flow.max_level + 1)
            .min(prev.num_levels())
            .min(curr.num_levels());

        points
            .par_iter()
            .map(|p| self.track_single(prev, curr, p, num_levels))
            .collect()
    }

    fn track_single(&self, prev: &Pyramid, curr: &Pyramid, point: &Point, num_levels: usize) -> TrackedPoint {
        let mut gx = 0.0f32;
        let mut gy = 0.0f32;
        let mut status = PointStatus::Tracked;
        // Level whose scale the final (gx, gy) is expressed in.
        let mut final_level = 0;

        for level in (0..num_levels).rev() {
            let scale = 1.0 / (1u32 << level) as f32;
            let px = point.x * scale;
            let py = point.y * scale;

            match self.refine_level(prev.level(level), curr.level(level), px, py, gx, gy) {
                LevelResult::Converged(dx, dy) | LevelResult::MaxIter(dx, dy) => {
                    gx = dx;
                    gy = dy;
                }
                // A flat patch at a coarse level keeps the current guess; only
                // full resolution decides the status.
                LevelResult::Singular => {
                    if level == 0 {
                        status = PointStatus::Lost;
                    }
                }
                LevelResult::Outside(dx, dy) => {
                    gx = dx;
                    gy = dy;
                    status = PointStatus::OutOfBounds;
                    final_level = level;
                    break;
                }
            }

            if level > 0 {
                gx *= 2.0;
                gy *= 2.0;
            }
        }

        let up = (1u32 << final_level) as f32;
        let position = Point::new(point.x + gx * up, point.y + gy * up);

        let w = prev.level(0).width() as f32;
        let h = prev.level(0).height() as f32;
        if status == PointStatus::Tracked
            && !((0.0..w).contains(&position.x) && (0.0..h).contains(&position.y))
        {
            status = PointStatus::OutOfBounds;
        }
        TrackedPoint { position, status }
    }

    /// Iterative Lucas-Kanade at one pyramid level, starting from guess (dx, dy)
    fn refine_level(
        &self,
        prev_img: &FloatImage,
        curr_img: &FloatImage,
        x: f32,
        y: f32,
        mut dx: f32,
        mut dy: f32,
    ) -> LevelResult {
        let half = (self.flow.window_size / 2) as isize;
        let side = (2 * half + 1) as usize;
        let area = (side * side) as f32;

        // Template intensity and gradient, fixed across iterations.
        let mut template = Vec::with_capacity(side * side);
        let mut h00 = 0.0f32;
        let mut h01 = 0.0f32;
        let mut h11 = 0.0f32;
        for oy in -half..=half {
            for ox in -half..=half {
                let tx = x + ox as f32;
                let ty = y + oy as f32;
                let ix = 0.5 * (prev_img.sample(tx + 1.0, ty) - prev_img.sample(tx - 1.0, ty));
                let iy = 0.5 * (prev_img.sample(tx, ty + 1.0) - prev_img.sample(tx, ty - 1.0));
                template.push((prev_img.sample(tx, ty), ix, iy));
                h00 += ix * ix;
                h01 += ix * iy;
                h11 += iy * iy;
            }
        }

        let det = h00 * h11 - h01 * h01;
        let min_eig = (h00 + h11 - ((h00 - h11) * (h00 - h11) + 4.0 * h01 * h01).sqrt()) / (2.0 * area);
        if min_eig < self.flow.min_eigen_threshold || det.abs() < f32::EPSILON {
            return LevelResult::Singular;
        }
        let inv_det = 1.0 / det;

        let width = curr_img.width() as f32;
        let height = curr_img.height() as f32;
        let eps_sq = self.flow.epsilon * self.flow.epsilon;

        for _ in 0..self.flow.max_iterations {
            let cx = x + dx;
            let cy = y + dy;
            if !(0.0..width).contains(&cx) || !(0.0..height).contains(&cy) {
                return LevelResult::Outside(dx, dy);
            }

            let mut b0 = 0.0f32;
            let mut b1 = 0.0f32;
            let mut idx = 0;
            for oy in -half..=half {
                for ox in -half..=half {
                    let (t, ix, iy) = template[idx];
                    let e = t - curr_img.sample(cx + ox as f32, cy + oy as f32);
                    b0 += ix * e;
                    b1 += iy * e;
                    idx += 1;
                }
            }

            let delta_x = inv_det * (h11 * b0 - h01 * b1);
            let delta_y = inv_det * (h00 * b1 - h01 * b0);
            dx += delta_x;
            dy += delta_y;

            if delta_x * delta_x + delta_y * delta_y < eps_sq {
                return LevelResult::Converged(dx, dy);
            }
        }

        LevelResult::MaxIter(dx, dy)
    }

    fn pyramids(&self, prev: &GrayImage, curr: &GrayImage) -> Result<(Pyramid, Pyramid)> {
        if prev.dimensions() != curr.dimensions() {
            return Err(size_changed(prev, curr));
        }
        let max_level = self.flow.max_level;
        Ok(rayon::join(
            || Pyramid::build(prev, max_level),
            || Pyramid::build(curr, max_level),
        ))
    }

    fn track_quad(&self, prev: &Pyramid, curr: &Pyramid, prior: &Quad) -> Result<Quad> {
        let tracked = self.track_points(prev, curr, prior);

        for (i, t) in tracked.iter().enumerate() {
            log::trace!("corner {i}: {:?} -> {:?} ({:?})", prior[i], t.position, t.status);
        }
        if self.flow.honor_point_status {
            if let Some(t) = tracked.iter().find(|t| t.status != PointStatus::Tracked) {
                return Err(ArqrError::TrackingLoss(format!("corner status {:?}", t.status)));
            }
        }

        let mut quad = *prior;
        for (slot, t) in quad.iter_mut().zip(tracked.iter()) {
            *slot = t.position;
        }
        accept_tracked_quad(prior, &quad, &self.gate)
    }
}

fn size_changed(prev: &GrayImage, curr: &GrayImage) -> ArqrError {
    ArqrError::TrackingLoss(format!(
        "frame size changed from {:?} to {:?}",
        prev.dimensions(),
        curr.dimensions()
    ))
}

impl CornerTracker for FlowTracker {
    fn track(&self, prev: &GrayImage, curr: &GrayImage, prior: &Quad) -> Result<Quad> {
        let (prev_pyr, curr_pyr) = self.pyramids(prev, curr)?;
        self.track_quad(&prev_pyr, &curr_pyr, prior)
    }

    /// Builds both pyramids once and shares them across every quad
    fn track_all(&self, prev: &GrayImage, curr: &GrayImage, priors: &[Quad]) -> Vec<Result<Quad>> {
        match self.pyramids(prev, curr) {
            Ok((prev_pyr, curr_pyr)) => priors
                .par_iter()
                .map(|prior| self.track_quad(&prev_pyr, &curr_pyr, prior))
                .collect(),
            Err(_) => priors.iter().map(|_| Err(size_changed(prev, curr))).collect(),
        }
    }
}

/// Accept a tracked quad only if it moved less than the gate allows and
/// still looks like a rectangle or parallelogram
pub fn accept_tracked_quad(prior: &Quad, tracked: &Quad, gate: &GateConfig) -> Result<Quad> {
    if tracked.iter().any(|p| !p.is_finite()) {
        return Err(ArqrError::TrackingLoss("non-finite corner".into()));
    }

    let displacement = centroid(prior).distance(&centroid(tracked));
    if displacement >= gate.max_displacement {
        return Err(ArqrError::TrackingLoss(format!(
            "centroid moved {displacement:.1}px"
        )));
    }
    if !is_plausible_quad(tracked, &gate.shape) {
        return Err(ArqrError::TrackingLoss("implausible shape".into()));
    }
    Ok(*tracked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn textured(width: u32, height: u32, shift_x: i32, shift_y: i32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let xf = (x as i32 - shift_x) as f32;
            let yf = (y as i32 - shift_y) as f32;
            let v = 128.0 + 60.0 * (xf * 0.15).sin() + 60.0 * (yf * 0.11).cos() + 5.0 * (xf * yf * 0.001).sin();
            Luma([v.clamp(0.0, 255.0) as u8])
        })
    }

    fn square(offset: f32) -> Quad {
        [
            Point::new(80.0 + offset, 80.0),
            Point::new(180.0 + offset, 80.0),
            Point::new(180.0 + offset, 180.0),
            Point::new(80.0 + offset, 180.0),
        ]
    }

    fn small_window_tracker() -> FlowTracker {
        let flow = FlowConfig {
            window_size: 21,
            max_level: 2,
            ..FlowConfig::default()
        };
        FlowTracker::new(flow, GateConfig::default())
    }

    #[test]
    fn test_identical_frames_keep_corners() {
        let frame = textured(256, 256, 0, 0);
        let tracker = FlowTracker::default();
        let out = tracker.track(&frame, &frame, &square(0.0)).unwrap();
        for (a, b) in out.iter().zip(square(0.0).iter()) {
            assert!(a.distance(b) < 0.05, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn test_follows_translation() {
        let prev = textured(256, 256, 0, 0);
        let curr = textured(256, 256, 4, 0);
        let tracker = small_window_tracker();
        let out = tracker.track(&prev, &curr, &square(0.0)).unwrap();
        for (a, b) in out.iter().zip(square(4.0).iter()) {
            assert!(a.distance(b) < 1.0, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn test_flat_frame_reports_lost_status() {
        let flat = GrayImage::from_pixel(128, 128, Luma([90]));
        let pyr = Pyramid::build(&flat, 2);
        let tracked = small_window_tracker().track_points(&pyr, &pyr, &[Point::new(64.0, 64.0)]);
        assert_eq!(tracked[0].status, PointStatus::Lost);
        assert_eq!(tracked[0].position, Point::new(64.0, 64.0));
    }

    #[test]
    fn test_point_status_ignored_by_default() {
        let flat = GrayImage::from_pixel(256, 256, Luma([90]));
        // Every corner is Lost, positions unchanged: the gate alone accepts.
        assert!(FlowTracker::default().track(&flat, &flat, &square(0.0)).is_ok());

        let strict = FlowTracker::new(
            FlowConfig {
                honor_point_status: true,
                ..FlowConfig::default()
            },
            GateConfig::default(),
        );
        assert!(matches!(
            strict.track(&flat, &flat, &square(0.0)),
            Err(ArqrError::TrackingLoss(_))
        ));
    }

    #[test]
    fn test_gate_rejects_151_pixel_jump() {
        let prior = square(0.0);
        let moved = square(151.0);
        assert!(is_plausible_quad(&moved, &GateConfig::default().shape));
        assert!(matches!(
            accept_tracked_quad(&prior, &moved, &GateConfig::default()),
            Err(ArqrError::TrackingLoss(_))
        ));
        assert!(accept_tracked_quad(&prior, &square(149.0), &GateConfig::default()).is_ok());
    }

    #[test]
    fn test_gate_rejects_implausible_shape() {
        let prior = square(0.0);
        let mut skewed = prior;
        skewed[2] = Point::new(100.0, 100.0);
        assert!(accept_tracked_quad(&prior, &skewed, &GateConfig::default()).is_err());
    }

    #[test]
    fn test_gate_rejects_nan() {
        let prior = square(0.0);
        let mut broken = prior;
        broken[1] = Point::new(f32::NAN, 3.0);
        assert!(accept_tracked_quad(&prior, &broken, &GateConfig::default()).is_err());
    }

    #[test]
    fn test_track_all_matches_single_tracks() {
        let prev = textured(320, 256, 0, 0);
        let curr = textured(320, 256, 3, 0);
        let tracker = small_window_tracker();
        let second = square(0.0).map(|p| p + Point::new(100.0, -40.0));
        let priors = [square(0.0), second];

        let batch = tracker.track_all(&prev, &curr, &priors);
        assert_eq!(batch.len(), 2);
        for (prior, result) in priors.iter().zip(batch) {
            let single = tracker.track(&prev, &curr, prior).unwrap();
            assert_eq!(result.unwrap(), single);
        }

        let small = textured(64, 64, 0, 0);
        let lost = tracker.track_all(&prev, &small, &priors);
        assert!(lost.iter().all(|r| matches!(r, Err(ArqrError::TrackingLoss(_)))));
    }

    #[test]
    fn test_size_mismatch_is_tracking_loss() {
        let a = GrayImage::new(64, 64);
        let b = GrayImage::new(32, 32);
        assert!(FlowTracker::default().track(&a, &b, &square(0.0)).is_err());
    }
}
