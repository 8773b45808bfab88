//! Pipeline configuration
//!
//! Defaults reproduce the tuned constants of the tracker. `ArqrConfig::from_env`
//! layers `ARQR_*` environment overrides on top of them.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use image::Rgb;

/// Pyramidal Lucas-Kanade parameters
#[derive(Debug, Clone, PartialEq)]
pub struct FlowConfig {
    /// Integration window side length in pixels (odd)
    pub window_size: usize,
    /// Highest pyramid level; level 0 is full resolution
    pub max_level: usize,
    /// Iteration cap per pyramid level
    pub max_iterations: usize,
    /// Stop iterating once the update is shorter than this (pixels)
    pub epsilon: f32,
    /// Minimum eigenvalue of the normalized gradient matrix before a point is
    /// considered untrackable
    pub min_eigen_threshold: f32,
    /// Treat any point whose per-point status is not `Tracked` as a loss of
    /// the whole quad. Off by default: only the aggregate gate decides.
    pub honor_point_status: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            window_size: 85,
            max_level: 4,
            max_iterations: 100,
            epsilon: 0.03,
            min_eigen_threshold: 1e-5,
            honor_point_status: false,
        }
    }
}

/// Angle tolerances for the rectangle/parallelogram test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeConfig {
    /// Allowed deviation of the angle sum from 2*pi (radians)
    pub angle_sum_tolerance: f32,
    /// Allowed difference between opposite angles (radians)
    pub opposite_angle_tolerance: f32,
}

impl Default for ShapeConfig {
    fn default() -> Self {
        Self {
            angle_sum_tolerance: 0.1,
            opposite_angle_tolerance: 0.3,
        }
    }
}

/// Acceptance gate applied to a flow result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateConfig {
    /// Centroid displacement (pixels) at or above which a result is rejected
    pub max_displacement: f32,
    /// Shape tolerances the tracked quad must satisfy
    pub shape: ShapeConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_displacement: 150.0,
            shape: ShapeConfig::default(),
        }
    }
}

/// State machine timing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingConfig {
    /// How long after the last decode a failed flow result expires tracking
    pub loss_timeout: Duration,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            loss_timeout: Duration::from_secs(1),
        }
    }
}

/// Drawing style for outlines and labels
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationConfig {
    /// Outline, label and marker color
    pub color: Rgb<u8>,
    /// Outline width in pixels
    pub thickness: u32,
    /// Radius of the center marker
    pub marker_radius: i32,
    /// Label glyph height in pixels
    pub label_height: f32,
    /// TrueType font overriding the bundled label font
    pub font_path: Option<PathBuf>,
    /// Dot in the top-left corner of annotated frames: blue after a decode,
    /// the outline color when positions came from optical flow
    pub indicators: bool,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            color: Rgb([4, 202, 77]),
            thickness: 2,
            marker_radius: 2,
            label_height: 16.0,
            font_path: None,
            indicators: false,
        }
    }
}

/// Placement of the preview overlay relative to the code
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositorConfig {
    /// Half-width of the overlay as a multiple of the code's bottom edge
    pub width_scale: f32,
    /// Gap between code and overlay as a fraction of the code's height
    pub gap_ratio: f32,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            width_scale: 2.0,
            gap_ratio: 0.1,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArqrConfig {
    /// Optical flow
    pub flow: FlowConfig,
    /// Flow acceptance gate
    pub gate: GateConfig,
    /// State machine timing
    pub tracking: TrackingConfig,
    /// Drawing style
    pub annotation: AnnotationConfig,
    /// Overlay placement
    pub compositor: CompositorConfig,
}

impl ArqrConfig {
    /// Defaults with `ARQR_*` environment overrides applied.
    ///
    /// Recognized variables: `ARQR_FLOW_WINDOW`, `ARQR_FLOW_MAX_LEVEL`,
    /// `ARQR_FLOW_ITERATIONS`, `ARQR_FLOW_EPSILON`, `ARQR_HONOR_POINT_STATUS`,
    /// `ARQR_MAX_DISPLACEMENT`, `ARQR_LOSS_TIMEOUT_MS`, `ARQR_FONT`,
    /// `ARQR_INDICATORS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = parse_env::<usize>("ARQR_FLOW_WINDOW") {
            // Windows need a center pixel.
            config.flow.window_size = v | 1;
        }
        if let Some(v) = parse_env("ARQR_FLOW_MAX_LEVEL") {
            config.flow.max_level = v;
        }
        if let Some(v) = parse_env("ARQR_FLOW_ITERATIONS") {
            config.flow.max_iterations = v;
        }
        if let Some(v) = parse_env("ARQR_FLOW_EPSILON") {
            config.flow.epsilon = v;
        }
        if let Some(v) = flag_from_env("ARQR_HONOR_POINT_STATUS") {
            config.flow.honor_point_status = v;
        }
        if let Some(v) = parse_env("ARQR_MAX_DISPLACEMENT") {
            config.gate.max_displacement = v;
        }
        if let Some(ms) = parse_env::<u64>("ARQR_LOSS_TIMEOUT_MS") {
            config.tracking.loss_timeout = Duration::from_millis(ms);
        }
        if let Ok(path) = env::var("ARQR_FONT") {
            if !path.trim().is_empty() {
                config.annotation.font_path = Some(PathBuf::from(path.trim()));
            }
        }
        if let Some(v) = flag_from_env("ARQR_INDICATORS") {
            config.annotation.indicators = v;
        }
        config
    }
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    let value = env::var(key).ok()?;
    match value.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring malformed {key}={value:?}");
            None
        }
    }
}

fn flag_from_env(key: &str) -> Option<bool> {
    let value = env::var(key).ok()?;
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        other => {
            log::warn!("ignoring malformed {key}={other:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tuned_constants() {
        let config = ArqrConfig::default();
        assert_eq!(config.flow.window_size, 85);
        assert_eq!(config.flow.max_level, 4);
        assert_eq!(config.flow.max_iterations, 100);
        assert!((config.flow.epsilon - 0.03).abs() < 1e-6);
        assert!(!config.flow.honor_point_status);
        assert_eq!(config.gate.max_displacement, 150.0);
        assert_eq!(config.gate.shape.angle_sum_tolerance, 0.1);
        assert_eq!(config.gate.shape.opposite_angle_tolerance, 0.3);
        assert_eq!(config.tracking.loss_timeout, Duration::from_secs(1));
        assert_eq!(config.compositor.width_scale, 2.0);
    }

    #[test]
    fn test_from_env_without_overrides_is_default() {
        // None of the ARQR_* variables are set in the test environment.
        if env::vars().any(|(k, _)| k.starts_with("ARQR_")) {
            return;
        }
        assert_eq!(ArqrConfig::from_env(), ArqrConfig::default());
    }
}
