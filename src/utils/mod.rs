//! Utility functions for image processing
//!
//! - Grayscale conversion (RGB to luminance)
//! - Geometry (homographies, interior angles, quad plausibility)

pub mod geometry;
pub mod grayscale;
