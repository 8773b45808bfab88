//! rust_arqr - keep decoded codes pinned to a live video feed
//!
//! Frames go in, annotated frames come out. Each frame is handed to a
//! pluggable decoder; while the decoder finds codes their outlines are drawn
//! directly, and when it momentarily misses them the last known corners are
//! carried forward with pyramidal Lucas-Kanade optical flow. Codes the user
//! has opted into get a preview image warped into the frame below them.
//!
//! ```no_run
//! use std::collections::HashSet;
//! use rust_arqr::{ArqrConfig, ScriptedDecoder, TrackingOrchestrator};
//!
//! let mut orchestrator =
//!     TrackingOrchestrator::new(ScriptedDecoder::new(), &ArqrConfig::default()).unwrap();
//! let frame = image::RgbImage::new(640, 480);
//! let outcome = orchestrator.process_frame(&frame, &HashSet::new());
//! assert!(!outcome.any_detected);
//! ```

#![warn(missing_docs)]
#![allow(clippy::missing_docs_in_private_items)]

/// Tunables and `ARQR_*` environment overrides
pub mod config;
/// Decoder backends and detection normalization
pub mod detector;
/// Crate error type
pub mod error;
/// Core data structures (Point, DetectedCode, TrackedEntry)
pub mod models;
/// Annotation, compositing and preview resolution
pub mod render;
/// Frame loop and result publishing
pub mod session;
/// Image loading and frame sequence helpers
pub mod tools;
/// Optical flow and the tracking state machine
pub mod tracking;
/// Utility functions (grayscale, geometry)
pub mod utils;

pub use config::ArqrConfig;
pub use detector::{CodeDecoder, CodeDetector, RawDetection, ScriptedDecoder};
pub use error::{ArqrError, Result};
pub use models::{DetectedCode, Point, Quad, TrackedEntry};
pub use render::{BackgroundPreviewResolver, PreviewCompositor, PreviewResolver, StaticPreviewResolver};
pub use session::{payload_link, FrameSource, LastResult, Session, SessionHandle};
pub use tracking::{FlowTracker, FrameOutcome, TrackingOrchestrator, TrackingPhase};
pub use utils::geometry::is_plausible_quad;
