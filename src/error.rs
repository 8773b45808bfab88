//! Crate error type
//!
//! Every per-frame failure maps onto one of these variants. The orchestrator
//! matches on them to degrade a single frame instead of stopping the stream.

use thiserror::Error;

/// Errors produced by the detect/track/composite pipeline
#[derive(Debug, Error)]
pub enum ArqrError {
    /// The external decoder failed on this frame
    #[error("code detection failed: {0}")]
    Detection(String),

    /// A geometric computation hit a zero-length edge or singular system
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(&'static str),

    /// Optical flow could not follow the code onto the new frame
    #[error("tracking lost: {0}")]
    TrackingLoss(String),

    /// No overlay image is available for this payload right now
    #[error("preview unavailable for {payload:?}: {reason}")]
    PreviewUnavailable {
        /// Payload the preview was requested for
        payload: String,
        /// Why the resolver could not produce an image
        reason: String,
    },

    /// Image decoding or encoding failed
    #[error(transparent)]
    Image(#[from] image::ImageError),

    /// Filesystem access failed
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Caller-provided data was malformed
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ArqrError {
    /// Shorthand for [`ArqrError::PreviewUnavailable`]
    pub fn preview_unavailable(payload: &str, reason: impl Into<String>) -> Self {
        Self::PreviewUnavailable {
            payload: payload.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ArqrError>;
