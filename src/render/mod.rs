//! Frame rendering: outlines, labels and composited previews

pub mod annotate;
pub mod composite;
pub mod preview;

pub use annotate::{FrameAnnotator, DECODE_INDICATOR_COLOR};
pub use composite::PreviewCompositor;
pub use preview::{BackgroundPreviewResolver, OverlayCache, PreviewResolver, StaticPreviewResolver};
