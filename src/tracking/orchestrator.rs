//! Per-frame detect/track/render loop
//!
//! A frame with at least one decoded code replaces everything that is being
//! tracked. A frame without decodes falls back to optical flow from the last
//! decoded frame. An entry whose flow fails is skipped for the frame, unless
//! the last decode is older than the loss timeout, in which case tracking
//! stops for every entry.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;

use super::clock::{Clock, SystemClock};
use super::flow::{CornerTracker, FlowTracker};
use super::state::{TrackingPhase, TrackingState};
use crate::config::ArqrConfig;
use crate::detector::{CodeDecoder, CodeDetector};
use crate::error::{ArqrError, Result};
use crate::models::{DetectedCode, Quad};
use crate::render::{FrameAnnotator, OverlayCache, PreviewCompositor, PreviewResolver};
use crate::utils::grayscale::frame_to_gray;

/// Rendered frame plus what was found on it
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    /// Annotated (and possibly composited) frame
    pub frame: RgbImage,
    /// Whether at least one code was drawn on this frame
    pub any_detected: bool,
    /// Payload of the first code drawn on this frame
    pub primary_payload: Option<String>,
    /// Whether positions came from optical flow rather than a decode
    pub via_flow: bool,
}

impl FrameOutcome {
    fn passthrough(frame: &RgbImage) -> Self {
        Self {
            frame: frame.clone(),
            any_detected: false,
            primary_payload: None,
            via_flow: false,
        }
    }
}

/// Owns the tracking state and turns raw frames into annotated ones
pub struct TrackingOrchestrator<D, T = FlowTracker, C = SystemClock> {
    detector: CodeDetector<D>,
    tracker: T,
    clock: C,
    state: TrackingState,
    loss_timeout: Duration,
    annotator: FrameAnnotator,
    compositor: PreviewCompositor,
    resolver: Option<Box<dyn PreviewResolver>>,
    overlays: OverlayCache,
}

impl<D: CodeDecoder> TrackingOrchestrator<D> {
    /// Orchestrator with the Lucas-Kanade tracker and the wall clock
    pub fn new(decoder: D, config: &ArqrConfig) -> Result<Self> {
        let tracker = FlowTracker::new(config.flow.clone(), config.gate);
        Self::with_parts(decoder, tracker, SystemClock, config)
    }
}

impl<D: CodeDecoder, T: CornerTracker, C: Clock> TrackingOrchestrator<D, T, C> {
    /// Orchestrator with an explicit tracker and clock
    pub fn with_parts(decoder: D, tracker: T, clock: C, config: &ArqrConfig) -> Result<Self> {
        Ok(Self {
            detector: CodeDetector::new(decoder),
            tracker,
            clock,
            state: TrackingState::new(),
            loss_timeout: config.tracking.loss_timeout,
            annotator: FrameAnnotator::new(config.annotation.clone())?,
            compositor: PreviewCompositor::new(config.compositor),
            resolver: None,
            overlays: OverlayCache::new(),
        })
    }

    /// Use `resolver` to find preview images
    pub fn with_preview_resolver(mut self, resolver: impl PreviewResolver + 'static) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Process one frame.
    ///
    /// Payloads in `previews_enabled` get their preview composited below the
    /// outline instead of a label. Never fails: decoder errors count as a frame
    /// without codes and a missing preview falls back to plain annotation.
    pub fn process_frame(&mut self, frame: &RgbImage, previews_enabled: &HashSet<String>) -> FrameOutcome {
        let codes = match self.detector.detect(frame) {
            Ok(codes) => codes,
            Err(e) => {
                log::warn!("{e}");
                Vec::new()
            }
        };
        let now = self.clock.now();

        if !codes.is_empty() {
            self.on_decode(frame, codes, now, previews_enabled)
        } else if self.state.is_active() {
            self.on_miss(frame, now, previews_enabled)
        } else {
            FrameOutcome::passthrough(frame)
        }
    }

    fn on_decode(
        &mut self,
        frame: &RgbImage,
        codes: Vec<DetectedCode>,
        now: Instant,
        previews_enabled: &HashSet<String>,
    ) -> FrameOutcome {
        if !self.state.is_active() {
            log::debug!("tracking {} code(s)", codes.len());
        }
        self.state.replace(&codes, frame_to_gray(frame), now);

        let mut out = frame.clone();
        for code in &codes {
            self.render_entry(&mut out, &code.corners, &code.label(), &code.payload, previews_enabled);
        }
        self.annotator.draw_decode_indicator(&mut out);
        FrameOutcome {
            frame: out,
            any_detected: true,
            primary_payload: codes.first().map(|c| c.payload.clone()),
            via_flow: false,
        }
    }

    fn on_miss(&mut self, frame: &RgbImage, now: Instant, previews_enabled: &HashSet<String>) -> FrameOutcome {
        let curr = frame_to_gray(frame);
        let Some(reference) = self.state.reference_frame() else {
            return FrameOutcome::passthrough(frame);
        };
        let anchors: Vec<Quad> = self.state.tracked().iter().map(|entry| entry.anchor).collect();
        let results = self.tracker.track_all(reference, &curr, &anchors);

        if results.iter().any(|r| r.is_err()) {
            let elapsed = self
                .state
                .last_seen_at()
                .map(|seen| now.saturating_duration_since(seen))
                .unwrap_or_default();
            if elapsed > self.loss_timeout {
                log::debug!("flow lost a code {elapsed:?} after the last decode, tracking stopped");
                self.state.clear();
                return FrameOutcome::passthrough(frame);
            }
        }
        if results.iter().all(|r| r.is_err()) {
            log::debug!("flow failed for every entry this frame");
            return FrameOutcome::passthrough(frame);
        }

        let mut out = frame.clone();
        let mut primary_payload = None;
        for (i, result) in results.into_iter().enumerate() {
            let entry = &mut self.state.tracked_mut()[i];
            match result {
                Ok(corners) => {
                    entry.corners = corners;
                    let label = entry.label.clone();
                    let payload = entry.payload.clone();
                    self.render_entry(&mut out, &corners, &label, &payload, previews_enabled);
                    if primary_payload.is_none() {
                        primary_payload = Some(payload);
                    }
                }
                Err(e) => log::debug!("skipping {:?} this frame: {e}", entry.payload),
            }
        }
        self.annotator.draw_flow_indicator(&mut out);

        FrameOutcome {
            frame: out,
            any_detected: true,
            primary_payload,
            via_flow: true,
        }
    }

    fn render_entry(
        &mut self,
        out: &mut RgbImage,
        corners: &Quad,
        label: &str,
        payload: &str,
        previews_enabled: &HashSet<String>,
    ) {
        if previews_enabled.contains(payload) {
            match self.overlay_for(payload) {
                Ok(overlay) => {
                    let (w, h) = out.dimensions();
                    *out = self.compositor.composite(out, corners, &overlay, w, h);
                    self.annotator.draw_code(out, corners, None);
                    return;
                }
                Err(e) => log::warn!("{e}"),
            }
        }
        self.annotator.draw_code(out, corners, Some(label));
    }

    fn overlay_for(&mut self, payload: &str) -> Result<Arc<RgbImage>> {
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| ArqrError::preview_unavailable(payload, "no preview resolver configured"))?;
        let path = resolver.resolve(payload)?;
        self.overlays
            .load(&path)
            .map_err(|e| ArqrError::preview_unavailable(payload, e.to_string()))
    }

    /// Current tracking state
    pub fn state(&self) -> &TrackingState {
        &self.state
    }

    /// Current phase
    pub fn phase(&self) -> TrackingPhase {
        self.state.phase()
    }

    /// Code detector
    pub fn detector(&self) -> &CodeDetector<D> {
        &self.detector
    }

    /// Mutable access to the code detector
    pub fn detector_mut(&mut self) -> &mut CodeDetector<D> {
        &mut self.detector
    }

    /// Corner tracker
    pub fn tracker(&self) -> &T {
        &self.tracker
    }
}
