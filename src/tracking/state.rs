//! Memory of the most recently decoded codes
use std::time::Instant;

use image::GrayImage;

use crate::models::{DetectedCode, Point, TrackedEntry};

/// Coarse tracking phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingPhase {
    /// Nothing to follow
    Idle,
    /// Following codes from the last decode
    Tracking,
}

/// Tracked codes plus the frame they were decoded on.
///
/// Either everything is set (tracking) or everything is cleared (idle); the
/// mutators below keep the two halves in step.
#[derive(Debug, Default)]
pub struct TrackingState {
    last_seen_at: Option<Instant>,
    tracked: Vec<TrackedEntry>,
    reference: Option<GrayImage>,
}

impl TrackingState {
    /// Fresh, idle state
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether codes are being tracked
    pub fn is_active(&self) -> bool {
        self.reference.is_some() && !self.tracked.is_empty()
    }

    /// Current phase
    pub fn phase(&self) -> TrackingPhase {
        if self.is_active() {
            TrackingPhase::Tracking
        } else {
            TrackingPhase::Idle
        }
    }

    /// When the tracked codes were last decoded
    pub fn last_seen_at(&self) -> Option<Instant> {
        self.last_seen_at
    }

    /// Tracked entries in decode order
    pub fn tracked(&self) -> &[TrackedEntry] {
        &self.tracked
    }

    pub(crate) fn tracked_mut(&mut self) -> &mut [TrackedEntry] {
        &mut self.tracked
    }

    /// Grayscale frame the entries' anchors were located on
    pub fn reference_frame(&self) -> Option<&GrayImage> {
        self.reference.as_ref()
    }

    /// Replace everything with a fresh decode. An empty decode clears.
    pub fn replace(&mut self, codes: &[DetectedCode], reference: GrayImage, now: Instant) {
        if codes.is_empty() {
            self.clear();
            return;
        }
        self.tracked = codes.iter().map(TrackedEntry::from).collect();
        self.reference = Some(reference);
        self.last_seen_at = Some(now);
    }

    /// Forget all tracked codes
    pub fn clear(&mut self) {
        self.tracked.clear();
        self.reference = None;
        self.last_seen_at = None;
    }

    /// Entry whose corner bounding box contains `(x, y)`
    pub fn entry_at(&self, x: f32, y: f32) -> Option<&TrackedEntry> {
        let p = Point::new(x, y);
        self.tracked.iter().find(|e| e.contains(&p))
    }
}
