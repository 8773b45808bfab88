use super::Point;

/// Four corner points bounding a code, in decoder-defined order
pub type Quad = [Point; 4];

/// A code decoded on the current frame
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedCode {
    /// Decoded content
    pub payload: String,
    /// Symbology reported by the decoder (e.g. "QRCODE", "EAN13")
    pub type_label: String,
    /// Corner points in image coordinates
    pub corners: Quad,
}

impl DetectedCode {
    /// Create a detection from its parts
    pub fn new(payload: impl Into<String>, type_label: impl Into<String>, corners: Quad) -> Self {
        Self {
            payload: payload.into(),
            type_label: type_label.into(),
            corners,
        }
    }

    /// Display label, `"{type}: {payload}"`
    pub fn label(&self) -> String {
        format!("{}: {}", self.type_label, self.payload)
    }
}

/// A code the orchestrator keeps following between decodes.
///
/// `anchor` holds the corners as they were located on the reference frame and
/// is what optical flow propagates; `corners` is the most recent position and
/// is what gets drawn.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntry {
    /// Latest known corners
    pub corners: Quad,
    /// Corners on the reference frame
    pub anchor: Quad,
    /// Display label
    pub label: String,
    /// Decoded content
    pub payload: String,
}

impl From<&DetectedCode> for TrackedEntry {
    fn from(code: &DetectedCode) -> Self {
        Self {
            corners: code.corners,
            anchor: code.corners,
            label: code.label(),
            payload: code.payload.clone(),
        }
    }
}

impl TrackedEntry {
    /// Whether `p` lies within the axis-aligned bounding box of the corners
    pub fn contains(&self, p: &Point) -> bool {
        let (min_x, max_x) = self
            .corners
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), c| {
                (lo.min(c.x), hi.max(c.x))
            });
        let (min_y, max_y) = self
            .corners
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), c| {
                (lo.min(c.y), hi.max(c.y))
            });
        (min_x..=max_x).contains(&p.x) && (min_y..=max_y).contains(&p.y)
    }
}
