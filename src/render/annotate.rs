use std::fs;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, draw_text_mut};
use rusttype::{Font, Scale};

use crate::config::AnnotationConfig;
use crate::error::{ArqrError, Result};
use crate::models::Quad;

/// DejaVu Sans, see `assets/fonts/LICENSE-DejaVu.txt`
static BUNDLED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

/// Marker color for frames where the decoder found a code
pub const DECODE_INDICATOR_COLOR: Rgb<u8> = Rgb([47, 141, 255]);

/// Draws code outlines, labels and center markers onto frames
pub struct FrameAnnotator {
    config: AnnotationConfig,
    font: Option<Font<'static>>,
}

impl std::fmt::Debug for FrameAnnotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameAnnotator")
            .field("config", &self.config)
            .field("font", &self.font.is_some())
            .finish()
    }
}

impl FrameAnnotator {
    /// Create an annotator. Labels use `font_path` when set and the bundled
    /// font otherwise.
    pub fn new(config: AnnotationConfig) -> Result<Self> {
        let font = match &config.font_path {
            Some(path) => {
                let bytes = fs::read(path)?;
                Font::try_from_vec(bytes).ok_or_else(|| {
                    ArqrError::InvalidInput(format!("{} is not a usable font", path.display()))
                })?
            }
            None => Font::try_from_bytes(BUNDLED_FONT)
                .ok_or_else(|| ArqrError::InvalidInput("bundled label font failed to parse".into()))?,
        };
        Ok(Self {
            config,
            font: Some(font),
        })
    }

    /// Annotator that draws outlines and markers but no text
    pub fn without_labels(config: AnnotationConfig) -> Self {
        Self { config, font: None }
    }

    /// Whether labels will be rendered
    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Outline `corners`, mark their center and optionally write `label`
    /// just above the outline
    pub fn draw_code(&self, frame: &mut RgbImage, corners: &Quad, label: Option<&str>) {
        let color = self.config.color;
        let thickness = self.config.thickness.max(1) as i32;
        // Whole-pixel offsets centered on the edge: 2 -> {-1, 0}, 3 -> {-1, 0, 1}.
        let offsets = -(thickness / 2)..thickness - thickness / 2;

        for i in 0..corners.len() {
            let a = corners[i];
            let b = corners[(i + 1) % corners.len()];
            for oy in offsets.clone() {
                for ox in offsets.clone() {
                    let (ox, oy) = (ox as f32, oy as f32);
                    draw_line_segment_mut(frame, (a.x + ox, a.y + oy), (b.x + ox, b.y + oy), color);
                }
            }
        }

        if let (Some(text), Some(font)) = (label, &self.font) {
            if !text.is_empty() {
                let (x, y) = label_anchor(corners);
                let scale = Scale::uniform(self.config.label_height);
                // Anchor is the text baseline; rusttype draws from the top.
                let top = y - self.config.label_height as i32;
                draw_text_mut(frame, color, x, top, scale, font, text);
            }
        }

        draw_filled_circle_mut(frame, quad_center(corners), self.config.marker_radius, color);
    }

    /// Dot in the top-left corner marking a frame rendered from optical flow
    pub fn draw_flow_indicator(&self, frame: &mut RgbImage) {
        if self.config.indicators {
            draw_filled_circle_mut(frame, (10, 10), 5, self.config.color);
        }
    }

    /// Dot in the top-left corner marking a frame where a code was decoded
    pub fn draw_decode_indicator(&self, frame: &mut RgbImage) {
        if self.config.indicators {
            draw_filled_circle_mut(frame, (10, 10), 5, DECODE_INDICATOR_COLOR);
        }
    }
}

/// Integer center of the corners: the coordinate sums are truncated, then
/// floor-divided by four
pub fn quad_center(corners: &Quad) -> (i32, i32) {
    let sx: f32 = corners.iter().map(|p| p.x).sum();
    let sy: f32 = corners.iter().map(|p| p.y).sum();
    ((sx as i32).div_euclid(4), (sy as i32).div_euclid(4))
}

/// Text baseline position: left edge of the outline, 10 px above its top
pub fn label_anchor(corners: &Quad) -> (i32, i32) {
    let x = corners.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let y = corners.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    (x as i32, y as i32 - 10)
}
