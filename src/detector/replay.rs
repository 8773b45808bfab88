use std::collections::HashMap;
use std::fs;
use std::path::Path;

use image::RgbImage;

use super::{CodeDecoder, RawDetection};
use crate::error::{ArqrError, Result};
use crate::models::Point;

/// Decoder that replays detections keyed by frame index.
///
/// Each `decode` call advances the frame counter by one. Frames without an
/// entry decode to nothing; frames listed in `failing` return an error.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDecoder {
    frames: HashMap<usize, Vec<RawDetection>>,
    failing: HashMap<usize, String>,
    next_frame: usize,
}

impl ScriptedDecoder {
    /// Empty script: every frame decodes to nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a detection on `frame`
    pub fn with_detection(mut self, frame: usize, detection: RawDetection) -> Self {
        self.frames.entry(frame).or_default().push(detection);
        self
    }

    /// Make `frame` fail with `message`
    pub fn with_failure(mut self, frame: usize, message: impl Into<String>) -> Self {
        self.failing.insert(frame, message.into());
        self
    }

    /// Index of the next frame to be decoded
    pub fn next_frame(&self) -> usize {
        self.next_frame
    }

    /// Parse a detections manifest.
    ///
    /// One detection per line:
    /// `<frame> <type> <x0> <y0> <x1> <y1> <x2> <y2> <x3> <y3> <payload>`,
    /// where the payload is the rest of the line. `<frame> ERROR <message>`
    /// scripts a decoder failure. Blank lines and `#` comments are skipped.
    pub fn parse_manifest(content: &str) -> Result<Self> {
        let mut decoder = Self::new();
        for (lineno, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let bad = |what: &str| ArqrError::InvalidInput(format!("manifest line {}: {what}", lineno + 1));

            let mut tokens = trimmed.splitn(2, char::is_whitespace);
            let frame = tokens
                .next()
                .and_then(|t| t.parse::<usize>().ok())
                .ok_or_else(|| bad("missing frame index"))?;
            let rest = tokens.next().unwrap_or("").trim_start();

            let mut tokens = rest.splitn(2, char::is_whitespace);
            let kind = tokens.next().filter(|t| !t.is_empty()).ok_or_else(|| bad("missing type"))?;
            let mut rest = tokens.next().unwrap_or("").trim_start();

            if kind == "ERROR" {
                decoder = decoder.with_failure(frame, rest);
                continue;
            }

            let mut coords = [0.0f32; 8];
            for slot in coords.iter_mut() {
                let mut tokens = rest.splitn(2, char::is_whitespace);
                *slot = tokens
                    .next()
                    .and_then(|t| t.parse::<f32>().ok())
                    .ok_or_else(|| bad("expected 8 corner coordinates"))?;
                rest = tokens.next().unwrap_or("").trim_start();
            }
            if rest.is_empty() {
                return Err(bad("missing payload"));
            }

            let polygon = coords.chunks_exact(2).map(|c| Point::new(c[0], c[1])).collect();
            decoder = decoder.with_detection(frame, RawDetection::new(rest.as_bytes(), kind, polygon));
        }
        Ok(decoder)
    }

    /// Load a detections manifest from disk
    pub fn from_manifest<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::parse_manifest(&fs::read_to_string(path)?)
    }
}

impl CodeDecoder for ScriptedDecoder {
    type Error = String;

    fn decode(&mut self, _frame: &RgbImage) -> std::result::Result<Vec<RawDetection>, String> {
        let frame = self.next_frame;
        self.next_frame += 1;
        if let Some(message) = self.failing.get(&frame) {
            return Err(message.clone());
        }
        Ok(self.frames.get(&frame).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let decoder = ScriptedDecoder::parse_manifest(
            "# frame type corners payload\n\
             0 QRCODE 10 10 110 10 110 110 10 110 https://example.com\n\
             \n\
             2 EAN13 1 2 3 4 5 6 7 8 hello world\n\
             3 ERROR sensor timeout\n",
        )
        .unwrap();

        let mut decoder = decoder;
        let frame = RgbImage::new(4, 4);
        let first = decoder.decode(&frame).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].data, b"https://example.com");
        assert_eq!(first[0].polygon[2], Point::new(110.0, 110.0));

        assert!(decoder.decode(&frame).unwrap().is_empty());

        let third = decoder.decode(&frame).unwrap();
        assert_eq!(third[0].data, b"hello world");
        assert_eq!(third[0].symbology, "EAN13");

        assert_eq!(decoder.decode(&frame).unwrap_err(), "sensor timeout");
        assert_eq!(decoder.next_frame(), 4);
    }

    #[test]
    fn test_parse_manifest_rejects_short_lines() {
        let err = ScriptedDecoder::parse_manifest("0 QRCODE 1 2 3 4\n").unwrap_err();
        assert!(matches!(err, ArqrError::InvalidInput(msg) if msg.contains("line 1")));
        assert!(ScriptedDecoder::parse_manifest("0 QRCODE 1 2 3 4 5 6 7 8\n").is_err());
    }
}
