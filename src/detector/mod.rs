//! Code detection
//!
//! The crate does not decode symbols itself. A [`CodeDecoder`] backend
//! (zbar, a QR library, a scripted replay) reports raw detections and
//! [`CodeDetector`] normalizes them into [`DetectedCode`] records.

use image::RgbImage;

use crate::error::{ArqrError, Result};
use crate::models::{DetectedCode, Point};

/// Scripted detections for replays and tests
pub mod replay;

pub use replay::ScriptedDecoder;

/// A detection as reported by a decoder backend
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// Raw symbol content
    pub data: Vec<u8>,
    /// Symbology name as the backend spells it
    pub symbology: String,
    /// Outline polygon; only 4-point outlines are usable
    pub polygon: Vec<Point>,
}

impl RawDetection {
    /// Create a raw detection
    pub fn new(data: impl Into<Vec<u8>>, symbology: impl Into<String>, polygon: Vec<Point>) -> Self {
        Self {
            data: data.into(),
            symbology: symbology.into(),
            polygon,
        }
    }
}

/// Trait for barcode/QR decoding backends.
///
/// An empty result means no codes were found; errors are per call and
/// non-fatal to the caller.
pub trait CodeDecoder {
    /// Error type for decode failures
    type Error: std::fmt::Display;

    /// Decode every code visible on `frame`
    fn decode(&mut self, frame: &RgbImage) -> std::result::Result<Vec<RawDetection>, Self::Error>;
}

/// Wraps a decoder backend and returns structured detections
#[derive(Debug)]
pub struct CodeDetector<D> {
    decoder: D,
}

impl<D: CodeDecoder> CodeDetector<D> {
    /// Wrap a decoder backend
    pub fn new(decoder: D) -> Self {
        Self { decoder }
    }

    /// Detect codes on a frame.
    ///
    /// Detections whose outline is not exactly 4 points are dropped. A backend
    /// failure is reported as [`ArqrError::Detection`].
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<DetectedCode>> {
        let raw = self
            .decoder
            .decode(frame)
            .map_err(|e| ArqrError::Detection(e.to_string()))?;

        Ok(raw
            .into_iter()
            .filter_map(|det| {
                let corners: [Point; 4] = match det.polygon.as_slice().try_into() {
                    Ok(corners) => corners,
                    Err(_) => {
                        log::debug!(
                            "dropping {} detection with {}-point outline",
                            det.symbology,
                            det.polygon.len()
                        );
                        return None;
                    }
                };
                let payload = String::from_utf8_lossy(&det.data).into_owned();
                Some(DetectedCode::new(payload, det.symbology, corners))
            })
            .collect())
    }

    /// Underlying decoder
    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Mutable access to the underlying decoder
    pub fn decoder_mut(&mut self) -> &mut D {
        &mut self.decoder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDecoder {
        result: std::result::Result<Vec<RawDetection>, String>,
    }

    impl CodeDecoder for FixedDecoder {
        type Error = String;

        fn decode(&mut self, _frame: &RgbImage) -> std::result::Result<Vec<RawDetection>, String> {
            self.result.clone()
        }
    }

    fn outline(n: usize) -> Vec<Point> {
        (0..n).map(|i| Point::new(i as f32 * 10.0, (i % 2) as f32 * 10.0)).collect()
    }

    #[test]
    fn test_no_codes_is_empty_not_error() {
        let mut detector = CodeDetector::new(FixedDecoder { result: Ok(vec![]) });
        let codes = detector.detect(&RgbImage::new(8, 8)).unwrap();
        assert!(codes.is_empty());
    }

    #[test]
    fn test_decoder_failure_is_detection_error() {
        let mut detector = CodeDetector::new(FixedDecoder {
            result: Err("camera glitch".into()),
        });
        let err = detector.detect(&RgbImage::new(8, 8)).unwrap_err();
        assert!(matches!(err, ArqrError::Detection(msg) if msg == "camera glitch"));
    }

    #[test]
    fn test_normalizes_payload_and_drops_bad_outlines() {
        let mut detector = CodeDetector::new(FixedDecoder {
            result: Ok(vec![
                RawDetection::new(b"https://example.com".to_vec(), "QRCODE", outline(4)),
                RawDetection::new(b"bad".to_vec(), "QRCODE", outline(5)),
                RawDetection::new(vec![0xff, b'x'], "CODE128", outline(4)),
            ]),
        });
        let codes = detector.detect(&RgbImage::new(8, 8)).unwrap();
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].payload, "https://example.com");
        assert_eq!(codes[0].type_label, "QRCODE");
        assert_eq!(codes[1].payload, "\u{fffd}x");
    }
}
