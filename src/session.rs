//! Frame loop and published results
//!
//! A [`Session`] is the single writer: it pulls frames, runs the
//! orchestrator and publishes each rendered frame together with its result.
//! Any number of [`SessionHandle`]s read the latest pair. Publishing swaps an
//! `Arc`, so readers always see a frame and the result computed from it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use image::RgbImage;

use crate::detector::CodeDecoder;
use crate::error::Result;
use crate::tracking::{Clock, CornerTracker, FlowTracker, FrameOutcome, SystemClock, TrackingOrchestrator};

/// Blocking supplier of same-sized color frames
pub trait FrameSource {
    /// Next frame, or `None` at end of stream.
    ///
    /// A failed read must still advance the source; the session skips the
    /// frame and asks again.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// What the most recent frame showed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastResult {
    /// Whether at least one code was drawn
    pub any_detected: bool,
    /// Payload of the first code drawn
    pub primary_payload: Option<String>,
}

impl LastResult {
    /// Link for the primary payload, see [`payload_link`]
    pub fn link(&self) -> Option<String> {
        self.primary_payload
            .as_deref()
            .filter(|payload| !payload.is_empty())
            .map(payload_link)
    }
}

const SEARCH_URL: &str = "https://www.google.com/search?q=";

/// Openable link for a decoded payload: the payload itself when it is a web
/// URL, otherwise a web search for its text
pub fn payload_link(payload: &str) -> String {
    if is_web_url(payload) {
        return payload.to_string();
    }
    let mut link = String::from(SEARCH_URL);
    for byte in payload.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => link.push(byte as char),
            b' ' => link.push('+'),
            _ => link.push_str(&format!("%{byte:02X}")),
        }
    }
    link
}

/// `http`, `https` or `ftp` with a dotted host name and no whitespace
fn is_web_url(s: &str) -> bool {
    let Some((scheme, rest)) = s.split_once("://") else {
        return false;
    };
    if !matches!(scheme.to_ascii_lowercase().as_str(), "http" | "https" | "ftp") {
        return false;
    }
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let host = host_port.split(':').next().unwrap_or_default();
    host.contains('.')
        && !host.starts_with('.')
        && !host.ends_with('.')
        && !host.contains("..")
        && host.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

#[derive(Debug, Default)]
struct Published {
    result: LastResult,
    frame: Option<Arc<RgbImage>>,
}

/// Read side of a session; cheap to clone and share across threads
#[derive(Debug, Clone)]
pub struct SessionHandle {
    published: Arc<Mutex<Arc<Published>>>,
}

impl SessionHandle {
    fn snapshot(&self) -> Arc<Published> {
        Arc::clone(&self.published.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Result of the most recent frame
    pub fn last_result(&self) -> LastResult {
        self.snapshot().result.clone()
    }

    /// Most recent rendered frame
    pub fn last_frame(&self) -> Option<Arc<RgbImage>> {
        self.snapshot().frame.clone()
    }

    /// Rendered frame and its result, from the same publish
    pub fn last_rendered(&self) -> (LastResult, Option<Arc<RgbImage>>) {
        let snapshot = self.snapshot();
        (snapshot.result.clone(), snapshot.frame.clone())
    }
}

/// Drives an orchestrator over a stream of frames
pub struct Session<D, T = FlowTracker, C = SystemClock> {
    orchestrator: TrackingOrchestrator<D, T, C>,
    previews: HashSet<String>,
    published: Arc<Mutex<Arc<Published>>>,
}

impl<D: CodeDecoder, T: CornerTracker, C: Clock> Session<D, T, C> {
    /// Wrap an orchestrator; no previews enabled
    pub fn new(orchestrator: TrackingOrchestrator<D, T, C>) -> Self {
        Self {
            orchestrator,
            previews: HashSet::new(),
            published: Arc::new(Mutex::new(Arc::new(Published::default()))),
        }
    }

    /// Handle for reading published results
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            published: Arc::clone(&self.published),
        }
    }

    /// Payloads currently shown as previews
    pub fn previews_enabled(&self) -> &HashSet<String> {
        &self.previews
    }

    /// Flip preview display for `payload`; returns whether it is now enabled
    pub fn toggle_preview(&mut self, payload: &str) -> bool {
        if self.previews.remove(payload) {
            false
        } else {
            self.previews.insert(payload.to_string());
            true
        }
    }

    /// Toggle the preview of whichever tracked code covers `(x, y)`.
    ///
    /// Returns the payload and its new state, or `None` if nothing is there.
    pub fn toggle_preview_at(&mut self, x: f32, y: f32) -> Option<(String, bool)> {
        let payload = self.orchestrator.state().entry_at(x, y)?.payload.clone();
        let enabled = self.toggle_preview(&payload);
        log::debug!("preview for {payload:?} {}", if enabled { "on" } else { "off" });
        Some((payload, enabled))
    }

    /// Underlying orchestrator
    pub fn orchestrator(&self) -> &TrackingOrchestrator<D, T, C> {
        &self.orchestrator
    }

    /// Process one frame and publish the result
    pub fn process_frame(&mut self, frame: &RgbImage) -> FrameOutcome {
        let outcome = self.orchestrator.process_frame(frame, &self.previews);
        let published = Arc::new(Published {
            result: LastResult {
                any_detected: outcome.any_detected,
                primary_payload: outcome.primary_payload.clone(),
            },
            frame: Some(Arc::new(outcome.frame.clone())),
        });
        *self.published.lock().unwrap_or_else(|e| e.into_inner()) = published;
        outcome
    }

    /// Process frames from `source` until it ends, handing each outcome to
    /// `sink`. Unreadable frames are skipped; a sink error stops the loop.
    ///
    /// Returns the number of frames processed.
    pub fn run<S, F>(&mut self, source: &mut S, mut sink: F) -> Result<usize>
    where
        S: FrameSource,
        F: FnMut(&FrameOutcome) -> Result<()>,
    {
        let mut processed = 0;
        loop {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("skipping frame: {e}");
                    continue;
                }
            };
            let outcome = self.process_frame(&frame);
            sink(&outcome)?;
            processed += 1;
        }
        log::info!("processed {processed} frame(s)");
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArqrConfig;
    use crate::detector::{RawDetection, ScriptedDecoder};
    use crate::error::ArqrError;
    use crate::models::Point;
    use std::collections::VecDeque;

    struct QueueSource {
        frames: VecDeque<Result<Option<RgbImage>>>,
    }

    impl FrameSource for QueueSource {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            self.frames.pop_front().unwrap_or(Ok(None))
        }
    }

    fn session_with_code() -> Session<ScriptedDecoder> {
        let outline = vec![
            Point::new(10.0, 10.0),
            Point::new(110.0, 10.0),
            Point::new(110.0, 110.0),
            Point::new(10.0, 110.0),
        ];
        let decoder = ScriptedDecoder::new().with_detection(
            0,
            RawDetection::new(b"https://example.com".to_vec(), "QRCODE", outline),
        );
        Session::new(TrackingOrchestrator::new(decoder, &ArqrConfig::default()).unwrap())
    }

    #[test]
    fn test_toggle_preview() {
        let mut session = session_with_code();
        assert!(session.toggle_preview("x"));
        assert!(session.previews_enabled().contains("x"));
        assert!(!session.toggle_preview("x"));
        assert!(session.previews_enabled().is_empty());
    }

    #[test]
    fn test_toggle_preview_at_hits_tracked_code() {
        let mut session = session_with_code();
        assert!(session.toggle_preview_at(50.0, 50.0).is_none());

        session.process_frame(&RgbImage::new(160, 120));
        assert_eq!(
            session.toggle_preview_at(50.0, 50.0),
            Some(("https://example.com".to_string(), true))
        );
        assert!(session.toggle_preview_at(150.0, 5.0).is_none());
        assert_eq!(
            session.toggle_preview_at(20.0, 100.0),
            Some(("https://example.com".to_string(), false))
        );
    }

    #[test]
    fn test_handle_sees_published_pair() {
        let mut session = session_with_code();
        let handle = session.handle();
        assert_eq!(handle.last_result(), LastResult::default());
        assert!(handle.last_frame().is_none());

        let outcome = session.process_frame(&RgbImage::new(160, 120));
        let (result, frame) = handle.last_rendered();
        assert!(result.any_detected);
        assert_eq!(result.primary_payload.as_deref(), Some("https://example.com"));
        assert_eq!(frame.as_deref(), Some(&outcome.frame));
    }

    #[test]
    fn test_payload_link() {
        assert_eq!(payload_link("https://example.com"), "https://example.com");
        assert_eq!(payload_link("http://user@shop.example.org:8080/a?b=c"), "http://user@shop.example.org:8080/a?b=c");
        assert_eq!(payload_link("hello world"), "https://www.google.com/search?q=hello+world");
        assert_eq!(payload_link("example.com"), "https://www.google.com/search?q=example.com");
        assert_eq!(payload_link("https://nohost"), "https://www.google.com/search?q=https%3A%2F%2Fnohost");
        assert_eq!(payload_link("WIFI:S:net;;"), "https://www.google.com/search?q=WIFI%3AS%3Anet%3B%3B");

        assert_eq!(LastResult::default().link(), None);
        let result = LastResult {
            any_detected: true,
            primary_payload: Some("4006381333931".into()),
        };
        assert_eq!(result.link().as_deref(), Some("https://www.google.com/search?q=4006381333931"));
    }

    #[test]
    fn test_run_skips_bad_frames_until_end() {
        let mut session = session_with_code();
        let mut source = QueueSource {
            frames: VecDeque::from(vec![
                Ok(Some(RgbImage::new(160, 120))),
                Err(ArqrError::InvalidInput("truncated".into())),
                Ok(Some(RgbImage::new(160, 120))),
            ]),
        };
        let mut payloads = Vec::new();
        let processed = session
            .run(&mut source, |outcome| {
                payloads.push(outcome.primary_payload.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(processed, 2);
        assert_eq!(payloads[0].as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_run_stops_on_sink_error() {
        let mut session = session_with_code();
        let mut source = QueueSource {
            frames: VecDeque::from(vec![Ok(Some(RgbImage::new(8, 8))), Ok(Some(RgbImage::new(8, 8)))]),
        };
        let result = session.run(&mut source, |_| Err(ArqrError::InvalidInput("disk full".into())));
        assert!(result.is_err());
        assert_eq!(source.frames.len(), 1);
    }
}
