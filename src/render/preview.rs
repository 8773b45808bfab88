//! Preview images for decoded payloads
//!
//! Resolving a payload to an image can be slow (a page render, a download).
//! [`BackgroundPreviewResolver`] moves that work onto the rayon pool so the
//! frame path only ever sees "ready" or "not yet".

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::RgbImage;

use crate::error::{ArqrError, Result};

/// Maps a decoded payload to a local preview image
pub trait PreviewResolver: Send + Sync {
    /// Path of the preview image for `payload`, or
    /// [`ArqrError::PreviewUnavailable`]
    fn resolve(&self, payload: &str) -> Result<PathBuf>;
}

/// Fixed payload to path table
#[derive(Debug, Clone, Default)]
pub struct StaticPreviewResolver {
    paths: HashMap<String, PathBuf>,
}

impl StaticPreviewResolver {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a preview path for `payload`
    pub fn insert(&mut self, payload: impl Into<String>, path: impl Into<PathBuf>) {
        self.paths.insert(payload.into(), path.into());
    }

    /// Number of registered payloads
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether no payloads are registered
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Parse `payload<TAB>path` lines. Relative paths are resolved against
    /// `base`.
    pub fn parse_manifest(content: &str, base: &Path) -> Result<Self> {
        let mut resolver = Self::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (payload, path) = line.split_once('\t').ok_or_else(|| {
                ArqrError::InvalidInput(format!("preview manifest line {}: expected payload<TAB>path", lineno + 1))
            })?;
            let path = Path::new(path.trim());
            let path = if path.is_relative() { base.join(path) } else { path.to_path_buf() };
            resolver.insert(payload, path);
        }
        Ok(resolver)
    }

    /// Load a manifest from disk; relative paths resolve against its directory
    pub fn from_manifest<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse_manifest(&content, base)
    }
}

impl PreviewResolver for StaticPreviewResolver {
    fn resolve(&self, payload: &str) -> Result<PathBuf> {
        let path = self
            .paths
            .get(payload)
            .ok_or_else(|| ArqrError::preview_unavailable(payload, "no preview registered"))?;
        if !path.is_file() {
            return Err(ArqrError::preview_unavailable(
                payload,
                format!("{} does not exist", path.display()),
            ));
        }
        Ok(path.clone())
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Pending,
    Ready(PathBuf),
    Failed { reason: String, at: Instant },
}

/// Resolves through `R` on the rayon pool.
///
/// The first request for a payload starts a job and reports the preview as
/// unavailable; later requests return the job's outcome once it lands.
/// Resolved paths are kept for the resolver's lifetime. A failure is
/// reported until `retry_after` has passed, then the next request starts a
/// fresh job.
pub struct BackgroundPreviewResolver<R> {
    inner: Arc<R>,
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    retry_after: Duration,
}

impl<R: PreviewResolver + 'static> BackgroundPreviewResolver<R> {
    /// Wrap `inner`; failed payloads are retried after 500 ms
    pub fn new(inner: R) -> Self {
        Self {
            inner: Arc::new(inner),
            slots: Arc::new(Mutex::new(HashMap::new())),
            retry_after: Duration::from_millis(500),
        }
    }

    /// Wait `retry_after` before resolving a failed payload again
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Whether a job for `payload` is still running
    pub fn is_pending(&self, payload: &str) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        matches!(slots.get(payload), Some(Slot::Pending))
    }

    fn spawn(&self, payload: &str) {
        let inner = Arc::clone(&self.inner);
        let slots = Arc::clone(&self.slots);
        let payload = payload.to_string();
        rayon::spawn(move || {
            let slot = match inner.resolve(&payload) {
                Ok(path) => Slot::Ready(path),
                Err(e) => {
                    log::warn!("preview resolution failed for {payload:?}: {e}");
                    Slot::Failed {
                        reason: e.to_string(),
                        at: Instant::now(),
                    }
                }
            };
            slots.lock().unwrap_or_else(|e| e.into_inner()).insert(payload, slot);
        });
    }
}

impl<R: PreviewResolver + 'static> PreviewResolver for BackgroundPreviewResolver<R> {
    fn resolve(&self, payload: &str) -> Result<PathBuf> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.get(payload) {
            Some(Slot::Ready(path)) => return Ok(path.clone()),
            Some(Slot::Failed { reason, at }) if at.elapsed() < self.retry_after => {
                return Err(ArqrError::preview_unavailable(payload, reason.clone()));
            }
            Some(Slot::Pending) => return Err(ArqrError::preview_unavailable(payload, "still resolving")),
            Some(Slot::Failed { .. }) | None => {}
        }
        slots.insert(payload.to_string(), Slot::Pending);
        drop(slots);
        self.spawn(payload);
        Err(ArqrError::preview_unavailable(payload, "still resolving"))
    }
}

/// Decoded overlay images keyed by path
#[derive(Debug, Default)]
pub struct OverlayCache {
    images: HashMap<PathBuf, Arc<RgbImage>>,
}

impl OverlayCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `path` on first use, then serve it from memory
    pub fn load(&mut self, path: &Path) -> Result<Arc<RgbImage>> {
        if let Some(img) = self.images.get(path) {
            return Ok(Arc::clone(img));
        }
        let img = Arc::new(image::open(path)?.to_rgb8());
        self.images.insert(path.to_path_buf(), Arc::clone(&img));
        Ok(img)
    }

    /// Number of cached images
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("arqr-preview-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_static_resolver_checks_existence() {
        let dir = temp_dir("static");
        let present = dir.join("present.png");
        RgbImage::new(2, 2).save(&present).unwrap();

        let mut resolver = StaticPreviewResolver::new();
        resolver.insert("here", &present);
        resolver.insert("gone", dir.join("missing.png"));

        assert_eq!(resolver.resolve("here").unwrap(), present);
        assert!(matches!(
            resolver.resolve("gone"),
            Err(ArqrError::PreviewUnavailable { .. })
        ));
        assert!(matches!(
            resolver.resolve("unknown"),
            Err(ArqrError::PreviewUnavailable { payload, .. }) if payload == "unknown"
        ));
    }

    #[test]
    fn test_manifest_resolves_relative_paths() {
        let resolver = StaticPreviewResolver::parse_manifest(
            "# payload\tpath\nhttps://example.com\tshots/example.png\nabs\t/tmp/x.png\n",
            Path::new("/data"),
        )
        .unwrap();
        assert_eq!(resolver.len(), 2);
        assert_eq!(
            resolver.paths.get("https://example.com"),
            Some(&PathBuf::from("/data/shots/example.png"))
        );
        assert_eq!(resolver.paths.get("abs"), Some(&PathBuf::from("/tmp/x.png")));
        assert!(StaticPreviewResolver::parse_manifest("no tab here\n", Path::new(".")).is_err());
    }

    #[test]
    fn test_background_resolver_reports_unavailable_until_ready() {
        let dir = temp_dir("background");
        let path = dir.join("page.png");
        RgbImage::new(2, 2).save(&path).unwrap();
        let mut inner = StaticPreviewResolver::new();
        inner.insert("page", &path);
        let resolver = BackgroundPreviewResolver::new(inner);

        assert!(matches!(
            resolver.resolve("page"),
            Err(ArqrError::PreviewUnavailable { .. })
        ));

        let deadline = Instant::now() + Duration::from_secs(5);
        let resolved = loop {
            match resolver.resolve("page") {
                Ok(p) => break Some(p),
                Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(5)),
                Err(_) => break None,
            }
        };
        assert_eq!(resolved, Some(path));
        assert!(!resolver.is_pending("page"));
    }

    fn wait_until_settled<R: PreviewResolver + 'static>(resolver: &BackgroundPreviewResolver<R>, payload: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while resolver.is_pending(payload) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!resolver.is_pending(payload));
    }

    #[test]
    fn test_background_resolver_retries_after_failure() {
        let dir = temp_dir("retry");
        let path = dir.join("late.png");
        let _ = fs::remove_file(&path);
        let mut inner = StaticPreviewResolver::new();
        inner.insert("late", &path);
        let resolver = BackgroundPreviewResolver::new(inner).with_retry_after(Duration::ZERO);

        assert!(resolver.resolve("late").is_err());
        wait_until_settled(&resolver, "late");
        assert!(resolver.resolve("late").is_err());

        RgbImage::new(2, 2).save(&path).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let resolved = loop {
            match resolver.resolve("late") {
                Ok(p) => break Some(p),
                Err(_) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(5)),
                Err(_) => break None,
            }
        };
        assert_eq!(resolved, Some(path));
    }

    #[test]
    fn test_background_resolver_holds_failure_during_backoff() {
        let dir = temp_dir("backoff");
        let path = dir.join("late.png");
        let _ = fs::remove_file(&path);
        let mut inner = StaticPreviewResolver::new();
        inner.insert("late", &path);
        let resolver = BackgroundPreviewResolver::new(inner).with_retry_after(Duration::from_secs(3600));

        assert!(resolver.resolve("late").is_err());
        wait_until_settled(&resolver, "late");

        RgbImage::new(2, 2).save(&path).unwrap();
        assert!(matches!(
            resolver.resolve("late"),
            Err(ArqrError::PreviewUnavailable { reason, .. }) if reason.contains("does not exist")
        ));
        assert!(!resolver.is_pending("late"));
    }

    #[test]
    fn test_overlay_cache_reuses_decoded_image() {
        let dir = temp_dir("cache");
        let path = dir.join("overlay.png");
        RgbImage::from_pixel(3, 2, Rgb([9, 8, 7])).save(&path).unwrap();

        let mut cache = OverlayCache::new();
        let first = cache.load(&path).unwrap();
        let second = cache.load(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.dimensions(), (3, 2));
        assert_eq!(cache.len(), 1);
        assert!(cache.load(&dir.join("nope.png")).is_err());
    }
}
