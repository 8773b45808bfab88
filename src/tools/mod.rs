//! Helpers shared by the CLI, integration tests and benches

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::error::{ArqrError, Result};
use crate::models::{Point, Quad};
use crate::session::FrameSource;

/// Load an image as RGB
pub fn load_rgb<P: AsRef<Path>>(path: P) -> Result<RgbImage> {
    Ok(image::open(path)?.to_rgb8())
}

/// Parse four corners written as `"x0,y0 x1,y1 x2,y2 x3,y3"`
pub fn parse_corners(text: &str) -> Result<Quad> {
    let points = text
        .split_whitespace()
        .map(|pair| {
            let (x, y) = pair
                .split_once(',')
                .ok_or_else(|| ArqrError::InvalidInput(format!("corner {pair:?} is not x,y")))?;
            let parse = |v: &str| {
                v.trim()
                    .parse::<f32>()
                    .map_err(|_| ArqrError::InvalidInput(format!("bad coordinate {v:?}")))
            };
            Ok(Point::new(parse(x)?, parse(y)?))
        })
        .collect::<Result<Vec<Point>>>()?;

    let count = points.len();
    points
        .try_into()
        .map_err(|_| ArqrError::InvalidInput(format!("expected 4 corners, got {count}")))
}

/// Image files under `root`, recursively, sorted by path
pub fn collect_images(root: &Path) -> Vec<PathBuf> {
    let mut stack = vec![root.to_path_buf()];
    let mut images = Vec::new();

    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if let Some(ext) = path.extension() {
                let ext = ext.to_string_lossy().to_lowercase();
                if matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "gif" | "bmp") {
                    images.push(path);
                }
            }
        }
    }

    images.sort();
    images
}

/// Frames read from a directory of images in name order.
///
/// Every frame must match the size of the first one; mismatched frames are
/// reported as errors and skipped by the session.
#[derive(Debug, Clone)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    next: usize,
    size: Option<(u32, u32)>,
}

impl ImageSequenceSource {
    /// Source over the images in `dir`
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(ArqrError::InvalidInput(format!("{} is not a directory", dir.display())));
        }
        Ok(Self::from_paths(collect_images(dir)))
    }

    /// Source over explicit paths, in the given order
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            next: 0,
            size: None,
        }
    }

    /// Total number of frames
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether the source has no frames at all
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Path of the frame most recently handed out
    pub fn current_path(&self) -> Option<&Path> {
        self.next.checked_sub(1).and_then(|i| self.paths.get(i)).map(PathBuf::as_path)
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;

        let frame = load_rgb(path)?;
        match self.size {
            None => self.size = Some(frame.dimensions()),
            Some(size) if size != frame.dimensions() => {
                return Err(ArqrError::InvalidInput(format!(
                    "{} is {:?}, expected {:?}",
                    path.display(),
                    frame.dimensions(),
                    size
                )));
            }
            Some(_) => {}
        }
        Ok(Some(frame))
    }
}
