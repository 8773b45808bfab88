pub mod code;
pub mod point;

pub use code::{DetectedCode, Quad, TrackedEntry};
pub use point::Point;
