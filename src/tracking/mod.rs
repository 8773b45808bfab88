//! Following codes between decodes

pub mod clock;
pub mod flow;
pub mod orchestrator;
pub mod pyramid;
pub mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use flow::{accept_tracked_quad, CornerTracker, FlowTracker, PointStatus, TrackedPoint};
pub use orchestrator::{FrameOutcome, TrackingOrchestrator};
pub use pyramid::Pyramid;
pub use state::{TrackingPhase, TrackingState};
