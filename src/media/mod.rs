//! Camera collaborator and fixed-rate frame capture.

pub mod scheduler;
pub mod source;

pub use scheduler::{FrameScheduler, SchedulerStats, DEFAULT_CAPTURE_FPS, MAX_CAPTURE_FPS};
pub use source::{DirectoryFrameSource, FrameSource, MemoryFrameSource};
