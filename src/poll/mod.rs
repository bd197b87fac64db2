//! Poll loop controller
//!
//! Drives the steady-state cycle for one socket: wait for received frames,
//! hand them to a [`BatchProcessor`], release them and put the same frames
//! back on the Fill ring.

pub mod controller;
pub mod processor;
pub mod stats;

pub use controller::{LoopState, PollLoop, PollOutcome};
pub use processor::{BatchProcessor, FrameCounter, ProcessResult, RxBatch, RxFrame};
pub use stats::{LoopReport, LoopStats, StopReason};
