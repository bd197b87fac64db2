//! Poll loop counters and the final report

use std::fmt;

use crate::{socket::RingOccupancy, umem::FramePoolStats};

use super::controller::LoopState;

/// Counters kept by the poll loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Non-empty batches processed
    pub batches: u64,
    /// Frames handed to the processor
    pub frames: u64,
    /// Packet bytes handed to the processor
    pub bytes: u64,
    /// Idle waits on an empty Rx ring
    pub idle_waits: u64,
    /// Refills that came up short
    pub desyncs: u64,
    /// Parked frames put back on the Fill ring
    pub resynced: u64,
    /// Rx entries released unprocessed during shutdown
    pub drained: u64,
}

impl LoopStats {
    pub(crate) fn record_batch(&mut self, frames: u32, bytes: u64) {
        self.batches += 1;
        self.frames += frames as u64;
        self.bytes += bytes;
    }
}

/// Why the loop left the polling state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `shutdown` called directly
    Requested,
    /// The cancellation token fired
    Cancelled,
    /// The processor returned `Stop`
    Processor,
    /// A fault ended the loop
    Fault,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Requested => "requested",
            StopReason::Cancelled => "cancelled",
            StopReason::Processor => "processor",
            StopReason::Fault => "fault",
        };
        f.write_str(s)
    }
}

/// Outcome of a completed shutdown
#[derive(Debug, Clone, Copy)]
pub struct LoopReport {
    pub state: LoopState,
    pub stop_reason: StopReason,
    pub stats: LoopStats,
    /// Ring occupancy after reclaim
    pub occupancy: RingOccupancy,
    /// Pool occupancy just before release
    pub pool: FramePoolStats,
    /// Frames taken back from the rings during shutdown
    pub recovered: u32,
    /// Whether the pool was unmapped (false if someone else still held it)
    pub pool_released: bool,
}
