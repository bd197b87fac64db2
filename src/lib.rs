//! # framering - Zero-Copy Packet Frame Rings
//!
//! framering is the consumer half of an AF_XDP style receive path: a pool of
//! fixed-size frames shared with a packet source, four single-producer /
//! single-consumer descriptor rings that hand frames back and forth, a scoped
//! registration in the source's dispatch table, and a poll loop that
//! processes received frames in place and recycles them.
//!
//! ## Features
//!
//! - **Frame pool**: page-aligned region (anonymous, memfd or file backed) with free-frame tracking
//! - **Descriptor rings**: Fill, Completion, Rx and Tx over one lock-free index-pair protocol
//! - **Dispatch registration**: in-memory table or pinned BPF XSKMAP, released on drop
//! - **Poll loop**: batch processing, bounded cancellable idle wait, full reclaim on shutdown
//! - **Loopback source**: in-process packet source for simulation and tests
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────── Frame Pool ────────────────┐
//!            │  frame 0 │ frame 1 │ ... │ frame N-1       │
//!            └────────────────────────────────────────────┘
//!     Fill ──────────────▶ ┌────────────────┐
//!   (empty frames)         │  Packet source │ ──── Rx ─────▶ Poll loop
//!     Completion ◀──────── │  (loopback or  │                  │
//!   (sent frames)          │   kernel)      │ ◀─── Tx ────── socket
//!                          └────────────────┘
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod loopback;
pub mod poll;
pub mod ring;
pub mod socket;
pub mod sync;
pub mod umem;

// Main API re-exports
pub use config::{BackingType, DesyncPolicy, XskConfig, XskConfigBuilder};
pub use dispatch::{DispatchRegistration, DispatchTable, InMemoryDispatchTable};
#[cfg(target_os = "linux")]
pub use dispatch::PinnedXskMap;
pub use error::{FrameRingError, Result};
pub use loopback::{GeneratorConfig, LoopbackHost, LoopbackSource, RingHost, SourceStats};
pub use poll::{
    BatchProcessor, FrameCounter, LoopReport, LoopState, LoopStats, PollLoop, PollOutcome,
    ProcessResult, RxBatch, RxFrame, StopReason,
};
pub use ring::{
    CompletionDescriptor, Descriptor, FillDescriptor, RingConsumer, RingKind, RingProducer,
    RxDescriptor, TxDescriptor,
};
pub use socket::{RingOccupancy, SocketHandle, UserRings, XskSocket};
pub use sync::CancellationToken;
pub use umem::{FramePool, FramePoolStats, FrameRegion};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
