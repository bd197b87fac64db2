//! Frame pool memory
//!
//! A single page-aligned region carved into fixed-size frames. Frames are
//! identified by their byte offset into the region (`index * frame_size`)
//! and change hands only through the rings.

pub mod pool;
pub mod region;

pub use pool::{FramePool, FramePoolStats};
pub use region::{page_size, FrameRegion};
