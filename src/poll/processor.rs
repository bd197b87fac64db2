//! Batch processing interface
//!
//! The loop hands each peeked Rx batch to a [`BatchProcessor`] as a borrowed
//! view over the frame pool. Frames are inspected in place; nothing is copied,
//! and the view cannot outlive the call, so the loop keeps control of when the
//! batch is released and refilled.

use crate::{
    error::Result,
    ring::RxDescriptor,
    umem::FramePool,
};

/// What the loop should do after a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// Keep polling
    Continue,
    /// Finish this batch, then shut down
    Stop,
}

/// One received frame, viewed in place
#[derive(Debug, Clone, Copy)]
pub struct RxFrame<'a> {
    /// Address of the packet data within the pool
    pub addr: u64,
    /// Packet length
    pub len: u32,
    /// Descriptor options
    pub options: u32,
    data: &'a [u8],
}

impl<'a> RxFrame<'a> {
    /// Packet bytes
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

/// A batch of received frames, valid for the duration of one `process_batch` call
#[derive(Debug)]
pub struct RxBatch<'a> {
    descs: &'a [RxDescriptor],
    pool: &'a FramePool,
}

impl<'a> RxBatch<'a> {
    /// Build a view, checking every descriptor lies within a single frame
    ///
    /// # Safety
    /// Every descriptor must be peeked from the Rx ring and not yet released,
    /// so the source no longer writes those frames.
    pub unsafe fn new(descs: &'a [RxDescriptor], pool: &'a FramePool) -> Result<Self> {
        for desc in descs {
            pool.check_range(desc.addr, desc.len)?;
        }
        Ok(Self { descs, pool })
    }

    /// Number of frames
    pub fn len(&self) -> usize {
        self.descs.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    /// Raw descriptors
    pub fn descriptors(&self) -> &'a [RxDescriptor] {
        self.descs
    }

    /// Frame at `index`
    pub fn get(&self, index: usize) -> Option<RxFrame<'a>> {
        self.descs.get(index).map(|desc| self.view(desc))
    }

    /// Frames in ring order
    pub fn iter(&self) -> impl Iterator<Item = RxFrame<'a>> + '_ {
        self.descs.iter().map(move |desc| self.view(desc))
    }

    /// Sum of packet lengths
    pub fn total_bytes(&self) -> u64 {
        self.descs.iter().map(|d| d.len as u64).sum()
    }

    fn view(&self, desc: &RxDescriptor) -> RxFrame<'a> {
        RxFrame {
            addr: desc.addr,
            len: desc.len,
            options: desc.options,
            // Range checked in `new`; ownership guaranteed by its caller.
            data: unsafe { self.pool.frame_unchecked(desc.addr, desc.len) },
        }
    }
}

/// Consumer of received batches
pub trait BatchProcessor {
    /// Inspect a batch in place
    fn process_batch(&mut self, batch: &RxBatch<'_>) -> ProcessResult;
}

impl<F> BatchProcessor for F
where
    F: FnMut(&RxBatch<'_>) -> ProcessResult,
{
    fn process_batch(&mut self, batch: &RxBatch<'_>) -> ProcessResult {
        self(batch)
    }
}

/// Processor that counts frames and bytes, optionally stopping after a frame limit
#[derive(Debug, Clone, Default)]
pub struct FrameCounter {
    pub frames: u64,
    pub bytes: u64,
    pub last_len: Option<u32>,
    pub limit: Option<u64>,
}

impl FrameCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop once `limit` frames have been seen
    pub fn with_limit(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl BatchProcessor for FrameCounter {
    fn process_batch(&mut self, batch: &RxBatch<'_>) -> ProcessResult {
        for frame in batch.iter() {
            self.frames += 1;
            self.bytes += frame.data().len() as u64;
            self.last_len = Some(frame.len);
        }

        match self.limit {
            Some(limit) if self.frames >= limit => ProcessResult::Stop,
            _ => ProcessResult::Continue,
        }
    }
}
