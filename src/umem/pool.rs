//! Frame pool: a flat region of fixed-size frames and the set of frames currently free

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info};

use crate::{
    config::{BackingType, XskConfig},
    error::{FrameRingError, Result},
};

use super::region::{page_size, FrameRegion};

/// Frames the consumer currently owns outright, i.e. not lent to any ring
#[derive(Debug)]
struct FreeFrames {
    /// Free frame indices, used as a stack
    stack: Vec<u32>,
    /// Per-frame free flag for double-free detection
    is_free: Vec<bool>,
}

/// Point-in-time view of pool occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramePoolStats {
    /// Total frames in the pool
    pub frame_count: u32,
    /// Frames currently free
    pub free: u32,
    /// Frames lent out to the rings
    pub lent: u32,
}

/// A page-aligned region of `frame_count` frames of `frame_size` bytes
#[derive(Debug)]
pub struct FramePool {
    region: FrameRegion,
    frame_size: u32,
    frame_count: u32,
    headroom: u32,
    /// log2(frame_size) when the frame size is a power of two
    frame_shift: Option<u32>,
    free: Mutex<FreeFrames>,
}

impl FramePool {
    /// Allocate an anonymous pool of `frame_count` frames
    pub fn allocate(frame_size: u32, frame_count: u32) -> Result<Self> {
        Self::allocate_with(frame_size, frame_count, 0, &BackingType::Anonymous)
    }

    /// Allocate a pool from a socket configuration
    pub fn from_config(config: &XskConfig) -> Result<Self> {
        Self::allocate_with(
            config.frame_size,
            config.frame_count,
            config.frame_headroom,
            &config.backing,
        )
    }

    /// Allocate a pool with explicit headroom and backing
    pub fn allocate_with(
        frame_size: u32,
        frame_count: u32,
        headroom: u32,
        backing: &BackingType,
    ) -> Result<Self> {
        if frame_size == 0 || frame_size as usize % page_size() != 0 {
            return Err(FrameRingError::allocation(format!(
                "Frame size {} is not a multiple of the page size {}",
                frame_size,
                page_size()
            )));
        }
        if frame_count == 0 {
            return Err(FrameRingError::allocation("Frame count cannot be zero"));
        }
        if headroom >= frame_size {
            return Err(FrameRingError::allocation("Headroom must be smaller than the frame size"));
        }

        let size = (frame_size as usize)
            .checked_mul(frame_count as usize)
            .ok_or_else(|| FrameRingError::allocation("Frame region size overflows"))?;

        let region = FrameRegion::new(size, backing)?;

        // Lowest addresses on top so frames go out in address order.
        let stack: Vec<u32> = (0..frame_count).rev().collect();

        info!(
            "Frame pool allocated: {} frames x {} bytes ({} backing)",
            frame_count,
            frame_size,
            backing.name()
        );

        Ok(Self {
            region,
            frame_size,
            frame_count,
            headroom,
            frame_shift: frame_size
                .is_power_of_two()
                .then(|| frame_size.trailing_zeros()),
            free: Mutex::new(FreeFrames {
                stack,
                is_free: vec![true; frame_count as usize],
            }),
        })
    }

    /// Size of each frame in bytes
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Number of frames in the pool
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Headroom reserved at the start of each frame
    pub fn headroom(&self) -> u32 {
        self.headroom
    }

    /// Total region size in bytes
    pub fn size(&self) -> u64 {
        self.frame_size as u64 * self.frame_count as u64
    }

    /// The backing region
    pub fn region(&self) -> &FrameRegion {
        &self.region
    }

    /// Address of frame `index`
    pub fn address_of(&self, index: u32) -> Result<u64> {
        if index >= self.frame_count {
            return Err(FrameRingError::out_of_range(
                "frame index",
                index as u64,
                self.frame_count as u64,
            ));
        }
        Ok(index as u64 * self.frame_size as u64)
    }

    /// Index of the frame starting at `addr`; fails unless `addr` is a frame boundary
    pub fn index_of(&self, addr: u64) -> Result<u32> {
        let index = self.frame_index(addr)?;
        if addr != index as u64 * self.frame_size as u64 {
            return Err(FrameRingError::out_of_range("unaligned address", addr, self.size()));
        }
        Ok(index)
    }

    /// Start of the frame containing `addr`
    pub fn frame_base(&self, addr: u64) -> Result<u64> {
        let index = self.frame_index(addr)?;
        Ok(index as u64 * self.frame_size as u64)
    }

    fn frame_index(&self, addr: u64) -> Result<u32> {
        if addr >= self.size() {
            return Err(FrameRingError::out_of_range("address", addr, self.size()));
        }
        let index = match self.frame_shift {
            Some(shift) => addr >> shift,
            None => addr / self.frame_size as u64,
        };
        Ok(index as u32)
    }

    /// Check that `[addr, addr + len)` lies within a single frame
    pub fn check_range(&self, addr: u64, len: u32) -> Result<()> {
        let base = self.frame_base(addr)?;
        let end = addr + len as u64;
        if end > base + self.frame_size as u64 {
            return Err(FrameRingError::out_of_range("frame end", end, base + self.frame_size as u64));
        }
        Ok(())
    }

    /// View `len` bytes at `addr` in place
    ///
    /// # Safety
    /// The caller must own the frame under the ring protocol (peeked from Rx and
    /// not yet released, or not lent to any ring) so nothing writes it concurrently.
    pub unsafe fn frame(&self, addr: u64, len: u32) -> Result<&[u8]> {
        self.check_range(addr, len)?;
        Ok(std::slice::from_raw_parts(
            self.region.as_ptr().add(addr as usize),
            len as usize,
        ))
    }

    /// View of a range already checked with [`check_range`](Self::check_range)
    ///
    /// # Safety
    /// Same ownership rule as [`frame`](Self::frame), and `[addr, addr + len)`
    /// must lie within one frame.
    pub(crate) unsafe fn frame_unchecked(&self, addr: u64, len: u32) -> &[u8] {
        std::slice::from_raw_parts(self.region.as_ptr().add(addr as usize), len as usize)
    }

    /// Mutable view of `len` bytes at `addr`
    ///
    /// # Safety
    /// The caller must own the frame exclusively under the ring protocol, and
    /// must not hold any other view of the same frame.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn frame_mut(&self, addr: u64, len: u32) -> Result<&mut [u8]> {
        self.check_range(addr, len)?;
        Ok(std::slice::from_raw_parts_mut(
            self.region.as_ptr().add(addr as usize),
            len as usize,
        ))
    }

    fn lock_free(&self) -> MutexGuard<'_, FreeFrames> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take one free frame, returning its address
    pub fn alloc_frame(&self) -> Option<u64> {
        let mut free = self.lock_free();
        let index = free.stack.pop()?;
        free.is_free[index as usize] = false;
        Some(index as u64 * self.frame_size as u64)
    }

    /// Take up to `max` free frames, appending their addresses to `out`
    pub fn alloc_frames(&self, max: usize, out: &mut Vec<u64>) -> usize {
        let mut free = self.lock_free();
        let count = max.min(free.stack.len());
        for _ in 0..count {
            if let Some(index) = free.stack.pop() {
                free.is_free[index as usize] = false;
                out.push(index as u64 * self.frame_size as u64);
            }
        }
        count
    }

    /// Return the frame containing `addr` to the free set
    pub fn free_frame(&self, addr: u64) -> Result<()> {
        let index = self.frame_index(addr)?;
        let mut free = self.lock_free();
        if free.is_free[index as usize] {
            return Err(FrameRingError::desync(
                "pool",
                format!("frame {} returned while already free", index),
            ));
        }
        free.is_free[index as usize] = true;
        free.stack.push(index);
        Ok(())
    }

    /// Return several frames; stops at the first invalid address
    pub fn free_frames(&self, addrs: impl IntoIterator<Item = u64>) -> Result<usize> {
        let mut returned = 0;
        for addr in addrs {
            self.free_frame(addr)?;
            returned += 1;
        }
        if returned > 0 {
            debug!("Returned {} frames to the pool", returned);
        }
        Ok(returned)
    }

    /// Number of free frames
    pub fn free_count(&self) -> u32 {
        self.lock_free().stack.len() as u32
    }

    /// Whether the frame containing `addr` is free
    pub fn is_free(&self, addr: u64) -> Result<bool> {
        let index = self.frame_index(addr)?;
        Ok(self.lock_free().is_free[index as usize])
    }

    /// Occupancy snapshot
    pub fn stats(&self) -> FramePoolStats {
        let free = self.free_count();
        FramePoolStats {
            frame_count: self.frame_count,
            free,
            lent: self.frame_count - free,
        }
    }

    /// Release the pool, unmapping the region
    pub fn release(self) {
        let stats = self.stats();
        info!(
            "Frame pool released ({} of {} frames free)",
            stats.free, stats.frame_count
        );
    }
}
