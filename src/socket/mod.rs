//! Consumer handle: a frame pool reference plus the consumer's ends of the four rings

pub mod rings;

use std::{fmt, sync::Arc};

use log::{debug, info};

use crate::{
    error::{FrameRingError, Result},
    ring::{Descriptor, TxDescriptor},
    umem::FramePool,
};

pub use rings::{create_rings, PeerRings, RingOccupancy, UserRings};

/// Identifier the packet source uses to route frames to a socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(pub i32);

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xsk#{}", self.0)
    }
}

/// Consumer handle bound to one queue
///
/// Holds a strong reference to the frame pool, so the pool cannot be
/// released while the socket exists.
#[derive(Debug)]
pub struct XskSocket {
    handle: SocketHandle,
    queue_id: u32,
    // Field order is drop order: rings go before the pool they point into.
    rings: UserRings,
    pool: Arc<FramePool>,
    scratch: Vec<u64>,
}

impl XskSocket {
    /// Bind ring ends provided by the host to a frame pool
    pub fn new(pool: Arc<FramePool>, rings: UserRings, handle: SocketHandle, queue_id: u32) -> Self {
        info!(
            "Socket {} bound to queue {} (fill {}, completion {}, rx {}, tx {})",
            handle,
            queue_id,
            rings.fill.capacity(),
            rings.completion.capacity(),
            rings.rx.capacity(),
            rings.tx.capacity()
        );

        Self {
            handle,
            queue_id,
            rings,
            pool,
            scratch: Vec::new(),
        }
    }

    /// Handle registered with the dispatch table
    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    /// Bound queue
    pub fn queue_id(&self) -> u32 {
        self.queue_id
    }

    /// The frame pool
    pub fn pool(&self) -> &Arc<FramePool> {
        &self.pool
    }

    /// Ring ends
    pub fn rings(&self) -> &UserRings {
        &self.rings
    }

    /// Ring ends and pool, borrowed together
    pub fn split_mut(&mut self) -> (&mut UserRings, &FramePool) {
        (&mut self.rings, &self.pool)
    }

    /// Entries in flight on each ring
    pub fn occupancy(&self) -> RingOccupancy {
        self.rings.occupancy()
    }

    /// Copy payloads into free frames and queue them on the Tx ring
    ///
    /// Returns how many were queued; fewer than requested means the pool or
    /// the Tx ring ran out of room.
    pub fn transmit(&mut self, payloads: &[&[u8]]) -> Result<u32> {
        let room = self.pool.frame_size() - self.pool.headroom();
        if let Some(oversized) = payloads.iter().find(|p| p.len() > room as usize) {
            return Err(FrameRingError::invalid_parameter(
                "payload",
                format!("{} bytes exceed the frame room of {}", oversized.len(), room),
            ));
        }

        let wanted = payloads.len().min(u32::MAX as usize) as u32;
        let space = self.rings.tx.free_space(wanted).min(wanted);

        let mut addrs = std::mem::take(&mut self.scratch);
        addrs.clear();
        self.pool.alloc_frames(space as usize, &mut addrs);

        let (granted, start) = self.rings.tx.reserve(addrs.len() as u32);
        let headroom = self.pool.headroom() as u64;
        let mut result = Ok(());
        for (i, (&addr, payload)) in addrs.iter().zip(payloads).take(granted as usize).enumerate() {
            let len = payload.len() as u32;
            let data_addr = addr + headroom;
            // The frame came from the free set, so nothing else references it.
            let written = unsafe { self.pool.frame_mut(data_addr, len) }.map(|frame| {
                frame.copy_from_slice(payload);
            });
            result = written.and_then(|_| {
                self.rings.tx.write(
                    start.wrapping_add(i as u32),
                    TxDescriptor {
                        addr: data_addr,
                        len,
                        options: 0,
                    },
                )
            });
            if result.is_err() {
                break;
            }
        }

        if let Err(err) = result {
            self.rings.tx.cancel(granted)?;
            self.pool.free_frames(addrs.drain(..))?;
            self.scratch = addrs;
            return Err(err);
        }

        if (granted as usize) < addrs.len() {
            self.pool.free_frames(addrs.drain(granted as usize..))?;
        }
        self.rings.tx.submit(granted)?;
        self.scratch = addrs;

        if granted > 0 {
            debug!("Queued {} frames on tx", granted);
        }
        Ok(granted)
    }

    /// Return up to `max` completed transmissions to the pool
    pub fn reclaim_completions(&mut self, max: u32) -> Result<u32> {
        let (available, start) = self.rings.completion.peek(max);
        for i in 0..available {
            let desc = self.rings.completion.read(start.wrapping_add(i))?;
            self.pool.free_frame(self.pool.frame_base(desc.addr)?)?;
        }
        self.rings.completion.release(available)?;
        Ok(available)
    }

    /// Release the rings, returning every frame they still hold to the pool
    ///
    /// The packet source must already be detached: its dispatch entry cleared,
    /// so it neither delivers Rx nor completes Tx for this socket any more.
    /// This takes back descriptors the source has not consumed.
    pub fn close(mut self) -> Result<u32> {
        self.reclaim_all()
    }

    /// Take back every descriptor on all four rings, leaving them empty
    ///
    /// Same precondition as [`close`](Self::close).
    pub fn reclaim_all(&mut self) -> Result<u32> {
        let mut fill = Vec::new();
        let mut tx = Vec::new();
        let mut rx = Vec::new();
        let mut completion = Vec::new();

        self.rings.fill.reclaim_outstanding(&mut fill);
        self.rings.tx.reclaim_outstanding(&mut tx);
        self.rings.rx.drain(&mut rx);
        self.rings.completion.drain(&mut completion);

        let pool = &self.pool;
        let mut recovered = 0u32;
        let mut first_error = None;
        for addr in fill
            .iter()
            .map(Descriptor::addr)
            .chain(tx.iter().map(Descriptor::addr))
            .chain(rx.iter().map(Descriptor::addr))
            .chain(completion.iter().map(Descriptor::addr))
        {
            match pool.frame_base(addr).and_then(|base| pool.free_frame(base)) {
                Ok(()) => recovered += 1,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        info!(
            "Socket {} rings emptied, recovered {} frames (fill {}, tx {}, rx {}, completion {})",
            self.handle,
            recovered,
            fill.len(),
            tx.len(),
            rx.len(),
            completion.len()
        );
        match first_error {
            Some(e) => Err(e),
            None => Ok(recovered),
        }
    }
}
