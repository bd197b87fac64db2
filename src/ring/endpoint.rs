//! Producer and consumer ends of a descriptor ring

use std::sync::{atomic::Ordering, Arc};

use crate::error::{FrameRingError, Result};

use super::{desc::Descriptor, shared::RingShared};

/// Producer end: reserve slots, write descriptors, submit them as one batch
#[derive(Debug)]
pub struct RingProducer<D: Descriptor> {
    ring: Arc<RingShared<D>>,
    /// Next index to hand out from `reserve`
    cached_prod: u32,
    /// Last observed consumer index plus capacity
    cached_cons: u32,
}

impl<D: Descriptor> RingProducer<D> {
    pub(super) fn new(ring: Arc<RingShared<D>>) -> Self {
        let cached_prod = ring.producer_index();
        let cached_cons = ring.consumer_index().wrapping_add(ring.capacity());
        Self {
            ring,
            cached_prod,
            cached_cons,
        }
    }

    /// Published producer index; only this end stores it
    fn published(&self) -> u32 {
        self.ring.producer().load(Ordering::Relaxed)
    }

    /// Ring capacity
    pub fn capacity(&self) -> u32 {
        self.ring.capacity()
    }

    /// Entries submitted and not yet released by the consumer
    pub fn in_flight(&self) -> u32 {
        self.ring.in_flight()
    }

    /// Slots reserved but not yet submitted
    pub fn reserved(&self) -> u32 {
        self.cached_prod.wrapping_sub(self.published())
    }

    /// Free slots, refreshing the cached consumer index only when `wanted` is not met
    pub fn free_space(&mut self, wanted: u32) -> u32 {
        let free = self.cached_cons.wrapping_sub(self.cached_prod);
        if free >= wanted {
            return free;
        }

        self.cached_cons = self
            .ring
            .consumer()
            .load(Ordering::Acquire)
            .wrapping_add(self.ring.capacity());
        self.cached_cons.wrapping_sub(self.cached_prod)
    }

    /// Reserve up to `n` slots; returns `(granted, start_index)`, never blocks
    pub fn reserve(&mut self, n: u32) -> (u32, u32) {
        let granted = n.min(self.free_space(n));
        let start = self.cached_prod;
        self.cached_prod = self.cached_prod.wrapping_add(granted);
        (granted, start)
    }

    /// Write the descriptor for a reserved index
    pub fn write(&mut self, index: u32, desc: D) -> Result<()> {
        let published = self.published();
        if index.wrapping_sub(published) >= self.cached_prod.wrapping_sub(published) {
            return Err(FrameRingError::out_of_range(
                "unreserved ring index",
                index as u64,
                self.cached_prod as u64,
            ));
        }

        unsafe { self.ring.write_slot(index, desc) };
        Ok(())
    }

    /// Publish the next `count` reserved descriptors
    pub fn submit(&mut self, count: u32) -> Result<()> {
        let published = self.published();
        let pending = self.cached_prod.wrapping_sub(published);
        if count > pending {
            return Err(FrameRingError::desync(
                D::KIND.name(),
                format!("submit of {} with only {} reserved", count, pending),
            ));
        }

        self.ring
            .producer()
            .store(published.wrapping_add(count), Ordering::Release);
        Ok(())
    }

    /// Give back the last `count` reserved, unsubmitted slots
    pub fn cancel(&mut self, count: u32) -> Result<()> {
        let pending = self.reserved();
        if count > pending {
            return Err(FrameRingError::desync(
                D::KIND.name(),
                format!("cancel of {} with only {} reserved", count, pending),
            ));
        }
        self.cached_prod = self.cached_prod.wrapping_sub(count);
        Ok(())
    }

    /// Take back every descriptor the consumer has not released
    ///
    /// Only valid once the consumer end is detached: this end stores the
    /// consumer index, which the protocol otherwise reserves to the peer.
    /// Unsubmitted reservations are dropped.
    pub(crate) fn reclaim_outstanding(&mut self, out: &mut Vec<D>) -> u32 {
        let published = self.published();
        let consumer = self.ring.consumer().load(Ordering::Acquire);
        let outstanding = published.wrapping_sub(consumer);

        for offset in 0..outstanding {
            out.push(unsafe { self.ring.read_slot(consumer.wrapping_add(offset)) });
        }

        self.ring.consumer().store(published, Ordering::Release);
        self.cached_prod = published;
        self.cached_cons = published.wrapping_add(self.ring.capacity());
        outstanding
    }
}

/// Consumer end: peek submitted descriptors, read them, release them
#[derive(Debug)]
pub struct RingConsumer<D: Descriptor> {
    ring: Arc<RingShared<D>>,
    /// Next index to hand out from `peek`
    cached_cons: u32,
    /// Last observed producer index
    cached_prod: u32,
}

impl<D: Descriptor> RingConsumer<D> {
    pub(super) fn new(ring: Arc<RingShared<D>>) -> Self {
        let cached_cons = ring.consumer_index();
        let cached_prod = ring.producer_index();
        Self {
            ring,
            cached_cons,
            cached_prod,
        }
    }

    /// Released consumer index; only this end stores it
    fn released(&self) -> u32 {
        self.ring.consumer().load(Ordering::Relaxed)
    }

    /// Ring capacity
    pub fn capacity(&self) -> u32 {
        self.ring.capacity()
    }

    /// Entries submitted and not yet released
    pub fn in_flight(&self) -> u32 {
        self.ring.in_flight()
    }

    /// Entries peeked but not yet released
    pub fn peeked(&self) -> u32 {
        self.cached_cons.wrapping_sub(self.released())
    }

    /// Submitted entries not yet peeked, refreshing the cached producer index when short
    pub fn available(&mut self, wanted: u32) -> u32 {
        let entries = self.cached_prod.wrapping_sub(self.cached_cons);
        if entries >= wanted && entries > 0 {
            return entries;
        }

        self.cached_prod = self.ring.producer().load(Ordering::Acquire);
        self.cached_prod.wrapping_sub(self.cached_cons)
    }

    /// Peek up to `max` entries; returns `(available, start_index)`, never blocks
    pub fn peek(&mut self, max: u32) -> (u32, u32) {
        let count = self.available(max).min(max);
        let start = self.cached_cons;
        self.cached_cons = self.cached_cons.wrapping_add(count);
        (count, start)
    }

    /// Read the descriptor at a peeked index
    pub fn read(&self, index: u32) -> Result<D> {
        let released = self.released();
        if index.wrapping_sub(released) >= self.cached_cons.wrapping_sub(released) {
            return Err(FrameRingError::out_of_range(
                "unpeeked ring index",
                index as u64,
                self.cached_cons as u64,
            ));
        }

        Ok(unsafe { self.ring.read_slot(index) })
    }

    /// Free the oldest `count` peeked entries for reuse by the producer
    pub fn release(&mut self, count: u32) -> Result<()> {
        let released = self.released();
        let peeked = self.cached_cons.wrapping_sub(released);
        if count > peeked {
            return Err(FrameRingError::desync(
                D::KIND.name(),
                format!("release of {} with only {} peeked", count, peeked),
            ));
        }

        self.ring
            .consumer()
            .store(released.wrapping_add(count), Ordering::Release);
        Ok(())
    }

    /// Un-peek the last `count` peeked, unreleased entries
    pub fn cancel(&mut self, count: u32) -> Result<()> {
        let peeked = self.peeked();
        if count > peeked {
            return Err(FrameRingError::desync(
                D::KIND.name(),
                format!("cancel of {} with only {} peeked", count, peeked),
            ));
        }
        self.cached_cons = self.cached_cons.wrapping_sub(count);
        Ok(())
    }

    /// Read and release everything submitted so far
    pub(crate) fn drain(&mut self, out: &mut Vec<D>) -> u32 {
        let released = self.released();
        let producer = self.ring.producer().load(Ordering::Acquire);
        let outstanding = producer.wrapping_sub(released);

        for offset in 0..outstanding {
            out.push(unsafe { self.ring.read_slot(released.wrapping_add(offset)) });
        }

        self.ring.consumer().store(producer, Ordering::Release);
        self.cached_cons = producer;
        self.cached_prod = producer;
        outstanding
    }
}
