//! Ring storage: a producer index, a consumer index and a power-of-two descriptor array

use std::{
    cell::UnsafeCell,
    marker::PhantomData,
    ptr::NonNull,
    sync::atomic::{AtomicU32, Ordering},
};

use crate::{
    config::MAX_RING_SIZE,
    error::{FrameRingError, Result},
};

use super::desc::Descriptor;

/// An index on its own cache line
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct RingIndex(pub AtomicU32);

/// Producer and consumer indices of one ring
#[repr(C)]
#[derive(Debug, Default)]
pub struct RingHeader {
    pub producer: RingIndex,
    pub consumer: RingIndex,
}

#[derive(Debug)]
enum Storage<D> {
    /// Heap storage owned by this ring
    Owned {
        _header: Box<RingHeader>,
        _descs: Box<[UnsafeCell<D>]>,
    },
    /// Memory mapped in by the host environment
    External,
}

/// Shared state of a single-producer/single-consumer descriptor ring
///
/// Indices are free-running `u32` counters; slot `i` lives at `i & mask`.
/// The producer index is the only signal that descriptors are written and the
/// consumer index the only signal that they may be reused.
#[derive(Debug)]
pub struct RingShared<D: Descriptor> {
    producer: NonNull<AtomicU32>,
    consumer: NonNull<AtomicU32>,
    descs: NonNull<D>,
    capacity: u32,
    mask: u32,
    _storage: Storage<D>,
    _phantom: PhantomData<D>,
}

impl<D: Descriptor> RingShared<D> {
    /// Create a ring with heap storage
    pub fn new(capacity: u32) -> Result<Self> {
        Self::check_capacity(capacity)?;

        let header = Box::new(RingHeader::default());
        let descs: Box<[UnsafeCell<D>]> = (0..capacity)
            .map(|_| UnsafeCell::new(D::default()))
            .collect();

        let producer = NonNull::from(&header.producer.0);
        let consumer = NonNull::from(&header.consumer.0);
        // UnsafeCell<D> has the same layout as D.
        let descs_ptr = NonNull::new(descs.as_ptr() as *mut D).ok_or_else(|| {
            FrameRingError::ring_creation(D::KIND.name(), "Descriptor array is null")
        })?;

        Ok(Self {
            producer,
            consumer,
            descs: descs_ptr,
            capacity,
            mask: capacity - 1,
            _storage: Storage::Owned {
                _header: header,
                _descs: descs,
            },
            _phantom: PhantomData,
        })
    }

    /// Wrap a ring whose indices and descriptors live in externally mapped memory
    ///
    /// # Safety
    /// - `producer`, `consumer` and `descs` must stay valid for the lifetime of the ring
    /// - `descs` must point to `capacity` properly aligned descriptors
    /// - the peer must follow the same single-producer/single-consumer protocol
    pub unsafe fn from_raw_parts(
        producer: NonNull<AtomicU32>,
        consumer: NonNull<AtomicU32>,
        descs: NonNull<D>,
        capacity: u32,
    ) -> Result<Self> {
        Self::check_capacity(capacity)?;

        Ok(Self {
            producer,
            consumer,
            descs,
            capacity,
            mask: capacity - 1,
            _storage: Storage::External,
            _phantom: PhantomData,
        })
    }

    fn check_capacity(capacity: u32) -> Result<()> {
        if capacity == 0 || !capacity.is_power_of_two() || capacity > MAX_RING_SIZE {
            return Err(FrameRingError::ring_creation(
                D::KIND.name(),
                format!("Capacity {} must be a power of 2 between 1 and 2^31", capacity),
            ));
        }
        Ok(())
    }

    /// Ring capacity
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub(super) fn producer(&self) -> &AtomicU32 {
        unsafe { self.producer.as_ref() }
    }

    pub(super) fn consumer(&self) -> &AtomicU32 {
        unsafe { self.consumer.as_ref() }
    }

    /// Published producer index
    pub fn producer_index(&self) -> u32 {
        self.producer().load(Ordering::Acquire)
    }

    /// Released consumer index
    pub fn consumer_index(&self) -> u32 {
        self.consumer().load(Ordering::Acquire)
    }

    /// Entries submitted and not yet released
    pub fn in_flight(&self) -> u32 {
        let consumer = self.consumer_index();
        let producer = self.producer_index();
        producer.wrapping_sub(consumer)
    }

    /// Write the descriptor for `index`
    ///
    /// # Safety
    /// `index` must be inside the producer's reserved, unpublished window.
    pub(super) unsafe fn write_slot(&self, index: u32, desc: D) {
        self.descs
            .as_ptr()
            .add((index & self.mask) as usize)
            .write(desc);
    }

    /// Read the descriptor at `index`
    ///
    /// # Safety
    /// `index` must be inside the consumer's peeked, unreleased window.
    pub(super) unsafe fn read_slot(&self, index: u32) -> D {
        self.descs.as_ptr().add((index & self.mask) as usize).read()
    }
}

// Slot access is partitioned between the two endpoints by the index protocol.
unsafe impl<D: Descriptor> Send for RingShared<D> {}
unsafe impl<D: Descriptor> Sync for RingShared<D> {}
