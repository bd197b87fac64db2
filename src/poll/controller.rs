//! Poll loop state machine
//!
//! ```text
//! Idle -> Priming -> Polling -> Draining -> ShuttingDown -> Terminated
//! ```
//!
//! Every exit from `run`, including faults, goes through [`PollLoop::shutdown`],
//! which unregisters the dispatch entry, takes every frame back from the rings
//! and releases the pool.

use std::{fmt, sync::Arc, time::Duration};

use log::{debug, error, info, warn};

use crate::{
    config::{DesyncPolicy, XskConfig},
    dispatch::{DispatchRegistration, DispatchTable},
    error::{FrameRingError, Result},
    loopback::RingHost,
    ring::{FillDescriptor, RxDescriptor},
    socket::XskSocket,
    sync::CancellationToken,
    umem::FramePool,
};

use super::{
    processor::{BatchProcessor, ProcessResult, RxBatch},
    stats::{LoopReport, LoopStats, StopReason},
};

/// Lifecycle state of the poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Priming,
    Polling,
    Draining,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of a single polling iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Rx ring was empty
    Empty,
    /// Frames processed, released and refilled
    Processed(u32),
    /// Frames processed, and the processor asked to stop
    Stopped(u32),
    /// Frames processed, but the refill came up short; the shortfall is parked
    Resynced { processed: u32, parked: u32 },
}

/// Single-threaded consumer loop for one socket
#[derive(Debug)]
pub struct PollLoop {
    // Field order is release order on drop: dispatch entry, then socket
    // (rings before pool).
    registration: DispatchRegistration,
    socket: XskSocket,
    state: LoopState,
    batch_size: u32,
    idle_wait: Duration,
    policy: DesyncPolicy,
    stats: LoopStats,
    stop_reason: StopReason,
    rx_scratch: Vec<RxDescriptor>,
    addr_scratch: Vec<u64>,
    /// Frames pulled out of circulation by short refills, now in the pool
    parked: u32,
    consecutive_desyncs: u32,
}

impl PollLoop {
    /// Assemble a loop from an already registered socket
    pub fn new(socket: XskSocket, registration: DispatchRegistration, config: &XskConfig) -> Self {
        Self {
            registration,
            socket,
            state: LoopState::Idle,
            batch_size: config.batch_size,
            idle_wait: config.idle_wait(),
            policy: config.desync_policy,
            stats: LoopStats::default(),
            stop_reason: StopReason::Requested,
            rx_scratch: Vec::with_capacity(config.batch_size as usize),
            addr_scratch: Vec::new(),
            parked: 0,
            consecutive_desyncs: 0,
        }
    }

    /// Allocate the pool, attach rings, create the socket and register it
    ///
    /// A failure releases whatever was acquired so far, in reverse order.
    pub fn open(
        config: &XskConfig,
        host: &mut impl RingHost,
        table: Arc<dyn DispatchTable>,
    ) -> Result<Self> {
        config.validate()?;

        let pool = Arc::new(FramePool::from_config(config)?);
        let (rings, handle) = host.attach(&pool, config)?;
        let socket = XskSocket::new(pool, rings, handle, config.queue_id);
        let registration = DispatchRegistration::register(table, config.queue_id, handle)?;

        Ok(Self::new(socket, registration, config))
    }

    /// Current state
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Counters so far
    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    /// The socket
    pub fn socket(&self) -> &XskSocket {
        &self.socket
    }

    /// The socket, for egress or direct ring access
    pub fn socket_mut(&mut self) -> &mut XskSocket {
        &mut self.socket
    }

    /// Frames parked in the pool awaiting a Fill slot
    pub fn parked(&self) -> u32 {
        self.parked
    }

    fn transition(&mut self, next: LoopState) {
        debug!("Poll loop {} -> {}", self.state, next);
        self.state = next;
    }

    /// Hand the Fill ring its entire capacity in one submit
    pub fn prime(&mut self) -> Result<u32> {
        if self.state != LoopState::Idle {
            return Err(FrameRingError::invalid_parameter(
                "state",
                format!("cannot prime from {}", self.state),
            ));
        }
        self.transition(LoopState::Priming);

        let (rings, pool) = self.socket.split_mut();
        let capacity = rings.fill.capacity();
        let (granted, start) = rings.fill.reserve(capacity);
        if granted < capacity {
            rings.fill.cancel(granted)?;
            return Err(FrameRingError::priming(capacity, granted));
        }

        self.addr_scratch.clear();
        let frames = pool.alloc_frames(capacity as usize, &mut self.addr_scratch) as u32;
        if frames < capacity {
            pool.free_frames(self.addr_scratch.drain(..))?;
            rings.fill.cancel(granted)?;
            return Err(FrameRingError::priming(capacity, frames));
        }

        for (i, &addr) in self.addr_scratch.iter().enumerate() {
            rings
                .fill
                .write(start.wrapping_add(i as u32), FillDescriptor { addr })?;
        }
        rings.fill.submit(granted)?;

        info!(
            "Primed fill ring of {} with {} frames ({} free)",
            self.socket.handle(),
            granted,
            self.socket.pool().free_count()
        );
        self.transition(LoopState::Polling);
        Ok(granted)
    }

    /// One polling iteration: peek, process, release, refill
    pub fn poll_once(&mut self, processor: &mut impl BatchProcessor) -> Result<PollOutcome> {
        if self.state != LoopState::Polling {
            return Err(FrameRingError::invalid_parameter(
                "state",
                format!("cannot poll from {}", self.state),
            ));
        }

        let outcome = self.poll_batch(processor)?;
        if self.parked > 0 {
            self.top_up_parked()?;
        }
        Ok(outcome)
    }

    fn poll_batch(&mut self, processor: &mut impl BatchProcessor) -> Result<PollOutcome> {
        let (rings, pool) = self.socket.split_mut();
        let (available, start) = rings.rx.peek(self.batch_size);
        if available == 0 {
            return Ok(PollOutcome::Empty);
        }

        self.rx_scratch.clear();
        for i in 0..available {
            self.rx_scratch.push(rings.rx.read(start.wrapping_add(i))?);
        }

        // Entries are peeked and unreleased, so the source is done with them.
        let batch = match unsafe { RxBatch::new(&self.rx_scratch, pool) } {
            Ok(batch) => batch,
            Err(e) => {
                // Left unconsumed for the shutdown drain to return.
                rings.rx.cancel(available)?;
                return Err(e);
            }
        };
        let result = processor.process_batch(&batch);
        let bytes = batch.total_bytes();

        rings.rx.release(available)?;
        self.stats.record_batch(available, bytes);

        let (granted, fill_start) = rings.fill.reserve(available);
        for (i, desc) in self.rx_scratch.iter().take(granted as usize).enumerate() {
            rings.fill.write(
                fill_start.wrapping_add(i as u32),
                FillDescriptor {
                    addr: pool.frame_base(desc.addr)?,
                },
            )?;
        }
        rings.fill.submit(granted)?;

        if granted < available {
            let short = available - granted;
            for desc in &self.rx_scratch[granted as usize..] {
                pool.free_frame(pool.frame_base(desc.addr)?)?;
            }
            let outcome = self.handle_desync(available, short)?;
            if result == ProcessResult::Stop {
                return Ok(PollOutcome::Stopped(available));
            }
            return Ok(outcome);
        }

        self.consecutive_desyncs = 0;
        debug!("Processed batch of {} frames ({} bytes)", available, bytes);

        Ok(match result {
            ProcessResult::Continue => PollOutcome::Processed(available),
            ProcessResult::Stop => PollOutcome::Stopped(available),
        })
    }

    fn handle_desync(&mut self, processed: u32, short: u32) -> Result<PollOutcome> {
        self.stats.desyncs += 1;
        self.consecutive_desyncs += 1;
        self.parked += short;

        let fault = FrameRingError::desync(
            "fill",
            format!("refill granted {} of {} frames", processed - short, processed),
        );

        match self.policy {
            DesyncPolicy::Fatal => Err(fault),
            DesyncPolicy::Resync { max_consecutive } if self.consecutive_desyncs > max_consecutive => {
                error!(
                    "{} consecutive desyncs on {}, giving up",
                    self.consecutive_desyncs,
                    self.socket.handle()
                );
                Err(fault)
            }
            DesyncPolicy::Resync { .. } => {
                warn!("{}; parked {} frames in the pool", fault, self.parked);
                Ok(PollOutcome::Resynced {
                    processed,
                    parked: short,
                })
            }
        }
    }

    /// Move parked frames back onto the Fill ring if frames went missing from circulation
    fn top_up_parked(&mut self) -> Result<()> {
        let (rings, pool) = self.socket.split_mut();
        // Fill before Rx: the source publishes on Rx before releasing Fill,
        // so a frame in transit is counted at least once.
        let fill_held = rings.fill.in_flight();
        let circulating = fill_held + rings.rx.in_flight();
        let deficit = rings.fill.capacity().saturating_sub(circulating);
        let space = rings.fill.free_space(deficit).min(deficit).min(self.parked);
        if space == 0 {
            return Ok(());
        }

        self.addr_scratch.clear();
        pool.alloc_frames(space as usize, &mut self.addr_scratch);
        let (granted, start) = rings.fill.reserve(self.addr_scratch.len() as u32);
        for (i, &addr) in self.addr_scratch.iter().take(granted as usize).enumerate() {
            rings
                .fill
                .write(start.wrapping_add(i as u32), FillDescriptor { addr })?;
        }
        rings.fill.submit(granted)?;
        pool.free_frames(self.addr_scratch.drain(granted as usize..))?;

        self.parked -= granted;
        self.stats.resynced += granted as u64;
        if granted > 0 {
            info!("Returned {} parked frames to the fill ring", granted);
        }
        Ok(())
    }

    /// Prime if needed, poll until cancelled or stopped, then shut down
    ///
    /// A fault is reported after the shutdown has released everything.
    pub fn run(
        mut self,
        processor: &mut impl BatchProcessor,
        cancel: &CancellationToken,
    ) -> Result<LoopReport> {
        let fault = self.poll_until_stopped(processor, cancel).err();
        if let Some(e) = &fault {
            error!("Poll loop on {} failed: {}", self.socket.handle(), e);
            self.stop_reason = StopReason::Fault;
        }

        let report = self.shutdown();
        match fault {
            Some(e) => Err(e),
            None => report,
        }
    }

    fn poll_until_stopped(
        &mut self,
        processor: &mut impl BatchProcessor,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.state == LoopState::Idle {
            self.prime()?;
        }

        loop {
            if cancel.is_cancelled() {
                self.stop_reason = StopReason::Cancelled;
                return Ok(());
            }

            match self.poll_once(processor)? {
                PollOutcome::Processed(_) => {}
                PollOutcome::Stopped(_) => {
                    self.stop_reason = StopReason::Processor;
                    return Ok(());
                }
                PollOutcome::Empty => {
                    self.stats.idle_waits += 1;
                    if cancel.wait_timeout(self.idle_wait) {
                        self.stop_reason = StopReason::Cancelled;
                        return Ok(());
                    }
                }
                PollOutcome::Resynced { .. } => {
                    if cancel.wait_timeout(self.idle_wait) {
                        self.stop_reason = StopReason::Cancelled;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Release at most one batch of Rx entries unprocessed, returning their frames to the pool
    ///
    /// Entries still peeked from an aborted iteration are rewound and drained
    /// first. Every released entry is returned even if one of them is
    /// malformed; the first bad address is reported afterwards.
    fn drain_rx(&mut self) -> Result<u32> {
        let (rings, pool) = self.socket.split_mut();
        let stale = rings.rx.peeked();
        rings.rx.cancel(stale)?;

        let (available, start) = rings.rx.peek(self.batch_size);
        self.rx_scratch.clear();
        for i in 0..available {
            self.rx_scratch.push(rings.rx.read(start.wrapping_add(i))?);
        }
        rings.rx.release(available)?;
        self.stats.drained += available as u64;

        let mut first_error = None;
        for desc in &self.rx_scratch {
            if let Err(e) = pool.frame_base(desc.addr).and_then(|base| pool.free_frame(base)) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(available),
        }
    }

    /// Drain, unregister, empty the rings and release the pool
    ///
    /// Runs every step even when an earlier one fails; the first failure is
    /// returned after the pool is released.
    pub fn shutdown(mut self) -> Result<LoopReport> {
        let mut first_error: Option<FrameRingError> = None;

        if self.state == LoopState::Polling {
            self.transition(LoopState::Draining);
            match self.drain_rx() {
                Ok(0) => {}
                Ok(n) => info!("Drained {} unprocessed rx entries", n),
                Err(e) => {
                    warn!("Rx drain failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        self.transition(LoopState::ShuttingDown);

        let PollLoop {
            registration,
            mut socket,
            stats,
            stop_reason,
            ..
        } = self;

        let detached = match registration.unregister() {
            Ok(()) => true,
            Err(e) => {
                warn!("Unregistration failed: {}", e);
                first_error.get_or_insert(e);
                false
            }
        };

        // Reclaiming while the source may still be attached would race it.
        let recovered = if detached {
            socket.reclaim_all().unwrap_or_else(|e| {
                warn!("Ring reclaim failed: {}", e);
                first_error.get_or_insert(e);
                0
            })
        } else {
            0
        };

        let occupancy = socket.occupancy();
        let pool = Arc::clone(socket.pool());
        drop(socket);

        let pool_stats = pool.stats();
        let pool_released = match Arc::try_unwrap(pool) {
            Ok(pool) => {
                pool.release();
                true
            }
            Err(pool) => {
                warn!(
                    "Frame pool still has {} other owners, leaving it mapped",
                    Arc::strong_count(&pool) - 1
                );
                false
            }
        };

        info!(
            "Poll loop terminated ({}): {} frames in {} batches, {} recovered",
            stop_reason, stats.frames, stats.batches, recovered
        );

        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(LoopReport {
            state: LoopState::Terminated,
            stop_reason,
            stats,
            occupancy,
            pool: pool_stats,
            recovered,
            pool_released,
        })
    }
}
