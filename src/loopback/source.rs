//! Simulated packet source holding the far ends of a socket's rings

use std::{
    sync::{Arc, Weak},
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, trace};

use crate::{
    dispatch::InMemoryDispatchTable,
    error::Result,
    ring::{CompletionDescriptor, RxDescriptor},
    socket::{PeerRings, RingOccupancy, SocketHandle},
    sync::CancellationToken,
    umem::FramePool,
};

/// Source-side counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Packets written into frames and published on Rx
    pub delivered: u64,
    /// Packets dropped for lack of a Fill entry or Rx slot
    pub dropped_no_frame: u64,
    /// Packets dropped because the queue was not routed to this socket
    pub dropped_unrouted: u64,
    /// Packets cut to the frame room
    pub truncated: u64,
    /// Tx entries moved to the Completion ring
    pub completed: u64,
}

/// Traffic generator settings
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Packet written into every frame
    pub payload: Vec<u8>,
    /// Packets offered per delivery
    pub burst: usize,
    /// Pause when nothing could be delivered
    pub backoff: Duration,
    /// Stop after this many packets are delivered
    pub limit: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            payload: vec![0xab; 64],
            burst: 32,
            backoff: Duration::from_micros(100),
            limit: None,
        }
    }
}

/// The privileged side of one socket's rings
///
/// Holds the pool weakly: it can only write frames while the consumer keeps
/// the pool alive, and only while the dispatch table routes its queue here.
#[derive(Debug)]
pub struct LoopbackSource {
    pool: Weak<FramePool>,
    rings: PeerRings,
    table: Arc<InMemoryDispatchTable>,
    queue_id: u32,
    handle: SocketHandle,
    stats: SourceStats,
}

impl LoopbackSource {
    pub(crate) fn new(
        pool: Weak<FramePool>,
        rings: PeerRings,
        table: Arc<InMemoryDispatchTable>,
        queue_id: u32,
        handle: SocketHandle,
    ) -> Self {
        Self {
            pool,
            rings,
            table,
            queue_id,
            handle,
            stats: SourceStats::default(),
        }
    }

    /// Socket this source delivers to
    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    /// Queue this source serves
    pub fn queue_id(&self) -> u32 {
        self.queue_id
    }

    /// Counters so far
    pub fn stats(&self) -> SourceStats {
        self.stats
    }

    /// Ring occupancy seen from this side
    pub fn occupancy(&self) -> RingOccupancy {
        self.rings.occupancy()
    }

    /// Whether the consumer's pool is still alive
    pub fn pool_alive(&self) -> bool {
        self.pool.strong_count() > 0
    }

    /// Deliver packets into frames taken from the Fill ring
    ///
    /// Returns the number delivered. Packets beyond the Fill entries or Rx
    /// slots available are dropped, as are all packets while the queue is not
    /// routed to this socket.
    pub fn deliver(&mut self, packets: &[&[u8]]) -> Result<u32> {
        let table = Arc::clone(&self.table);
        match table.with_route(self.queue_id, self.handle, || self.deliver_routed(packets)) {
            Some(delivered) => delivered,
            None => {
                self.stats.dropped_unrouted += packets.len() as u64;
                Ok(0)
            }
        }
    }

    fn deliver_routed(&mut self, packets: &[&[u8]]) -> Result<u32> {
        let pool = match self.pool.upgrade() {
            Some(pool) => pool,
            None => {
                self.stats.dropped_unrouted += packets.len() as u64;
                return Ok(0);
            }
        };

        let wanted = packets.len().min(u32::MAX as usize) as u32;
        let rx_space = self.rings.rx.free_space(wanted).min(wanted);
        let (frames, fill_start) = self.rings.fill.peek(rx_space);
        let (granted, rx_start) = self.rings.rx.reserve(frames);

        let headroom = pool.headroom();
        let room = (pool.frame_size() - headroom) as usize;
        for i in 0..granted {
            let fill = self.rings.fill.read(fill_start.wrapping_add(i))?;
            let packet = packets[i as usize];
            if packet.len() > room {
                self.stats.truncated += 1;
            }
            let len = packet.len().min(room);
            let addr = fill.addr + headroom as u64;

            // Peeked from Fill and not yet on Rx: this side owns the frame.
            unsafe { pool.frame_mut(addr, len as u32)? }.copy_from_slice(&packet[..len]);
            self.rings.rx.write(
                rx_start.wrapping_add(i),
                RxDescriptor {
                    addr,
                    len: len as u32,
                    options: 0,
                },
            )?;
        }

        // Publish before releasing Fill so the frames never look absent to the consumer.
        self.rings.rx.submit(granted)?;
        self.rings.fill.release(granted)?;

        self.stats.delivered += granted as u64;
        self.stats.dropped_no_frame += (wanted - granted) as u64;
        if granted > 0 {
            trace!("{} delivered {} packets", self.handle, granted);
        }
        Ok(granted)
    }

    /// Addresses currently queued on the Fill ring, oldest first, left in place
    pub fn queued_fill(&mut self) -> Result<Vec<u64>> {
        let capacity = self.rings.fill.capacity();
        let (available, start) = self.rings.fill.peek(capacity);
        let addrs = (0..available)
            .map(|i| self.rings.fill.read(start.wrapping_add(i)).map(|d| d.addr))
            .collect::<Result<Vec<_>>>();
        self.rings.fill.cancel(available)?;
        addrs
    }

    /// Move up to `max` transmitted frames to the Completion ring
    ///
    /// Like delivery, this only runs while the queue is routed to this socket,
    /// so once unregistration returns the consumer owns its Tx ring again.
    pub fn complete_tx(&mut self, max: u32) -> Result<u32> {
        let table = Arc::clone(&self.table);
        table
            .with_route(self.queue_id, self.handle, || self.complete_tx_routed(max))
            .unwrap_or(Ok(0))
    }

    fn complete_tx_routed(&mut self, max: u32) -> Result<u32> {
        let space = self.rings.completion.free_space(max).min(max);
        let (available, tx_start) = self.rings.tx.peek(space);
        let (granted, comp_start) = self.rings.completion.reserve(available);

        for i in 0..granted {
            let desc = self.rings.tx.read(tx_start.wrapping_add(i))?;
            self.rings.completion.write(
                comp_start.wrapping_add(i),
                CompletionDescriptor { addr: desc.addr },
            )?;
        }

        self.rings.tx.release(granted)?;
        self.rings.completion.submit(granted)?;
        self.stats.completed += granted as u64;
        Ok(granted)
    }

    /// Run on a thread, delivering bursts until cancelled or the limit is hit
    ///
    /// The thread hands the source back when it stops.
    pub fn spawn_generator(
        mut self,
        config: GeneratorConfig,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<LoopbackSource>> {
        thread::spawn(move || {
            let burst = vec![config.payload.as_slice(); config.burst.max(1)];
            debug!("Generator for {} started", self.handle);

            while !cancel.is_cancelled() {
                let offered = match config.limit {
                    Some(limit) if self.stats.delivered >= limit => break,
                    Some(limit) => ((limit - self.stats.delivered) as usize).min(burst.len()),
                    None => burst.len(),
                };

                let delivered = self.deliver(&burst[..offered])?;
                self.complete_tx(offered as u32)?;
                if delivered == 0 && cancel.wait_timeout(config.backoff) {
                    break;
                }
            }

            debug!("Generator for {} stopped: {:?}", self.handle, self.stats);
            Ok(self)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::XskConfig, loopback::{LoopbackHost, RingHost}, umem::page_size};
    use crate::dispatch::DispatchTable;

    fn attach(frames: u32, ring: u32, headroom: u32) -> (Arc<FramePool>, crate::socket::UserRings, LoopbackSource) {
        let table = Arc::new(InMemoryDispatchTable::new("xsks_map", 4));
        let config = XskConfig::default()
            .with_frame_size(page_size() as u32)
            .with_frame_count(frames)
            .with_ring_size(ring)
            .with_batch_size(ring)
            .with_headroom(headroom);
        let pool = Arc::new(FramePool::from_config(&config).unwrap());
        let mut host = LoopbackHost::new(table.clone());
        let (user, handle) = host.attach(&pool, &config).unwrap();
        table.update(0, handle).unwrap();
        (pool, user, host.take_source().unwrap())
    }

    fn fill(pool: &FramePool, user: &mut crate::socket::UserRings, n: u32) {
        let mut addrs = Vec::new();
        pool.alloc_frames(n as usize, &mut addrs);
        let (granted, start) = user.fill.reserve(n);
        for i in 0..granted {
            user.fill
                .write(start + i, crate::ring::FillDescriptor { addr: addrs[i as usize] })
                .unwrap();
        }
        user.fill.submit(granted).unwrap();
    }

    #[test]
    fn test_deliver_writes_at_headroom() {
        let (pool, mut user, mut source) = attach(4, 4, 256);
        fill(&pool, &mut user, 2);

        assert_eq!(source.deliver(&[&b"hello"[..]]).unwrap(), 1);
        let (n, start) = user.rx.peek(4);
        assert_eq!(n, 1);
        let desc = user.rx.read(start).unwrap();
        assert_eq!(desc.addr, 256);
        assert_eq!(desc.len, 5);
        assert_eq!(unsafe { pool.frame(desc.addr, desc.len).unwrap() }, b"hello");
        assert_eq!(source.occupancy().fill, 1);
    }

    #[test]
    fn test_deliver_drops_without_fill_entries() {
        let (pool, mut user, mut source) = attach(4, 4, 0);
        fill(&pool, &mut user, 1);

        let packets: Vec<&[u8]> = vec![&b"a"[..], &b"b"[..], &b"c"[..]];
        assert_eq!(source.deliver(&packets).unwrap(), 1);
        assert_eq!(source.deliver(&packets).unwrap(), 0);
        assert_eq!(source.stats().delivered, 1);
        assert_eq!(source.stats().dropped_no_frame, 5);
    }

    #[test]
    fn test_deliver_requires_route() {
        let (pool, mut user, mut source) = attach(4, 4, 0);
        fill(&pool, &mut user, 2);
        source.table.remove(0, source.handle()).unwrap();

        assert_eq!(source.deliver(&[&b"x"[..]]).unwrap(), 0);
        assert_eq!(source.stats().dropped_unrouted, 1);
        assert_eq!(user.rx.in_flight(), 0);
    }

    #[test]
    fn test_tx_completion_requires_route() {
        let (pool, mut user, mut source) = attach(4, 4, 0);
        let addr = pool.alloc_frame().unwrap();
        let (granted, start) = user.tx.reserve(1);
        assert_eq!(granted, 1);
        user.tx
            .write(start, crate::ring::TxDescriptor { addr, len: 60, options: 0 })
            .unwrap();
        user.tx.submit(1).unwrap();

        source.table.remove(0, source.handle()).unwrap();
        assert_eq!(source.complete_tx(4).unwrap(), 0);
        assert_eq!(user.tx.in_flight(), 1);
        assert_eq!(user.completion.in_flight(), 0);
        assert_eq!(source.stats().completed, 0);

        source.table.update(0, source.handle()).unwrap();
        assert_eq!(source.complete_tx(4).unwrap(), 1);
        assert_eq!(user.completion.in_flight(), 1);
    }

    #[test]
    fn test_oversized_packet_truncated() {
        let (pool, mut user, mut source) = attach(2, 2, 0);
        fill(&pool, &mut user, 1);
        let big = vec![7u8; page_size() + 100];
        assert_eq!(source.deliver(&[big.as_slice()]).unwrap(), 1);
        assert_eq!(source.stats().truncated, 1);
        let (_, start) = user.rx.peek(1);
        assert_eq!(user.rx.read(start).unwrap().len, page_size() as u32);
    }

    #[test]
    fn test_generator_respects_limit() {
        let (pool, mut user, source) = attach(8, 8, 0);
        fill(&pool, &mut user, 8);

        let cancel = CancellationToken::new();
        let config = GeneratorConfig {
            limit: Some(5),
            ..GeneratorConfig::default()
        };
        let source = source.spawn_generator(config, cancel).join().unwrap().unwrap();
        assert_eq!(source.stats().delivered, 5);
        assert_eq!(user.rx.in_flight(), 5);
    }
}
