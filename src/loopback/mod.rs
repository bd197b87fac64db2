//! In-process packet source
//!
//! Stands in for the privileged side of the ring protocol: provisions the
//! four rings for a socket and keeps the source's ends, delivering packets
//! Fill -> Rx and completing Tx -> Completion.

pub mod source;

use std::sync::Arc;

use log::debug;

use crate::{
    config::XskConfig,
    dispatch::InMemoryDispatchTable,
    error::Result,
    socket::{create_rings, SocketHandle, UserRings},
    umem::FramePool,
};

pub use source::{GeneratorConfig, LoopbackSource, SourceStats};

/// Provider of a socket's rings
pub trait RingHost {
    /// Create the four rings for `pool` and return the consumer's ends
    fn attach(&mut self, pool: &Arc<FramePool>, config: &XskConfig) -> Result<(UserRings, SocketHandle)>;
}

/// Ring host that keeps the source ends in process
#[derive(Debug)]
pub struct LoopbackHost {
    table: Arc<InMemoryDispatchTable>,
    next_handle: i32,
    pending: Vec<LoopbackSource>,
}

impl LoopbackHost {
    /// Host whose sources route through `table`
    pub fn new(table: Arc<InMemoryDispatchTable>) -> Self {
        Self {
            table,
            next_handle: 3,
            pending: Vec::new(),
        }
    }

    /// The dispatch table sources consult
    pub fn table(&self) -> &Arc<InMemoryDispatchTable> {
        &self.table
    }

    /// Take the source for the most recently attached socket
    pub fn take_source(&mut self) -> Option<LoopbackSource> {
        self.pending.pop()
    }
}

impl RingHost for LoopbackHost {
    fn attach(&mut self, pool: &Arc<FramePool>, config: &XskConfig) -> Result<(UserRings, SocketHandle)> {
        let (user, peer) = create_rings(config)?;
        let handle = SocketHandle(self.next_handle);
        self.next_handle += 1;

        debug!("Loopback host attached {} to queue {}", handle, config.queue_id);
        self.pending.push(LoopbackSource::new(
            Arc::downgrade(pool),
            peer,
            Arc::clone(&self.table),
            config.queue_id,
            handle,
        ));
        Ok((user, handle))
    }
}
