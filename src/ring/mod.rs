//! Single-producer/single-consumer descriptor rings
//!
//! One engine, four instances: Fill and Tx are produced by the consumer
//! process and consumed by the packet source, Rx and Completion the other
//! way round. Each ring is split into exactly one [`RingProducer`] and one
//! [`RingConsumer`]; the monotonic producer/consumer index pair is the only
//! state the two ends share.
//!
//! ```text
//!   reserve ──► write ──► submit          peek ──► read ──► release
//!        producer index (Release) ─────────► (Acquire)
//!        (Acquire) ◄───────── consumer index (Release)
//! ```

pub mod desc;
pub mod endpoint;
pub mod shared;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::error::Result;

pub use desc::{
    CompletionDescriptor, Descriptor, FillDescriptor, RingKind, RxDescriptor, TxDescriptor,
};
pub use endpoint::{RingConsumer, RingProducer};
pub use shared::{RingHeader, RingIndex, RingShared};

/// Split a ring into its two ends
pub fn split<D: Descriptor>(ring: RingShared<D>) -> (RingProducer<D>, RingConsumer<D>) {
    let ring = Arc::new(ring);
    (RingProducer::new(Arc::clone(&ring)), RingConsumer::new(ring))
}

/// Create a heap-backed ring and split it
pub fn ring_pair<D: Descriptor>(capacity: u32) -> Result<(RingProducer<D>, RingConsumer<D>)> {
    Ok(split(RingShared::new(capacity)?))
}
