//! The four rings of one socket, split into the consumer's ends and the packet source's ends

use crate::{
    config::XskConfig,
    error::Result,
    ring::{
        ring_pair, CompletionDescriptor, FillDescriptor, RingConsumer, RingProducer,
        RxDescriptor, TxDescriptor,
    },
};

/// Ring ends held by the consumer process
#[derive(Debug)]
pub struct UserRings {
    /// Empty frames handed to the source
    pub fill: RingProducer<FillDescriptor>,
    /// Transmitted frames handed back
    pub completion: RingConsumer<CompletionDescriptor>,
    /// Received packets
    pub rx: RingConsumer<RxDescriptor>,
    /// Packets to transmit
    pub tx: RingProducer<TxDescriptor>,
}

/// Ring ends held by the packet source
#[derive(Debug)]
pub struct PeerRings {
    pub fill: RingConsumer<FillDescriptor>,
    pub completion: RingProducer<CompletionDescriptor>,
    pub rx: RingProducer<RxDescriptor>,
    pub tx: RingConsumer<TxDescriptor>,
}

/// Entries in flight on each ring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingOccupancy {
    pub fill: u32,
    pub completion: u32,
    pub rx: u32,
    pub tx: u32,
}

impl RingOccupancy {
    /// Frames lent to any ring
    pub fn total(&self) -> u32 {
        self.fill + self.completion + self.rx + self.tx
    }

    /// Whether every ring is empty
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl UserRings {
    /// Current occupancy
    pub fn occupancy(&self) -> RingOccupancy {
        RingOccupancy {
            fill: self.fill.in_flight(),
            completion: self.completion.in_flight(),
            rx: self.rx.in_flight(),
            tx: self.tx.in_flight(),
        }
    }
}

impl PeerRings {
    /// Current occupancy, as seen from the source side
    pub fn occupancy(&self) -> RingOccupancy {
        RingOccupancy {
            fill: self.fill.in_flight(),
            completion: self.completion.in_flight(),
            rx: self.rx.in_flight(),
            tx: self.tx.in_flight(),
        }
    }
}

/// Create all four rings with the configured capacities
pub fn create_rings(config: &XskConfig) -> Result<(UserRings, PeerRings)> {
    let (fill_prod, fill_cons) = ring_pair::<FillDescriptor>(config.fill_ring_size)?;
    let (comp_prod, comp_cons) = ring_pair::<CompletionDescriptor>(config.completion_ring_size)?;
    let (rx_prod, rx_cons) = ring_pair::<RxDescriptor>(config.rx_ring_size)?;
    let (tx_prod, tx_cons) = ring_pair::<TxDescriptor>(config.tx_ring_size)?;

    Ok((
        UserRings {
            fill: fill_prod,
            completion: comp_cons,
            rx: rx_cons,
            tx: tx_prod,
        },
        PeerRings {
            fill: fill_cons,
            completion: comp_prod,
            rx: rx_prod,
            tx: tx_cons,
        },
    ))
}
