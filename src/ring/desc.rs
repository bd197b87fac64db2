//! Ring descriptor layouts
//!
//! Fill and Completion entries are a bare 8-byte frame address. Rx and Tx
//! entries carry an address, a 4-byte length and a 4-byte options field.

use std::fmt;

/// Which of the four rings a descriptor or ring belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RingKind {
    Fill,
    Completion,
    Rx,
    Tx,
}

impl RingKind {
    /// Lowercase ring name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            RingKind::Fill => "fill",
            RingKind::Completion => "completion",
            RingKind::Rx => "rx",
            RingKind::Tx => "tx",
        }
    }
}

impl fmt::Display for RingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fixed-width ring entry
pub trait Descriptor: Copy + Default + fmt::Debug + Send + 'static {
    /// The ring this descriptor travels on
    const KIND: RingKind;

    /// Frame address carried by the descriptor
    fn addr(&self) -> u64;
}

/// Empty frame handed to the packet source
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillDescriptor {
    pub addr: u64,
}

/// Transmitted frame handed back by the packet source
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionDescriptor {
    pub addr: u64,
}

/// Received packet: frame address (including headroom), length and options
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxDescriptor {
    pub addr: u64,
    pub len: u32,
    pub options: u32,
}

/// Packet queued for transmission
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxDescriptor {
    pub addr: u64,
    pub len: u32,
    pub options: u32,
}

const _: () = assert!(std::mem::size_of::<FillDescriptor>() == 8);
const _: () = assert!(std::mem::size_of::<CompletionDescriptor>() == 8);
const _: () = assert!(std::mem::size_of::<RxDescriptor>() == 16);
const _: () = assert!(std::mem::size_of::<TxDescriptor>() == 16);

impl Descriptor for FillDescriptor {
    const KIND: RingKind = RingKind::Fill;

    fn addr(&self) -> u64 {
        self.addr
    }
}

impl Descriptor for CompletionDescriptor {
    const KIND: RingKind = RingKind::Completion;

    fn addr(&self) -> u64 {
        self.addr
    }
}

impl Descriptor for RxDescriptor {
    const KIND: RingKind = RingKind::Rx;

    fn addr(&self) -> u64 {
        self.addr
    }
}

impl Descriptor for TxDescriptor {
    const KIND: RingKind = RingKind::Tx;

    fn addr(&self) -> u64 {
        self.addr
    }
}
