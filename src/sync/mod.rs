//! Synchronization primitives for the poll loop

pub mod cancel;

pub use cancel::CancellationToken;
