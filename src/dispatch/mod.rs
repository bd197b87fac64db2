//! Dispatch registration
//!
//! The packet source routes frames through an externally owned table keyed by
//! queue id. This core never creates that table; it writes one entry per
//! queue when a socket is registered and clears it when the registration is
//! dropped.

pub mod memory;
#[cfg(target_os = "linux")]
pub mod pinned;

use std::{fmt, sync::Arc};

use log::{info, warn};

use crate::{error::Result, socket::SocketHandle};

pub use memory::InMemoryDispatchTable;
#[cfg(target_os = "linux")]
pub use pinned::PinnedXskMap;

/// Externally owned queue id to socket map
pub trait DispatchTable: Send + Sync + fmt::Debug {
    /// Name for logs
    fn name(&self) -> &str;

    /// Route `queue_id` to `handle`, replacing any previous entry
    fn update(&self, queue_id: u32, handle: SocketHandle) -> Result<()>;

    /// Clear the entry for `queue_id`; tables that can tell should leave
    /// entries belonging to another handle alone
    fn remove(&self, queue_id: u32, handle: SocketHandle) -> Result<()>;
}

/// A live table entry; dropping it unregisters the socket
#[derive(Debug)]
pub struct DispatchRegistration {
    table: Arc<dyn DispatchTable>,
    queue_id: u32,
    handle: SocketHandle,
    active: bool,
}

impl DispatchRegistration {
    /// Register `handle` under `queue_id`; last registration for a key wins
    pub fn register(
        table: Arc<dyn DispatchTable>,
        queue_id: u32,
        handle: SocketHandle,
    ) -> Result<Self> {
        table.update(queue_id, handle)?;
        info!(
            "Socket {} registered in {}[{}]",
            handle,
            table.name(),
            queue_id
        );

        Ok(Self {
            table,
            queue_id,
            handle,
            active: true,
        })
    }

    /// Queue id of the entry
    pub fn queue_id(&self) -> u32 {
        self.queue_id
    }

    /// Registered socket
    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    /// The table written to
    pub fn table(&self) -> &Arc<dyn DispatchTable> {
        &self.table
    }

    /// Clear the entry now, reporting failure
    pub fn unregister(mut self) -> Result<()> {
        self.active = false;
        self.table.remove(self.queue_id, self.handle)?;
        info!(
            "Socket {} unregistered from {}[{}]",
            self.handle,
            self.table.name(),
            self.queue_id
        );
        Ok(())
    }
}

impl Drop for DispatchRegistration {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(e) = self.table.remove(self.queue_id, self.handle) {
            warn!(
                "Failed to unregister socket {} from {}[{}]: {}",
                self.handle,
                self.table.name(),
                self.queue_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameRingError;

    #[test]
    fn test_registration_is_scoped() {
        let table = Arc::new(InMemoryDispatchTable::new("xsks_map", 4));
        {
            let _reg =
                DispatchRegistration::register(table.clone(), 1, SocketHandle(10)).unwrap();
            assert_eq!(table.lookup(1), Some(SocketHandle(10)));
        }
        assert_eq!(table.lookup(1), None);
    }

    #[test]
    fn test_last_registration_wins() {
        let table = Arc::new(InMemoryDispatchTable::new("xsks_map", 4));
        let first = DispatchRegistration::register(table.clone(), 0, SocketHandle(1)).unwrap();
        let second = DispatchRegistration::register(table.clone(), 0, SocketHandle(2)).unwrap();
        assert_eq!(table.lookup(0), Some(SocketHandle(2)));

        // The replaced registration must not clear its successor's entry
        first.unregister().unwrap();
        assert_eq!(table.lookup(0), Some(SocketHandle(2)));

        drop(second);
        assert_eq!(table.lookup(0), None);
    }

    #[test]
    fn test_missing_table_fails_registration() {
        let table = Arc::new(InMemoryDispatchTable::new("xsks_map", 4));
        table.destroy();
        let err = DispatchRegistration::register(table, 0, SocketHandle(1)).unwrap_err();
        assert!(matches!(err, FrameRingError::Registration { queue_id: 0, .. }));
    }

    #[test]
    fn test_rejected_update_fails_registration() {
        let table = Arc::new(InMemoryDispatchTable::new("xsks_map", 2));
        let err = DispatchRegistration::register(table, 5, SocketHandle(1)).unwrap_err();
        assert!(matches!(err, FrameRingError::Registration { queue_id: 5, .. }));
    }
}
