//! In-process dispatch table, used by the loopback host

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use log::debug;

use crate::{
    error::{FrameRingError, Result},
    socket::SocketHandle,
};

use super::DispatchTable;

/// Queue id to socket map guarded by a reader/writer lock
///
/// Deliveries run under the read lock via [`with_route`](Self::with_route),
/// so once `remove` returns no delivery to the removed socket is in progress
/// and none will start.
#[derive(Debug)]
pub struct InMemoryDispatchTable {
    name: String,
    max_entries: u32,
    /// `None` once the owner has destroyed the table
    entries: RwLock<Option<HashMap<u32, SocketHandle>>>,
}

impl InMemoryDispatchTable {
    /// Create a table accepting queue ids below `max_entries`
    pub fn new(name: impl Into<String>, max_entries: u32) -> Self {
        Self {
            name: name.into(),
            max_entries,
            entries: RwLock::new(Some(HashMap::new())),
        }
    }

    /// Tear the table down; later updates fail as if it never existed
    pub fn destroy(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        *entries = None;
    }

    /// Whether the table still exists
    pub fn exists(&self) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Socket currently routed for `queue_id`
    pub fn lookup(&self, queue_id: u32) -> Option<SocketHandle> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|map| map.get(&queue_id).copied())
    }

    /// Number of routed queues
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, HashMap::len)
    }

    /// Whether no queue is routed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `deliver` only while `queue_id` routes to `handle`, holding the route stable
    pub fn with_route<R>(
        &self,
        queue_id: u32,
        handle: SocketHandle,
        deliver: impl FnOnce() -> R,
    ) -> Option<R> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.as_ref().and_then(|map| map.get(&queue_id)) {
            Some(&routed) if routed == handle => Some(deliver()),
            _ => None,
        }
    }
}

impl DispatchTable for InMemoryDispatchTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&self, queue_id: u32, handle: SocketHandle) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let map = entries.as_mut().ok_or_else(|| {
            FrameRingError::registration(queue_id, format!("dispatch table {} does not exist", self.name))
        })?;

        if queue_id >= self.max_entries {
            return Err(FrameRingError::registration(
                queue_id,
                format!(
                    "update rejected: {} holds {} entries",
                    self.name, self.max_entries
                ),
            ));
        }

        if let Some(previous) = map.insert(queue_id, handle) {
            debug!("{}[{}]: {} replaced by {}", self.name, queue_id, previous, handle);
        }
        Ok(())
    }

    fn remove(&self, queue_id: u32, handle: SocketHandle) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(map) = entries.as_mut() {
            if map.get(&queue_id) == Some(&handle) {
                map.remove(&queue_id);
            }
        }
        Ok(())
    }
}
