//! Socket, ring and poll loop configuration

use std::{path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::{FrameRingError, Result},
    umem::region::page_size,
};

/// Default frame size in bytes
pub const DEFAULT_FRAME_SIZE: u32 = 4096;

/// Default number of frames in the pool
pub const DEFAULT_FRAME_COUNT: u32 = 4096;

/// Default capacity of each of the four rings
pub const DEFAULT_RING_SIZE: u32 = 4096;

/// Default Rx batch size per poll iteration
pub const DEFAULT_BATCH_SIZE: u32 = 64;

/// Default idle wait when the Rx ring is empty (1ms)
pub const DEFAULT_IDLE_WAIT_US: u64 = 1000;

/// Largest ring capacity representable with 32-bit monotonic indices
pub const MAX_RING_SIZE: u32 = 1 << 31;

/// Backing memory for the frame region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackingType {
    /// Private anonymous mapping
    Anonymous,
    /// Anonymous memory file descriptor that a peer process can map
    #[cfg(target_os = "linux")]
    MemFd,
    /// Regular file mapping
    File { path: PathBuf },
}

impl Default for BackingType {
    fn default() -> Self {
        Self::Anonymous
    }
}

impl BackingType {
    /// Get a human-readable name for the backing type
    pub fn name(&self) -> &'static str {
        match self {
            BackingType::Anonymous => "anonymous",
            #[cfg(target_os = "linux")]
            BackingType::MemFd => "memfd",
            BackingType::File { .. } => "file",
        }
    }
}

/// What the poll loop does when the Fill ring cannot take back every frame it just consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DesyncPolicy {
    /// Report a protocol desync and shut down
    Fatal,
    /// Park the frames, back off and top the Fill ring up later
    Resync { max_consecutive: u32 },
}

impl Default for DesyncPolicy {
    fn default() -> Self {
        Self::Fatal
    }
}

/// Configuration for the frame pool, the four rings and the poll loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XskConfig {
    /// Size of each frame in bytes (page-size multiple)
    pub frame_size: u32,
    /// Number of frames in the pool
    pub frame_count: u32,
    /// Fill ring capacity (power of two)
    pub fill_ring_size: u32,
    /// Completion ring capacity (power of two)
    pub completion_ring_size: u32,
    /// Rx ring capacity (power of two)
    pub rx_ring_size: u32,
    /// Tx ring capacity (power of two)
    pub tx_ring_size: u32,
    /// Bytes reserved at the start of each frame before packet data
    pub frame_headroom: u32,
    /// Receive queue the socket is bound to
    pub queue_id: u32,
    /// Interface the packet source is attached to
    pub interface: String,
    /// Maximum Rx entries handled per poll iteration
    pub batch_size: u32,
    /// Bounded wait when the Rx ring is empty, in microseconds
    pub idle_wait_us: u64,
    /// Steady-state desync handling
    pub desync_policy: DesyncPolicy,
    /// Backing memory for the frame region
    pub backing: BackingType,
}

impl Default for XskConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            frame_count: DEFAULT_FRAME_COUNT,
            fill_ring_size: DEFAULT_RING_SIZE,
            completion_ring_size: DEFAULT_RING_SIZE,
            rx_ring_size: DEFAULT_RING_SIZE,
            tx_ring_size: DEFAULT_RING_SIZE,
            frame_headroom: 0,
            queue_id: 0,
            interface: "lo".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            idle_wait_us: DEFAULT_IDLE_WAIT_US,
            desync_policy: DesyncPolicy::default(),
            backing: BackingType::default(),
        }
    }
}

impl XskConfig {
    /// Create a configuration for an interface and queue
    pub fn new(interface: impl Into<String>, queue_id: u32) -> Self {
        Self {
            interface: interface.into(),
            queue_id,
            ..Default::default()
        }
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FrameRingError::from_io(e, &format!("Failed to read config {}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Set frame size
    pub fn with_frame_size(mut self, size: u32) -> Self {
        self.frame_size = size;
        self
    }

    /// Set frame count
    pub fn with_frame_count(mut self, count: u32) -> Self {
        self.frame_count = count;
        self
    }

    /// Set all four ring sizes at once
    pub fn with_ring_size(mut self, size: u32) -> Self {
        self.fill_ring_size = size;
        self.completion_ring_size = size;
        self.rx_ring_size = size;
        self.tx_ring_size = size;
        self
    }

    /// Set Fill ring size
    pub fn with_fill_ring_size(mut self, size: u32) -> Self {
        self.fill_ring_size = size;
        self
    }

    /// Set Rx ring size
    pub fn with_rx_ring_size(mut self, size: u32) -> Self {
        self.rx_ring_size = size;
        self
    }

    /// Set frame headroom
    pub fn with_headroom(mut self, headroom: u32) -> Self {
        self.frame_headroom = headroom;
        self
    }

    /// Set batch size
    pub fn with_batch_size(mut self, batch: u32) -> Self {
        self.batch_size = batch;
        self
    }

    /// Set idle wait
    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait_us = wait.as_micros() as u64;
        self
    }

    /// Set desync policy
    pub fn with_desync_policy(mut self, policy: DesyncPolicy) -> Self {
        self.desync_policy = policy;
        self
    }

    /// Set backing memory
    pub fn with_backing(mut self, backing: BackingType) -> Self {
        self.backing = backing;
        self
    }

    /// Idle wait as a duration
    pub fn idle_wait(&self) -> Duration {
        Duration::from_micros(self.idle_wait_us)
    }

    /// Total size of the frame region in bytes
    pub fn region_size(&self) -> Option<usize> {
        (self.frame_size as usize).checked_mul(self.frame_count as usize)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let page = page_size();
        if self.frame_size == 0 || self.frame_size as usize % page != 0 {
            return Err(FrameRingError::invalid_parameter(
                "frame_size",
                format!("Frame size must be a non-zero multiple of the page size ({})", page),
            ));
        }

        if self.frame_count == 0 {
            return Err(FrameRingError::invalid_parameter(
                "frame_count",
                "Frame count cannot be zero",
            ));
        }

        if self.region_size().is_none() {
            return Err(FrameRingError::invalid_parameter(
                "frame_count",
                "Frame region size overflows",
            ));
        }

        for (name, size) in [
            ("fill_ring_size", self.fill_ring_size),
            ("completion_ring_size", self.completion_ring_size),
            ("rx_ring_size", self.rx_ring_size),
            ("tx_ring_size", self.tx_ring_size),
        ] {
            validate_ring_size(name, size)?;
        }

        if self.frame_headroom >= self.frame_size {
            return Err(FrameRingError::invalid_parameter(
                "frame_headroom",
                "Headroom must leave room for packet data",
            ));
        }

        if self.batch_size == 0 || self.batch_size > self.rx_ring_size {
            return Err(FrameRingError::invalid_parameter(
                "batch_size",
                "Batch size must be between 1 and the Rx ring size",
            ));
        }

        if self.interface.is_empty() {
            return Err(FrameRingError::invalid_parameter(
                "interface",
                "Interface identifier cannot be empty",
            ));
        }

        Ok(())
    }
}

/// Check a ring capacity: non-zero power of two that fits 32-bit indices
pub fn validate_ring_size(name: &str, size: u32) -> Result<()> {
    if size == 0 || !size.is_power_of_two() || size > MAX_RING_SIZE {
        return Err(FrameRingError::invalid_parameter(
            name,
            "Ring size must be a power of 2 between 1 and 2^31",
        ));
    }
    Ok(())
}

/// Builder pattern for socket configuration
pub struct XskConfigBuilder {
    config: XskConfig,
}

impl XskConfigBuilder {
    /// Create a new builder
    pub fn new(interface: impl Into<String>, queue_id: u32) -> Self {
        Self {
            config: XskConfig::new(interface, queue_id),
        }
    }

    /// Set frame size
    pub fn frame_size(mut self, size: u32) -> Self {
        self.config.frame_size = size;
        self
    }

    /// Set frame count
    pub fn frame_count(mut self, count: u32) -> Self {
        self.config.frame_count = count;
        self
    }

    /// Set Fill ring size
    pub fn fill_ring_size(mut self, size: u32) -> Self {
        self.config.fill_ring_size = size;
        self
    }

    /// Set Completion ring size
    pub fn completion_ring_size(mut self, size: u32) -> Self {
        self.config.completion_ring_size = size;
        self
    }

    /// Set Rx ring size
    pub fn rx_ring_size(mut self, size: u32) -> Self {
        self.config.rx_ring_size = size;
        self
    }

    /// Set Tx ring size
    pub fn tx_ring_size(mut self, size: u32) -> Self {
        self.config.tx_ring_size = size;
        self
    }

    /// Set frame headroom
    pub fn frame_headroom(mut self, headroom: u32) -> Self {
        self.config.frame_headroom = headroom;
        self
    }

    /// Set batch size
    pub fn batch_size(mut self, batch: u32) -> Self {
        self.config.batch_size = batch;
        self
    }

    /// Set idle wait
    pub fn idle_wait(mut self, wait: Duration) -> Self {
        self.config.idle_wait_us = wait.as_micros() as u64;
        self
    }

    /// Set desync policy
    pub fn desync_policy(mut self, policy: DesyncPolicy) -> Self {
        self.config.desync_policy = policy;
        self
    }

    /// Set backing memory
    pub fn backing(mut self, backing: BackingType) -> Self {
        self.config.backing = backing;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<XskConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
