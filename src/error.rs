//! Error types and handling for framering

/// Result type alias for framering operations
pub type Result<T> = std::result::Result<T, FrameRingError>;

/// Error taxonomy for the frame pool, rings, dispatch registration and poll loop
#[derive(Debug, thiserror::Error)]
pub enum FrameRingError {
    /// Frame pool memory could not be reserved or is misaligned
    #[error("Allocation error: {message}")]
    Allocation { message: String },

    /// Ring setup failed
    #[error("Ring creation error ({ring}): {message}")]
    RingCreation { ring: String, message: String },

    /// Dispatch table missing or update rejected
    #[error("Registration error for queue {queue_id}: {message}")]
    Registration { queue_id: u32, message: String },

    /// Fill ring could not be fully supplied at startup
    #[error("Priming error: requested {requested} fill entries, granted {granted}")]
    Priming { requested: u32, granted: u32 },

    /// Reserve/release counts disagree with the frame pool invariant
    #[error("Protocol desync on {ring} ring: {message}")]
    ProtocolDesync { ring: String, message: String },

    /// Address or index translation failure
    #[error("Out of range: {what} {value:#x} (limit {limit:#x})")]
    OutOfRange { what: &'static str, value: u64, limit: u64 },

    /// Invalid parameters or configuration
    #[error("Invalid parameter: {parameter} - {message}")]
    InvalidParameter { parameter: String, message: String },

    /// I/O related errors (file operations, mmap, config files)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Platform-specific errors
    #[error("Platform error: {message}")]
    Platform { message: String },
}

impl FrameRingError {
    /// Create an I/O error from a standard I/O error
    pub fn from_io(source: std::io::Error, context: &str) -> Self {
        Self::Io {
            message: format!("{}: {}", context, source),
            source: Some(source),
        }
    }

    /// Create an allocation error
    pub fn allocation(message: impl Into<String>) -> Self {
        Self::Allocation {
            message: message.into(),
        }
    }

    /// Create a ring creation error
    pub fn ring_creation(ring: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RingCreation {
            ring: ring.into(),
            message: message.into(),
        }
    }

    /// Create a registration error
    pub fn registration(queue_id: u32, message: impl Into<String>) -> Self {
        Self::Registration {
            queue_id,
            message: message.into(),
        }
    }

    /// Create a priming error
    pub fn priming(requested: u32, granted: u32) -> Self {
        Self::Priming { requested, granted }
    }

    /// Create a protocol desync error
    pub fn desync(ring: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProtocolDesync {
            ring: ring.into(),
            message: message.into(),
        }
    }

    /// Create an out of range error
    pub fn out_of_range(what: &'static str, value: u64, limit: u64) -> Self {
        Self::OutOfRange { what, value, limit }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }

    /// Errors that abort startup before the loop reaches polling
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::Allocation { .. }
                | Self::RingCreation { .. }
                | Self::Registration { .. }
                | Self::Priming { .. }
                | Self::InvalidParameter { .. }
        )
    }

    /// Errors a hardened consumer may survive by resynchronizing
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ProtocolDesync { .. })
    }
}

impl From<std::io::Error> for FrameRingError {
    fn from(err: std::io::Error) -> Self {
        Self::from_io(err, "I/O operation failed")
    }
}

impl From<serde_json::Error> for FrameRingError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_parameter("config", format!("JSON error: {}", err))
    }
}
