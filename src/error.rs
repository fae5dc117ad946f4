//! Error handling for the GPU monitor crate.

/// A specialized `Result` type for GPU monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// The main error type for GPU monitor operations.
///
/// Errors are cloneable so that a failure recorded by the sampler can be
/// surfaced again on every later `stop()` call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    /// The hardware query facility failed
    #[error("GPU query failed: {0}")]
    Provider(String),

    /// A snapshot reported a different number of devices than the baseline
    #[error("Device count mismatch: expected {expected} devices, found {found}")]
    DeviceCountMismatch { expected: usize, found: usize },

    /// A snapshot reported devices in a different order than the baseline
    #[error("Device order mismatch at slot {slot}: expected {expected}, found {found}")]
    DeviceOrderMismatch {
        slot: usize,
        expected: String,
        found: String,
    },

    /// Results were requested while the sampler is still running
    #[error("GPU monitor is still running; call stop() first")]
    NotStopped,

    /// The sampler task could not be joined
    #[error("Sampler error: {0}")]
    Sampler(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider output could not be parsed
    #[error("Failed to parse GPU query output: {0}")]
    Parse(String),
}

impl MonitorError {
    /// Create a new provider error
    pub fn provider_error(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a new sampler error
    pub fn sampler_error(msg: impl Into<String>) -> Self {
        Self::Sampler(msg.into())
    }

    /// Create a new configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new parse error
    pub fn parse_error(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Whether this error means snapshots can no longer be aligned by device.
    pub fn is_device_mismatch(&self) -> bool {
        matches!(
            self,
            Self::DeviceCountMismatch { .. } | Self::DeviceOrderMismatch { .. }
        )
    }
}
