//! Monitor configuration.

use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What the sampler does when a provider query fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorPolicy {
    /// Log the failure and poll again after the next interval
    #[default]
    Retry,
    /// Stop sampling and report the failure from `stop()`
    Abort,
}

/// Formatting hints for rendered reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayOptions {
    /// Print the hostname and snapshot count above the device lines
    pub show_header: bool,
    /// Include fan speed
    pub show_fan_speed: bool,
    /// Include power draw and limit
    pub show_power: bool,
    /// List the processes found on each device
    pub show_processes: bool,
    /// Include process ids in the process list
    pub show_pid: bool,
    /// Include process commands in the process list
    pub show_cmd: bool,
    /// Include process owners in the process list
    pub show_user: bool,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            show_header: true,
            show_fan_speed: true,
            show_power: true,
            show_processes: true,
            show_pid: false,
            show_cmd: true,
            show_user: true,
        }
    }
}

/// Configuration for a [`GpuMonitor`](crate::GpuMonitor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Time between the end of one poll and the start of the next, in milliseconds
    pub delay_ms: u64,
    /// Behaviour on failed provider queries
    pub on_provider_error: ProviderErrorPolicy,
    /// Passthrough formatting hints for reports
    pub display_options: DisplayOptions,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            delay_ms: crate::DEFAULT_DELAY_MS,
            on_provider_error: ProviderErrorPolicy::default(),
            display_options: DisplayOptions::default(),
        }
    }
}

impl MonitorConfig {
    /// Create a configuration polling every `delay_ms` milliseconds.
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Default::default()
        }
    }

    /// Create a configuration from a delay in (possibly fractional) seconds.
    pub fn from_secs(delay_secs: f64) -> Result<Self> {
        if !delay_secs.is_finite() || delay_secs <= 0.0 {
            return Err(MonitorError::config_error(format!(
                "Delay must be a positive number of seconds, got {}",
                delay_secs
            )));
        }
        Ok(Self::new((delay_secs * 1000.0).round().max(1.0) as u64))
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::config_error(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    /// Parse a configuration from JSON text.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| MonitorError::config_error(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the delay between polls in milliseconds.
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Set the provider error policy.
    pub fn with_error_policy(mut self, policy: ProviderErrorPolicy) -> Self {
        self.on_provider_error = policy;
        self
    }

    /// Set the display options.
    pub fn with_display_options(mut self, options: DisplayOptions) -> Self {
        self.display_options = options;
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Check the configuration can drive a sampler.
    pub fn validate(&self) -> Result<()> {
        if self.delay_ms == 0 {
            return Err(MonitorError::config_error("Delay between polls must be non-zero"));
        }
        Ok(())
    }
}
