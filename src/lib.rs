//! # GPU Monitor - Averaged GPU Statistics
//!
//! Samples GPU statistics (memory, temperature, utilization, fan speed and
//! power draw) in the background while other work runs, and reports
//! per-device averages together with the full recorded series.
//!
//! ## Features
//!
//! - **Background sampling**: polls a provider at a fixed delay on its own task
//! - **Running averages**: per-device means updated in O(devices) per snapshot
//! - **Cross-checked reports**: incremental and whole-series means side by side
//! - **nvidia-smi provider**: reads NVIDIA GPUs through the vendor CLI
//! - **Epoch lifecycle**: start/stop a monitor around training epochs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gpu_monitor::{GpuMonitor, MonitorConfig, NvidiaSmiProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut monitor = GpuMonitor::start(MonitorConfig::new(1000), NvidiaSmiProvider::new())?;
//!
//!     // Do your work
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     let series = monitor.stop().await?;
//!     println!("Recorded {} snapshots", series.len());
//!     if let Some(report) = monitor.average_report()? {
//!         println!("{}", report);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod display;
pub mod error;
pub mod lifecycle;
pub mod metrics;

// Re-export public API
pub use config::{DisplayOptions, MonitorConfig, ProviderErrorPolicy};
pub use display::{render_monitor_report, render_report};
pub use error::{MonitorError, Result};
pub use lifecycle::EpochMonitor;
pub use metrics::{
    accumulator::{batch_mean, Accumulator},
    collector::NvidiaSmiProvider,
    data::{AverageReport, DeviceAverage, DeviceSample, GpuProcess, MonitorReport, Series, Snapshot},
    sampler::{GpuMonitor, SamplerStats},
    scripted::ScriptedProvider,
    traits::StatsProvider,
};

/// The default delay between polls in milliseconds
pub const DEFAULT_DELAY_MS: u64 = 1000;
