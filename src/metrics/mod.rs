//! GPU statistics collection, sampling and averaging.
//!
//! This module provides the data structures for per-device GPU readings, the
//! provider abstraction over the hardware query facility, the background
//! sampler and the running/batch averaging of recorded snapshots.

pub mod accumulator;
pub mod collector;
pub mod data;
pub mod sampler;
pub mod scripted;
pub mod traits;

// Re-export commonly used items
pub use accumulator::{batch_mean, Accumulator};
pub use collector::NvidiaSmiProvider;
pub use data::{AverageReport, DeviceAverage, DeviceSample, MonitorReport, Snapshot};
pub use sampler::{GpuMonitor, SamplerStats};
pub use scripted::ScriptedProvider;
pub use traits::StatsProvider;
