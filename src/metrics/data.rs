//! Data structures for GPU statistics.

use serde::{Deserialize, Serialize};

/// Number of metrics that are averaged for every device.
pub const AVERAGED_METRIC_COUNT: usize = 7;

/// All devices' readings from a single poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Timestamp when this snapshot was taken (Unix timestamp in milliseconds)
    pub timestamp: u64,
    /// Host the devices belong to
    pub hostname: String,
    /// Driver version reported by the query facility
    pub driver_version: Option<String>,
    /// One sample per device, in device order
    pub devices: Vec<DeviceSample>,
}

/// Ordered history of snapshots recorded by one monitor.
pub type Series = Vec<Snapshot>;

/// One device's instantaneous reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSample {
    /// Device index as reported by the driver
    pub index: u32,
    /// Unique device identifier
    pub uuid: String,
    /// Product name (e.g., "NVIDIA A100-SXM4-40GB")
    pub name: String,
    /// Total memory in MiB
    pub memory_total: u64,
    /// Used memory in MiB
    pub memory_used: u64,
    /// Free memory in MiB
    pub memory_free: u64,
    /// Memory available to new allocations in MiB
    pub memory_available: u64,
    /// Core temperature in Celsius
    pub temperature: u32,
    /// Fan speed percentage (0 to 100)
    pub fan_speed: u32,
    /// Utilization percentage (0 to 100)
    pub utilization: u32,
    /// Power draw in watts
    pub power_draw: u32,
    /// Enforced power limit in watts
    pub power_limit: u32,
    /// Processes running on the device
    pub processes: Vec<GpuProcess>,
}

/// A process holding memory on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuProcess {
    /// Process ID
    pub pid: u32,
    /// Process name as reported by the driver
    pub command: String,
    /// Owner of the process, when known
    pub username: Option<String>,
    /// Device memory used by the process in MiB
    pub gpu_memory_usage: u64,
}

impl Snapshot {
    /// Create a snapshot of the given devices stamped with the current time.
    pub fn new(hostname: impl Into<String>, devices: Vec<DeviceSample>) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
            hostname: hostname.into(),
            driver_version: None,
            devices,
        }
    }

    pub fn with_driver_version(mut self, version: impl Into<String>) -> Self {
        self.driver_version = Some(version.into());
        self
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

impl DeviceSample {
    /// Create a device sample with all metrics zeroed.
    pub fn new(index: u32, uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index,
            uuid: uuid.into(),
            name: name.into(),
            memory_total: 0,
            memory_used: 0,
            memory_free: 0,
            memory_available: 0,
            temperature: 0,
            fan_speed: 0,
            utilization: 0,
            power_draw: 0,
            power_limit: 0,
            processes: Vec::new(),
        }
    }

    /// Averaged metrics widened to `f64`: memory used, free and available,
    /// temperature, fan speed, utilization, power draw.
    pub fn averaged_values(&self) -> [f64; AVERAGED_METRIC_COUNT] {
        [
            self.memory_used as f64,
            self.memory_free as f64,
            self.memory_available as f64,
            self.temperature as f64,
            self.fan_speed as f64,
            self.utilization as f64,
            self.power_draw as f64,
        ]
    }

    /// Memory usage percentage (0.0 to 100.0).
    pub fn memory_usage_percent(&self) -> f64 {
        if self.memory_total > 0 {
            (self.memory_used as f64 / self.memory_total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Averaged readings for one device slot.
///
/// Identity, `memory_total`, `power_limit` and `processes` come from the first
/// snapshot; every other metric holds an `f64` mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceAverage {
    pub index: u32,
    pub uuid: String,
    pub name: String,
    pub memory_total: u64,
    pub memory_used: f64,
    pub memory_free: f64,
    pub memory_available: f64,
    pub temperature: f64,
    pub fan_speed: f64,
    pub utilization: f64,
    pub power_draw: f64,
    pub power_limit: u32,
    pub processes: Vec<GpuProcess>,
}

impl DeviceAverage {
    /// Build an average holding exactly the values of one sample.
    pub fn from_sample(sample: &DeviceSample) -> Self {
        let mut average = Self {
            index: sample.index,
            uuid: sample.uuid.clone(),
            name: sample.name.clone(),
            memory_total: sample.memory_total,
            memory_used: 0.0,
            memory_free: 0.0,
            memory_available: 0.0,
            temperature: 0.0,
            fan_speed: 0.0,
            utilization: 0.0,
            power_draw: 0.0,
            power_limit: sample.power_limit,
            processes: sample.processes.clone(),
        };
        average.set_values(sample.averaged_values());
        average
    }

    /// Averaged metrics, in the order of [`DeviceSample::averaged_values`].
    pub fn values(&self) -> [f64; AVERAGED_METRIC_COUNT] {
        [
            self.memory_used,
            self.memory_free,
            self.memory_available,
            self.temperature,
            self.fan_speed,
            self.utilization,
            self.power_draw,
        ]
    }

    pub(crate) fn set_values(&mut self, values: [f64; AVERAGED_METRIC_COUNT]) {
        let [memory_used, memory_free, memory_available, temperature, fan_speed, utilization, power_draw] =
            values;
        self.memory_used = memory_used;
        self.memory_free = memory_free;
        self.memory_available = memory_available;
        self.temperature = temperature;
        self.fan_speed = fan_speed;
        self.utilization = utilization;
        self.power_draw = power_draw;
    }

    /// Read the averages back as integer readings, truncating each mean.
    pub fn to_sample(&self) -> DeviceSample {
        DeviceSample {
            index: self.index,
            uuid: self.uuid.clone(),
            name: self.name.clone(),
            memory_total: self.memory_total,
            memory_used: self.memory_used.trunc() as u64,
            memory_free: self.memory_free.trunc() as u64,
            memory_available: self.memory_available.trunc() as u64,
            temperature: self.temperature.trunc() as u32,
            fan_speed: self.fan_speed.trunc() as u32,
            utilization: self.utilization.trunc() as u32,
            power_draw: self.power_draw.trunc() as u32,
            power_limit: self.power_limit,
            processes: self.processes.clone(),
        }
    }

    /// Largest absolute difference between the averaged metrics of two records.
    pub fn max_abs_diff(&self, other: &DeviceAverage) -> f64 {
        self.values()
            .iter()
            .zip(other.values().iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }
}

/// Per-device averages over a number of snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageReport {
    /// Number of snapshots folded into the averages
    pub snapshots: u64,
    /// One averaged record per device, in device order
    pub devices: Vec<DeviceAverage>,
}

impl AverageReport {
    /// Truncated integer view of every device's averages.
    pub fn to_samples(&self) -> Vec<DeviceSample> {
        self.devices.iter().map(DeviceAverage::to_sample).collect()
    }
}

/// Batch and incremental averages side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorReport {
    /// Mean recomputed over the whole series
    pub per_device_average: AverageReport,
    /// Mean maintained incrementally while sampling
    pub running_average: AverageReport,
}

impl MonitorReport {
    /// Whether both estimators agree on every device and metric.
    pub fn agrees_within(&self, tolerance: f64) -> bool {
        let batch = &self.per_device_average;
        let running = &self.running_average;
        batch.snapshots == running.snapshots
            && batch.devices.len() == running.devices.len()
            && batch
                .devices
                .iter()
                .zip(running.devices.iter())
                .all(|(a, b)| a.uuid == b.uuid && a.max_abs_diff(b) <= tolerance)
    }
}
