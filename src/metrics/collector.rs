//! GPU statistics collection through the `nvidia-smi` command line tool.

use crate::error::{MonitorError, Result};
use crate::metrics::{
    data::{DeviceSample, GpuProcess, Snapshot},
    traits::StatsProvider,
};
use std::process::Command;
use sysinfo::System;
use tracing::debug;

/// Fields requested from `nvidia-smi --query-gpu`, in column order.
const GPU_QUERY_FIELDS: &str = "index,uuid,name,memory.total,memory.used,memory.free,\
temperature.gpu,fan.speed,utilization.gpu,power.draw,enforced.power.limit,driver_version";

/// Fields requested from `nvidia-smi --query-compute-apps`, in column order.
const APPS_QUERY_FIELDS: &str = "gpu_uuid,pid,process_name,used_memory";

const GPU_COLUMNS: usize = 12;
const APPS_COLUMNS: usize = 4;

/// Provider that shells out to `nvidia-smi` for every query.
pub struct NvidiaSmiProvider {
    binary: String,
    hostname: String,
}

impl NvidiaSmiProvider {
    /// Create a provider using `nvidia-smi` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("nvidia-smi")
    }

    /// Create a provider using a specific `nvidia-smi` executable.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        }
    }

    /// Run `nvidia-smi` with the given arguments and return its stdout.
    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.binary).args(args).output().map_err(|e| {
            MonitorError::provider_error(format!("Failed to run {}: {}", self.binary, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = if stderr.trim().is_empty() { stdout } else { stderr };
            return Err(MonitorError::provider_error(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                message.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for NvidiaSmiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsProvider for NvidiaSmiProvider {
    fn query(&mut self) -> Result<Snapshot> {
        let gpu_csv = self.run(&[
            format!("--query-gpu={}", GPU_QUERY_FIELDS).as_str(),
            "--format=csv,noheader,nounits",
        ])?;
        let apps_csv = self.run(&[
            format!("--query-compute-apps={}", APPS_QUERY_FIELDS).as_str(),
            "--format=csv,noheader,nounits",
        ])?;

        let mut snapshot = parse_gpu_csv(&gpu_csv, &self.hostname)?;
        attach_processes(&mut snapshot.devices, parse_compute_apps_csv(&apps_csv)?);
        debug!("Queried {} GPUs from {}", snapshot.device_count(), self.binary);
        Ok(snapshot)
    }
}

/// Parse `--query-gpu` output (no header, no units) into a snapshot.
pub fn parse_gpu_csv(csv: &str, hostname: &str) -> Result<Snapshot> {
    let mut devices = Vec::new();
    let mut driver_version = None;

    for line in csv.lines().filter(|line| !line.trim().is_empty()) {
        let columns = split_columns(line);
        if columns.len() != GPU_COLUMNS {
            return Err(MonitorError::parse_error(format!(
                "Expected {} GPU columns, found {} in line: {}",
                GPU_COLUMNS,
                columns.len(),
                line
            )));
        }

        let memory_total: u64 = parse_reading(columns[3])?;
        let memory_used: u64 = parse_reading(columns[4])?;
        let memory_free: u64 = parse_reading(columns[5])?;

        devices.push(DeviceSample {
            index: parse_required(columns[0], "index")?,
            uuid: columns[1].to_string(),
            name: columns[2].to_string(),
            memory_total,
            memory_used,
            memory_free,
            memory_available: memory_total.saturating_sub(memory_used),
            temperature: parse_reading(columns[6])?,
            fan_speed: parse_reading(columns[7])?,
            utilization: parse_reading(columns[8])?,
            power_draw: parse_reading(columns[9])?,
            power_limit: parse_reading(columns[10])?,
            processes: Vec::new(),
        });

        if driver_version.is_none() && !is_unavailable(columns[11]) {
            driver_version = Some(columns[11].to_string());
        }
    }

    let mut snapshot = Snapshot::new(hostname, devices);
    snapshot.driver_version = driver_version;
    Ok(snapshot)
}

/// Parse `--query-compute-apps` output into `(gpu_uuid, process)` pairs.
pub fn parse_compute_apps_csv(csv: &str) -> Result<Vec<(String, GpuProcess)>> {
    csv.lines()
        .filter(|line| !line.trim().is_empty())
        // Printed instead of rows by some driver versions.
        .filter(|line| !line.contains("No running"))
        .map(|line| {
            let columns = split_columns(line);
            if columns.len() != APPS_COLUMNS {
                return Err(MonitorError::parse_error(format!(
                    "Expected {} process columns, found {} in line: {}",
                    APPS_COLUMNS,
                    columns.len(),
                    line
                )));
            }
            let process = GpuProcess {
                pid: parse_required(columns[1], "pid")?,
                command: columns[2].to_string(),
                username: None,
                gpu_memory_usage: parse_reading(columns[3])?,
            };
            Ok((columns[0].to_string(), process))
        })
        .collect()
}

/// Attach each process to the device with the matching uuid.
pub fn attach_processes(devices: &mut [DeviceSample], processes: Vec<(String, GpuProcess)>) {
    for (uuid, process) in processes {
        match devices.iter_mut().find(|device| device.uuid == uuid) {
            Some(device) => device.processes.push(process),
            None => debug!("Ignoring process {} on unknown GPU {}", process.pid, uuid),
        }
    }
}

fn split_columns(line: &str) -> Vec<&str> {
    line.split(',').map(str::trim).collect()
}

fn is_unavailable(value: &str) -> bool {
    value.is_empty() || value.starts_with('[') || value.eq_ignore_ascii_case("N/A")
}

/// Parse a numeric reading, truncating fractions. Unavailable readings are 0.
fn parse_reading<T: TryFrom<u64>>(value: &str) -> Result<T> {
    if is_unavailable(value) {
        return T::try_from(0u64)
            .map_err(|_| MonitorError::parse_error("Reading type cannot hold zero"));
    }
    let parsed = value
        .parse::<f64>()
        .map_err(|e| MonitorError::parse_error(format!("Invalid reading '{}': {}", value, e)))?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(MonitorError::parse_error(format!("Invalid reading '{}'", value)));
    }
    T::try_from(parsed.trunc() as u64)
        .map_err(|_| MonitorError::parse_error(format!("Reading '{}' is out of range", value)))
}

fn parse_required<T: std::str::FromStr>(value: &str, field: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| MonitorError::parse_error(format!("Invalid {} '{}'", field, value)))
}
