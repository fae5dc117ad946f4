//! Running and batch per-device averages.
//!
//! Both estimators keep their means in `f64` and only truncate when a caller
//! reads them back through [`DeviceAverage::to_sample`], so the incremental
//! and batch results agree up to floating-point rounding.

use crate::error::{MonitorError, Result};
use crate::metrics::data::{AverageReport, DeviceAverage, DeviceSample, Snapshot, AVERAGED_METRIC_COUNT};

/// Incrementally maintained per-device mean.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    averages: Vec<DeviceAverage>,
    count: u64,
}

impl Accumulator {
    /// Create an accumulator that has seen no snapshots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots folded so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Whether nothing has been folded yet.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Incorporate one snapshot.
    ///
    /// The first snapshot becomes the baseline. Later snapshots must list the
    /// same devices in the same order; otherwise nothing is updated and a
    /// mismatch error is returned.
    pub fn fold(&mut self, snapshot: &Snapshot) -> Result<()> {
        if self.count == 0 {
            self.averages = snapshot.devices.iter().map(DeviceAverage::from_sample).collect();
            self.count = 1;
            return Ok(());
        }

        check_alignment(
            self.averages.iter().map(|average| average.uuid.as_str()),
            self.averages.len(),
            &snapshot.devices,
        )?;

        self.count += 1;
        let n = self.count as f64;
        for (average, sample) in self.averages.iter_mut().zip(snapshot.devices.iter()) {
            let mut values = average.values();
            for (mean, value) in values.iter_mut().zip(sample.averaged_values()) {
                *mean = (*mean * (n - 1.0) + value) / n;
            }
            average.set_values(values);
        }

        Ok(())
    }

    /// Current averages, or `None` before the first fold.
    pub fn report(&self) -> Option<AverageReport> {
        if self.count == 0 {
            return None;
        }
        Some(AverageReport {
            snapshots: self.count,
            devices: self.averages.clone(),
        })
    }
}

/// Recompute every device's mean by scanning the whole series.
///
/// Devices are aligned by position; the first snapshot fixes the expected
/// device count and order. Returns `Ok(None)` for an empty series.
pub fn batch_mean(series: &[Snapshot]) -> Result<Option<AverageReport>> {
    let Some(first) = series.first() else {
        return Ok(None);
    };

    let baseline = &first.devices;
    let mut sums = vec![[0.0_f64; AVERAGED_METRIC_COUNT]; baseline.len()];

    for snapshot in series {
        check_alignment(
            baseline.iter().map(|device| device.uuid.as_str()),
            baseline.len(),
            &snapshot.devices,
        )?;
        for (sum, sample) in sums.iter_mut().zip(snapshot.devices.iter()) {
            for (total, value) in sum.iter_mut().zip(sample.averaged_values()) {
                *total += value;
            }
        }
    }

    let n = series.len() as f64;
    let devices = baseline
        .iter()
        .zip(sums)
        .map(|(sample, sum)| {
            let mut average = DeviceAverage::from_sample(sample);
            average.set_values(sum.map(|total| total / n));
            average
        })
        .collect();

    Ok(Some(AverageReport {
        snapshots: series.len() as u64,
        devices,
    }))
}

fn check_alignment<'a>(
    expected_uuids: impl Iterator<Item = &'a str>,
    expected_count: usize,
    devices: &[DeviceSample],
) -> Result<()> {
    if devices.len() != expected_count {
        return Err(MonitorError::DeviceCountMismatch {
            expected: expected_count,
            found: devices.len(),
        });
    }

    for (slot, (expected, device)) in expected_uuids.zip(devices.iter()).enumerate() {
        if expected != device.uuid {
            return Err(MonitorError::DeviceOrderMismatch {
                slot,
                expected: expected.to_string(),
                found: device.uuid.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::data::GpuProcess;
    use proptest::prelude::*;

    fn device(index: u32) -> DeviceSample {
        DeviceSample {
            memory_total: 16384,
            power_limit: 300,
            ..DeviceSample::new(index, format!("GPU-{index:04}"), "Test GPU")
        }
    }

    fn snapshot(devices: Vec<DeviceSample>) -> Snapshot {
        Snapshot::new("test-host", devices)
    }

    fn with_utilization(index: u32, utilization: u32) -> DeviceSample {
        DeviceSample {
            utilization,
            ..device(index)
        }
    }

    fn with_temperature(index: u32, temperature: u32) -> DeviceSample {
        DeviceSample {
            temperature,
            ..device(index)
        }
    }

    #[test]
    fn test_single_fold_copies_snapshot() {
        let sample = DeviceSample {
            memory_used: 1000,
            memory_free: 15384,
            memory_available: 15384,
            temperature: 51,
            fan_speed: 40,
            utilization: 99,
            power_draw: 210,
            processes: vec![GpuProcess {
                pid: 4242,
                command: "python".to_string(),
                username: Some("alice".to_string()),
                gpu_memory_usage: 1000,
            }],
            ..device(0)
        };
        let mut accumulator = Accumulator::new();
        accumulator.fold(&snapshot(vec![sample.clone()])).unwrap();

        let report = accumulator.report().unwrap();
        assert_eq!(report.snapshots, 1);
        assert_eq!(report.devices[0], DeviceAverage::from_sample(&sample));
        assert_eq!(report.devices[0].to_sample(), sample);
    }

    #[test]
    fn test_utilization_mean_of_three() {
        let mut accumulator = Accumulator::new();
        for utilization in [10, 20, 30] {
            accumulator
                .fold(&snapshot(vec![with_utilization(0, utilization)]))
                .unwrap();
        }
        let report = accumulator.report().unwrap();
        assert_eq!(report.snapshots, 3);
        assert_eq!(report.devices[0].utilization, 20.0);
    }

    #[test]
    fn test_devices_are_averaged_independently() {
        let mut accumulator = Accumulator::new();
        accumulator
            .fold(&snapshot(vec![with_temperature(0, 40), with_temperature(1, 50)]))
            .unwrap();
        accumulator
            .fold(&snapshot(vec![with_temperature(0, 60), with_temperature(1, 70)]))
            .unwrap();

        let report = accumulator.report().unwrap();
        assert_eq!(report.devices[0].temperature, 50.0);
        assert_eq!(report.devices[1].temperature, 60.0);
    }

    #[test]
    fn test_precision_is_kept_until_read() {
        let mut accumulator = Accumulator::new();
        accumulator.fold(&snapshot(vec![with_utilization(0, 10)])).unwrap();
        accumulator.fold(&snapshot(vec![with_utilization(0, 15)])).unwrap();

        let report = accumulator.report().unwrap();
        assert_eq!(report.devices[0].utilization, 12.5);
        assert_eq!(report.to_samples()[0].utilization, 12);
    }

    #[test]
    fn test_truncation_does_not_accumulate() {
        // Per-fold truncation would yield 0 -> 1 -> 1 here.
        let mut accumulator = Accumulator::new();
        for utilization in [0, 3, 3] {
            accumulator
                .fold(&snapshot(vec![with_utilization(0, utilization)]))
                .unwrap();
        }
        let report = accumulator.report().unwrap();
        assert!((report.devices[0].utilization - 2.0).abs() < 1e-12);
        assert_eq!(report.to_samples()[0].utilization, 2);
    }

    #[test]
    fn test_fixed_fields_are_never_averaged() {
        let mut accumulator = Accumulator::new();
        let first = DeviceSample {
            processes: vec![GpuProcess {
                pid: 1,
                command: "train".to_string(),
                username: None,
                gpu_memory_usage: 512,
            }],
            ..device(0)
        };
        accumulator.fold(&snapshot(vec![first])).unwrap();

        for step in 0..5 {
            let later = DeviceSample {
                memory_total: 1,
                power_limit: 1,
                name: format!("renamed-{step}"),
                utilization: step * 10,
                ..device(0)
            };
            accumulator.fold(&snapshot(vec![later])).unwrap();
        }

        let average = &accumulator.report().unwrap().devices[0];
        assert_eq!(average.memory_total, 16384);
        assert_eq!(average.power_limit, 300);
        assert_eq!(average.name, "Test GPU");
        assert_eq!(average.index, 0);
        assert_eq!(average.uuid, "GPU-0000");
        assert_eq!(average.processes.len(), 1);
    }

    #[test]
    fn test_device_count_mismatch_leaves_state_intact() {
        let mut accumulator = Accumulator::new();
        accumulator
            .fold(&snapshot(vec![with_temperature(0, 40), with_temperature(1, 50)]))
            .unwrap();
        let before = accumulator.report();

        let err = accumulator
            .fold(&snapshot(vec![with_temperature(0, 90)]))
            .unwrap_err();
        assert_eq!(
            err,
            MonitorError::DeviceCountMismatch {
                expected: 2,
                found: 1
            }
        );
        assert_eq!(accumulator.count(), 1);
        assert_eq!(accumulator.report(), before);
    }

    #[test]
    fn test_device_order_mismatch_is_rejected() {
        let mut accumulator = Accumulator::new();
        accumulator.fold(&snapshot(vec![device(0), device(1)])).unwrap();

        let err = accumulator
            .fold(&snapshot(vec![device(1), device(0)]))
            .unwrap_err();
        assert!(matches!(err, MonitorError::DeviceOrderMismatch { slot: 0, .. }));
        assert!(err.is_device_mismatch());
        assert_eq!(accumulator.count(), 1);
    }

    #[test]
    fn test_batch_mean_empty_series() {
        assert_eq!(batch_mean(&[]).unwrap(), None);
        assert!(Accumulator::new().report().is_none());
    }

    #[test]
    fn test_batch_mean_rejects_misaligned_series() {
        let series = vec![
            snapshot(vec![device(0), device(1)]),
            snapshot(vec![device(0), device(1)]),
            snapshot(vec![device(0)]),
        ];
        assert!(matches!(
            batch_mean(&series),
            Err(MonitorError::DeviceCountMismatch {
                expected: 2,
                found: 1
            })
        ));
    }

    #[test]
    fn test_batch_mean_rejects_reordered_devices() {
        let series = vec![
            snapshot(vec![device(0), device(1)]),
            snapshot(vec![device(1), device(0)]),
        ];
        let err = batch_mean(&series).unwrap_err();
        assert!(matches!(err, MonitorError::DeviceOrderMismatch { slot: 0, .. }));
        assert!(err.is_device_mismatch());
    }

    #[test]
    fn test_batch_mean_per_device() {
        let series = vec![
            snapshot(vec![with_temperature(0, 40), with_temperature(1, 50)]),
            snapshot(vec![with_temperature(0, 60), with_temperature(1, 70)]),
        ];
        let report = batch_mean(&series).unwrap().unwrap();
        assert_eq!(report.snapshots, 2);
        assert_eq!(report.devices[0].temperature, 50.0);
        assert_eq!(report.devices[1].temperature, 60.0);
    }

    fn arb_device(index: u32) -> impl Strategy<Value = DeviceSample> {
        (
            0u64..81920,
            0u64..81920,
            0u32..110,
            0u32..=100,
            0u32..=100,
            0u32..700,
        )
            .prop_map(move |(used, free, temperature, fan_speed, utilization, power_draw)| {
                DeviceSample {
                    memory_used: used,
                    memory_free: free,
                    memory_available: free,
                    temperature,
                    fan_speed,
                    utilization,
                    power_draw,
                    ..device(index)
                }
            })
    }

    fn arb_series() -> impl Strategy<Value = Vec<Snapshot>> {
        (1u32..4).prop_flat_map(|devices| {
            let layout: Vec<_> = (0..devices).map(arb_device).collect();
            proptest::collection::vec(layout.prop_map(snapshot), 1..40)
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_incremental_matches_batch(series in arb_series()) {
            let mut accumulator = Accumulator::new();
            for snapshot in &series {
                accumulator.fold(snapshot).unwrap();
            }
            let running = accumulator.report().unwrap();
            let batch = batch_mean(&series).unwrap().unwrap();

            prop_assert_eq!(running.snapshots, batch.snapshots);
            for (a, b) in running.devices.iter().zip(batch.devices.iter()) {
                prop_assert!(a.max_abs_diff(b) < 1e-6);
                prop_assert_eq!(a.memory_total, b.memory_total);
                prop_assert_eq!(&a.uuid, &b.uuid);
            }
        }
    }
}
