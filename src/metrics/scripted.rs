//! Replayable provider for tests, benchmarks and demo runs.

use crate::error::{MonitorError, Result};
use crate::metrics::data::{DeviceSample, Snapshot};
use crate::metrics::traits::StatsProvider;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Provider that replays a fixed list of query results.
///
/// Once the script is exhausted the final entry is returned forever.
pub struct ScriptedProvider {
    script: Vec<Result<Snapshot>>,
    position: usize,
    queries: Arc<AtomicUsize>,
    restamp: bool,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<Snapshot>>) -> Self {
        Self {
            script,
            position: 0,
            queries: Arc::new(AtomicUsize::new(0)),
            restamp: false,
        }
    }

    /// Replay the given snapshots in order.
    pub fn from_snapshots(snapshots: Vec<Snapshot>) -> Self {
        Self::new(snapshots.into_iter().map(Ok).collect())
    }

    /// Return the same snapshot on every query.
    pub fn repeating(snapshot: Snapshot) -> Self {
        Self::from_snapshots(vec![snapshot])
    }

    /// Stamp every returned snapshot with the time of the query.
    pub fn with_fresh_timestamps(mut self) -> Self {
        self.restamp = true;
        self
    }

    /// A two-device machine with readings that vary between polls.
    pub fn demo() -> Self {
        let readings = [(35, 20, 90), (48, 85, 210), (52, 97, 245), (44, 60, 160)];
        let snapshots = readings
            .iter()
            .map(|&(temperature, utilization, power_draw)| {
                let devices = (0..2u32)
                    .map(|index| {
                        let memory_used = 2048 + u64::from(utilization) * 100 + u64::from(index) * 512;
                        DeviceSample {
                            memory_total: 24576,
                            memory_used,
                            memory_free: 24576 - memory_used,
                            memory_available: 24576 - memory_used,
                            temperature: temperature + index * 3,
                            fan_speed: 30 + utilization / 2,
                            utilization,
                            power_draw: power_draw - index * 10,
                            power_limit: 300,
                            ..DeviceSample::new(
                                index,
                                format!("GPU-demo-{index:04}"),
                                "Demo GPU",
                            )
                        }
                    })
                    .collect();
                Snapshot::new("demo-host", devices).with_driver_version("demo")
            })
            .collect();
        Self::from_snapshots(snapshots).with_fresh_timestamps()
    }

    /// Shared counter of queries served, readable while the provider is in use.
    pub fn query_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.queries)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl StatsProvider for ScriptedProvider {
    fn query(&mut self) -> Result<Snapshot> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let Some(entry) = self.script.get(self.position).or_else(|| self.script.last()) else {
            return Err(MonitorError::provider_error("Scripted provider has no entries"));
        };
        if self.position < self.script.len() {
            self.position += 1;
        }
        let mut entry = entry.clone();
        if self.restamp {
            if let Ok(snapshot) = &mut entry {
                snapshot.timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
            }
        }
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replays_then_repeats_last() {
        let first = Snapshot::new("host", vec![DeviceSample::new(0, "GPU-a", "A")]);
        let second = Snapshot::new("host", vec![DeviceSample::new(0, "GPU-b", "B")]);
        let mut provider = ScriptedProvider::from_snapshots(vec![first.clone(), second.clone()]);

        assert_eq!(provider.query().unwrap(), first);
        assert_eq!(provider.query().unwrap(), second);
        assert_eq!(provider.query().unwrap(), second);
        assert_eq!(provider.queries(), 3);
    }

    #[test]
    fn test_scripted_errors() {
        let mut provider = ScriptedProvider::new(vec![Err(MonitorError::provider_error("boom"))]);
        assert_eq!(provider.query(), Err(MonitorError::Provider("boom".to_string())));

        let mut empty = ScriptedProvider::new(Vec::new());
        assert!(empty.query().is_err());
    }

    #[test]
    fn test_fresh_timestamps() {
        let stale = Snapshot {
            timestamp: 0,
            ..Snapshot::new("host", vec![DeviceSample::new(0, "GPU-a", "A")])
        };
        let mut replay = ScriptedProvider::repeating(stale.clone());
        assert_eq!(replay.query().unwrap().timestamp, 0);

        let mut provider = ScriptedProvider::repeating(stale).with_fresh_timestamps();
        let first = provider.query().unwrap();
        let second = provider.query().unwrap();
        assert!(first.timestamp > 0);
        assert!(second.timestamp >= first.timestamp);
        assert_eq!(first.devices, second.devices);
    }

    #[test]
    fn test_demo_layout_is_stable() {
        let mut provider = ScriptedProvider::demo();
        let uuids: Vec<_> = provider.query().unwrap().devices.into_iter().map(|d| d.uuid).collect();
        for _ in 0..5 {
            let next: Vec<_> = provider.query().unwrap().devices.into_iter().map(|d| d.uuid).collect();
            assert_eq!(next, uuids);
        }
    }
}
