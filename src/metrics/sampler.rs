//! Background sampling loop.
//!
//! The loop task owns the provider, the recorded series and the accumulator
//! outright and hands them back through its join handle. `stop()` signals the
//! task, waits for it to exit and only then exposes the results, so nothing
//! recorded is shared with the caller while sampling is in progress.

use crate::config::{MonitorConfig, ProviderErrorPolicy};
use crate::error::{MonitorError, Result};
use crate::metrics::accumulator::{batch_mean, Accumulator};
use crate::metrics::data::{AverageReport, MonitorReport, Snapshot};
use crate::metrics::traits::StatsProvider;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counters describing one sampling run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerStats {
    /// Snapshots appended to the series
    pub snapshots: u64,
    /// Provider queries that failed
    pub failed_queries: u64,
}

/// Everything the loop task produced, returned when it exits.
struct SamplerOutput<P> {
    provider: Option<P>,
    series: Vec<Snapshot>,
    accumulator: Accumulator,
    failed_queries: u64,
    failure: Option<MonitorError>,
}

impl<P> SamplerOutput<P> {
    fn new(provider: P) -> Self {
        Self {
            provider: Some(provider),
            series: Vec::new(),
            accumulator: Accumulator::new(),
            failed_queries: 0,
            failure: None,
        }
    }
}

/// Handle to a running (or stopped) GPU sampler.
///
/// Must be started from within a Tokio runtime.
pub struct GpuMonitor<P: StatsProvider> {
    config: MonitorConfig,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<SamplerOutput<P>>>,
    output: Option<SamplerOutput<P>>,
}

impl<P: StatsProvider> GpuMonitor<P> {
    /// Validate `config` and start polling `provider` in the background.
    pub fn start(config: MonitorConfig, provider: P) -> Result<Self> {
        config.validate()?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_sampler(
            provider,
            config.delay(),
            config.on_provider_error,
            stop_rx,
        ));

        info!(
            "Started GPU monitor with {}ms delay ({:?} on provider errors)",
            config.delay_ms, config.on_provider_error
        );

        Ok(Self {
            config,
            stop_tx,
            handle: Some(handle),
            output: None,
        })
    }

    /// Configuration the monitor was started with.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Whether the sampler has not been stopped yet.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop sampling and return every recorded snapshot.
    ///
    /// Waits for the loop to finish its current iteration. Once this returns no
    /// further snapshots are recorded. Later calls return the same series, or
    /// the same error if sampling ended with one.
    pub async fn stop(&mut self) -> Result<&[Snapshot]> {
        if let Some(handle) = self.handle.take() {
            // A send error means the loop already exited on its own.
            let _ = self.stop_tx.send(true);
            let output = handle.await.map_err(|e| {
                MonitorError::sampler_error(format!("Sampler task failed: {}", e))
            })?;
            info!(
                "Stopped GPU monitor after {} snapshots ({} failed queries)",
                output.series.len(),
                output.failed_queries
            );
            self.output = Some(output);
        }

        let output = self.stopped_output()?;
        match &output.failure {
            Some(err) => Err(err.clone()),
            None => Ok(output.series.as_slice()),
        }
    }

    /// Recorded snapshots, available once stopped.
    pub fn raw_series(&self) -> Result<&[Snapshot]> {
        Ok(self.stopped_output()?.series.as_slice())
    }

    /// Per-device mean recomputed over the whole series.
    ///
    /// `Ok(None)` when nothing was recorded.
    pub fn average_report(&self) -> Result<Option<AverageReport>> {
        batch_mean(&self.stopped_output()?.series)
    }

    /// Per-device mean maintained incrementally while sampling.
    pub fn running_average(&self) -> Result<Option<AverageReport>> {
        Ok(self.stopped_output()?.accumulator.report())
    }

    /// Batch and incremental averages together, for cross-checking.
    pub fn report(&self) -> Result<Option<MonitorReport>> {
        let Some(per_device_average) = self.average_report()? else {
            return Ok(None);
        };
        let Some(running_average) = self.running_average()? else {
            return Ok(None);
        };
        Ok(Some(MonitorReport {
            per_device_average,
            running_average,
        }))
    }

    /// Snapshot and failure counts, available once stopped.
    pub fn stats(&self) -> Result<SamplerStats> {
        let output = self.stopped_output()?;
        Ok(SamplerStats {
            snapshots: output.series.len() as u64,
            failed_queries: output.failed_queries,
        })
    }

    /// Take the provider back after stopping, e.g. to start the next monitor.
    ///
    /// `None` if the provider was lost to a panicking query.
    pub fn into_provider(mut self) -> Result<Option<P>> {
        if self.handle.is_some() {
            return Err(MonitorError::NotStopped);
        }
        Ok(self.output.take().and_then(|output| output.provider))
    }

    fn stopped_output(&self) -> Result<&SamplerOutput<P>> {
        if self.handle.is_some() {
            return Err(MonitorError::NotStopped);
        }
        self.output
            .as_ref()
            .ok_or_else(|| MonitorError::sampler_error("Sampler task did not return its results"))
    }
}

async fn run_sampler<P: StatsProvider>(
    provider: P,
    delay: Duration,
    policy: ProviderErrorPolicy,
    mut stop_rx: watch::Receiver<bool>,
) -> SamplerOutput<P> {
    let mut output = SamplerOutput::new(provider);

    while !*stop_rx.borrow() {
        let Some(mut provider) = output.provider.take() else {
            break;
        };
        let queried = tokio::task::spawn_blocking(move || {
            let result = provider.query();
            (provider, result)
        })
        .await;

        let result = match queried {
            Ok((provider, result)) => {
                output.provider = Some(provider);
                result
            }
            Err(e) => {
                error!("GPU query task failed: {}", e);
                output.failure = Some(MonitorError::sampler_error(format!(
                    "GPU query task failed: {}",
                    e
                )));
                break;
            }
        };

        match result {
            Ok(snapshot) => {
                if let Err(err) = output.accumulator.fold(&snapshot) {
                    error!("Discarding snapshot and stopping sampler: {}", err);
                    output.failure = Some(err);
                    break;
                }
                debug!(
                    "Recorded snapshot {} with {} devices",
                    output.accumulator.count(),
                    snapshot.device_count()
                );
                output.series.push(snapshot);
            }
            Err(err) => {
                output.failed_queries += 1;
                match policy {
                    ProviderErrorPolicy::Retry => {
                        warn!("GPU query failed, retrying in {:?}: {}", delay, err);
                    }
                    ProviderErrorPolicy::Abort => {
                        error!("GPU query failed, stopping sampler: {}", err);
                        output.failure = Some(err);
                        break;
                    }
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = stop_rx.changed() => {
                // The monitor handle was dropped without stopping.
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    output
}
