//! Start and stop a monitor around training epochs.

use crate::config::MonitorConfig;
use crate::display::render_monitor_report;
use crate::error::{MonitorError, Result};
use crate::metrics::data::MonitorReport;
use crate::metrics::sampler::GpuMonitor;
use crate::metrics::traits::StatsProvider;
use tracing::{info, warn};

/// Runs one [`GpuMonitor`] per epoch, reusing the same provider.
pub struct EpochMonitor<P: StatsProvider> {
    config: MonitorConfig,
    provider: Option<P>,
    monitor: Option<GpuMonitor<P>>,
    epoch: u64,
}

impl<P: StatsProvider> EpochMonitor<P> {
    pub fn new(config: MonitorConfig, provider: P) -> Self {
        Self {
            config,
            provider: Some(provider),
            monitor: None,
            epoch: 0,
        }
    }

    /// Number of epochs started so far.
    pub fn epochs(&self) -> u64 {
        self.epoch
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_some()
    }

    /// Start sampling for a new epoch.
    pub fn on_begin_epoch(&mut self) -> Result<()> {
        if self.monitor.is_some() {
            return Err(MonitorError::config_error(
                "An epoch is already being monitored",
            ));
        }
        let provider = self.provider.take().ok_or_else(|| {
            MonitorError::sampler_error("GPU provider was lost in a previous epoch")
        })?;

        self.monitor = Some(GpuMonitor::start(self.config.clone(), provider)?);
        self.epoch += 1;
        Ok(())
    }

    /// Stop sampling, log the averaged report and return it.
    ///
    /// `Ok(None)` if no epoch is running or nothing was recorded.
    pub async fn on_end_epoch(&mut self) -> Result<Option<MonitorReport>> {
        let Some(mut monitor) = self.monitor.take() else {
            return Ok(None);
        };

        let stopped = monitor.stop().await.map(|series| series.len());
        let report = monitor.report();
        let stats = monitor.stats();
        self.provider = monitor.into_provider()?;
        let recorded = stopped?;

        if let Ok(stats) = stats {
            if stats.failed_queries > 0 {
                warn!(
                    "Epoch {}: {} GPU queries failed",
                    self.epoch, stats.failed_queries
                );
            }
        }

        let report = report?;
        match &report {
            Some(report) => info!(
                "Epoch {} GPU usage ({} snapshots):\n{}",
                self.epoch,
                recorded,
                render_monitor_report(report, &self.config.display_options)
            ),
            None => info!("Epoch {}: no GPU snapshots recorded", self.epoch),
        }
        Ok(report)
    }
}
