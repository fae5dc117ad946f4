//! Traits for GPU statistics collection.

use crate::error::Result;
use crate::metrics::data::Snapshot;

/// Source of point-in-time GPU readings.
///
/// A query is synchronous and may block for as long as the underlying
/// hardware facility takes to answer. The sampler runs queries on the
/// blocking thread pool, so implementations need not be async-aware.
pub trait StatsProvider: Send + 'static {
    /// Read every device once.
    fn query(&mut self) -> Result<Snapshot>;
}

impl StatsProvider for Box<dyn StatsProvider> {
    fn query(&mut self) -> Result<Snapshot> {
        (**self).query()
    }
}
