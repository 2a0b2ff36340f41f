//! A client-side cache for the accumulators of a running job.
//!
//! The [`AccumulatorSnapshotCache`] holds exactly one snapshot of accumulator values for exactly
//! one job. Callers poll it via [`refresh`](AccumulatorSnapshotCache::refresh), and it decides
//! whether the job runtime needs to be asked again.

#[macro_use]
pub mod metrics;

pub mod backend;
pub mod cache;
pub mod config;
pub mod logging;
pub mod serialized;
pub mod types;


use anyhow::Result;

pub use backend::{
    AccumulatorResponse, Backend, FetchError, FetchOutcome, JobClient, JobRuntime,
    SerializedAccumulators,
};
pub use cache::{AccumulatorSnapshotCache, RefreshError};
pub use config::{CacheConfig, Config, RefreshMode};
pub use serialized::{AccumulatorValue, DecodeError, SerializedValue};
pub use types::{JobId, Snapshot};

/// Sets up logging and metrics according to `config`, and creates a cache from it.
pub fn init(config: &Config) -> Result<AccumulatorSnapshotCache> {
    logging::init_logging(&config.logging)?;

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd,
            config.metrics.custom_tags.clone(),
        )?;
    }

    Ok(AccumulatorSnapshotCache::from_config(&config.cache))
}
