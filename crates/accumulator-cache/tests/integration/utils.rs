use std::sync::Arc;
use std::time::Duration;

use accumulator_cache::test::{self, StubRuntime};
use accumulator_cache::{AccumulatorSnapshotCache, CacheConfig, JobId};

/// Creates a cache for job `J1` that fetches from `runtime`.
pub fn setup_cache(
    config: CacheConfig,
    runtime: &Arc<StubRuntime>,
) -> Arc<AccumulatorSnapshotCache> {
    test::setup();

    let cache = AccumulatorSnapshotCache::from_config(&config);
    cache.set_job_id(JobId::new("J1"));
    cache.set_local_runtime(runtime.clone());
    Arc::new(cache)
}

pub fn config(min_refresh_interval: Duration) -> CacheConfig {
    CacheConfig {
        min_refresh_interval,
        request_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}
