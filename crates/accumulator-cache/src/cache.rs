//! The accumulator snapshot cache.
//!
//! [`AccumulatorSnapshotCache`] keeps the most recently observed accumulators of a single job
//! and decides on every [`refresh`](AccumulatorSnapshotCache::refresh) whether the job runtime
//! needs to be asked again. Readers always see a complete snapshot via
//! [`current_snapshot`](AccumulatorSnapshotCache::current_snapshot).

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use thiserror::Error;
use tokio::time::Instant;

use crate::backend::{Backend, FetchOutcome, JobClient, JobRuntime, SerializedAccumulators};
use crate::config::{CacheConfig, RefreshMode};
use crate::serialized::{AccumulatorValue, DecodeError};
use crate::types::{JobId, Snapshot};

/// An error surfaced by [`AccumulatorSnapshotCache::refresh`].
///
/// Transient fetch failures are never surfaced; they only show up in logs and as a stale
/// snapshot.
#[derive(Clone, Debug, Error)]
pub enum RefreshError {
    /// A job is known, but neither a job runtime nor a client was configured.
    #[error("no valid upstream target configured")]
    Configuration,
    /// A fetched accumulator value could not be decoded.
    #[error("failed to decode accumulator `{name}`")]
    Decode {
        name: String,
        #[source]
        source: DecodeError,
    },
}

/// A cache for the accumulators of one job.
///
/// The job id and upstream target are assigned after construction, typically once the job
/// has been submitted. Until a job id is known, refreshing is a no-op.
#[derive(Debug)]
pub struct AccumulatorSnapshotCache {
    job_id: ArcSwapOption<JobId>,
    backend: ArcSwapOption<Backend>,
    min_refresh_interval: Duration,
    request_timeout: Duration,
    refresh_mode: RefreshMode,
    /// Held for the duration of a fetch in single-flight mode, along with its result.
    in_flight: tokio::sync::Mutex<Option<Result<(), RefreshError>>>,
    last_refresh: Mutex<Option<Instant>>,
    snapshot: ArcSwap<Snapshot>,
}

impl AccumulatorSnapshotCache {
    /// Creates an empty cache that refreshes at most once per `min_refresh_interval`.
    pub fn new(min_refresh_interval: Duration, request_timeout: Duration) -> Self {
        Self {
            job_id: ArcSwapOption::empty(),
            backend: ArcSwapOption::empty(),
            min_refresh_interval,
            request_timeout,
            refresh_mode: RefreshMode::default(),
            in_flight: tokio::sync::Mutex::new(None),
            last_refresh: Mutex::new(None),
            snapshot: ArcSwap::from_pointee(Snapshot::new()),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.min_refresh_interval, config.request_timeout)
            .with_refresh_mode(config.refresh_mode)
    }

    pub fn with_refresh_mode(mut self, refresh_mode: RefreshMode) -> Self {
        self.refresh_mode = refresh_mode;
        self
    }

    pub fn set_job_id(&self, job_id: JobId) {
        self.job_id.store(Some(Arc::new(job_id)));
    }

    /// Fetches accumulators from an in-process job runtime.
    ///
    /// This replaces any previously configured target. A fetch that is already in flight keeps
    /// using the target it started with.
    pub fn set_local_runtime(&self, runtime: Arc<dyn JobRuntime>) {
        self.backend.store(Some(Arc::new(Backend::Local(runtime))));
    }

    /// Fetches accumulators through a remote client.
    ///
    /// A configured job runtime takes precedence, in which case the client is not installed.
    pub fn set_remote_client(&self, client: Arc<dyn JobClient>) {
        let previous = self.backend.rcu(|current| match current.as_deref() {
            Some(Backend::Local(_)) => current.clone(),
            _ => Some(Arc::new(Backend::Remote(client.clone()))),
        });

        if let Some(Backend::Local(_)) = previous.as_deref() {
            tracing::debug!(
                client = %client.describe(),
                "Ignoring remote client, a local job runtime is already configured"
            );
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id.load().as_deref().cloned()
    }

    pub fn has_backend(&self) -> bool {
        self.backend.load().is_some()
    }

    pub fn min_refresh_interval(&self) -> Duration {
        self.min_refresh_interval
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        self.refresh_mode
    }

    /// Returns the currently published snapshot.
    ///
    /// This never blocks and never triggers a refresh.
    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Returns when a refresh was last attempted, successful or not.
    pub fn last_refresh(&self) -> Option<Instant> {
        *self
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Refreshes the snapshot if the minimum refresh interval has passed.
    pub async fn refresh_if_stale(&self) -> Result<(), RefreshError> {
        self.refresh(false).await
    }

    /// Fetches the current accumulators of the job and publishes them.
    ///
    /// Unless `force` is set, this does nothing if the last attempt was less than the minimum
    /// refresh interval ago. Timeouts, transport failures and missing results leave the current
    /// snapshot in place and are only logged.
    pub async fn refresh(&self, force: bool) -> Result<(), RefreshError> {
        let now = Instant::now();
        if !force && !self.is_stale(now) {
            return Ok(());
        }

        let Some(job_id) = self.job_id.load_full() else {
            tracing::trace!("No job assigned yet, skipping accumulator refresh");
            return Ok(());
        };

        match self.refresh_mode {
            RefreshMode::Overlapping => self.fetch_and_publish(&job_id, now).await,
            RefreshMode::SingleFlight => {
                let mut in_flight = match self.in_flight.try_lock() {
                    Ok(in_flight) => in_flight,
                    Err(_) => {
                        // Another caller is fetching, share its result instead.
                        let finished = self.in_flight.lock().await;
                        return finished.clone().unwrap_or(Ok(()));
                    }
                };
                let result = self.fetch_and_publish(&job_id, now).await;
                *in_flight = Some(result.clone());
                result
            }
        }
    }

    async fn fetch_and_publish(&self, job_id: &JobId, now: Instant) -> Result<(), RefreshError> {
        let Some(backend) = self.backend.load_full() else {
            return Err(RefreshError::Configuration);
        };
        tracing::trace!(job_id = %job_id, backend = backend.kind(), "Refreshing accumulators");

        let outcome = backend.fetch(job_id, self.request_timeout).await;
        let result = self.handle_outcome(job_id, outcome);

        self.touch(now);
        result
    }

    fn is_stale(&self, now: Instant) -> bool {
        match self.last_refresh() {
            Some(last) => now.saturating_duration_since(last) > self.min_refresh_interval,
            None => true,
        }
    }

    fn touch(&self, now: Instant) {
        let mut last_refresh = self
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *last_refresh = Some(last_refresh.map_or(now, |last| last.max(now)));
    }

    fn handle_outcome(&self, job_id: &JobId, outcome: FetchOutcome) -> Result<(), RefreshError> {
        let status = outcome.status();
        let result = match outcome {
            FetchOutcome::Success(results) => self.publish(results),
            FetchOutcome::NotFound => {
                tracing::warn!(job_id = %job_id, "Failed to fetch accumulators for job");
                Ok(())
            }
            FetchOutcome::TransientFailure(error) => {
                tracing::error!(
                    job_id = %job_id,
                    error = &error as &dyn std::error::Error,
                    "Error occurred while fetching accumulators"
                );
                Ok(())
            }
            FetchOutcome::Unsupported => Ok(()),
        };

        let status = if result.is_err() { "decode_error" } else { status };
        metric!(counter("refresh") += 1, "status" => status);

        result
    }

    fn publish(&self, results: SerializedAccumulators) -> Result<(), RefreshError> {
        let snapshot = decode_snapshot(results)?;

        metric!(gauge("snapshot.size") = snapshot.len() as u64);
        tracing::debug!(accumulators = ?snapshot, "Updated accumulators");

        self.snapshot.store(Arc::new(snapshot));
        Ok(())
    }
}

/// Decodes every serialized accumulator, keeping entries without a value.
fn decode_snapshot(results: SerializedAccumulators) -> Result<Snapshot, RefreshError> {
    results
        .into_iter()
        .map(|(name, value)| {
            let decoded = match value {
                Some(value) => match value.deserialize_value::<AccumulatorValue>() {
                    Ok(decoded) => Some(decoded),
                    Err(source) => return Err(RefreshError::Decode { name, source }),
                },
                None => None,
            };
            Ok((name, decoded))
        })
        .collect()
}
