//! Upstream targets that can answer accumulator requests for a job.
//!
//! There are two kinds of upstream targets: a [`JobRuntime`] that is reachable in-process, and
//! a remote [`JobClient`]. Only the former has a defined request protocol.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

use crate::serialized::SerializedValue;
use crate::types::JobId;

/// Serialized accumulator results, as returned by a [`JobRuntime`].
pub type SerializedAccumulators = HashMap<String, Option<SerializedValue>>;

/// The answer of a [`JobRuntime`] to an accumulator request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccumulatorResponse {
    /// The runtime knows the job and returned its current accumulators.
    Found(SerializedAccumulators),
    /// The runtime has no accumulator results for the job.
    NotFound,
}

/// A transient failure while talking to the upstream target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The request failed due to a communication problem.
    ///
    /// The attached string describes the underlying fault.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// The outcome of a single fetch against the upstream target.
#[derive(Debug)]
pub enum FetchOutcome {
    Success(SerializedAccumulators),
    NotFound,
    TransientFailure(FetchError),
    /// The backend has no request protocol for accumulators.
    Unsupported,
}

impl FetchOutcome {
    /// The status tag under which this outcome is reported in metrics.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::NotFound => "notfound",
            Self::TransientFailure(FetchError::Timeout(_)) => "timeout",
            Self::TransientFailure(FetchError::Transport(_)) => "transport",
            Self::Unsupported => "unsupported",
        }
    }
}

/// A handle to the job runtime that owns accumulator state.
#[async_trait]
pub trait JobRuntime: fmt::Debug + Send + Sync {
    /// Requests the current accumulator results for `job_id`.
    ///
    /// This is a single round trip; the caller bounds it with its own timeout.
    async fn request_accumulator_results(
        &self,
        job_id: &JobId,
    ) -> Result<AccumulatorResponse, FetchError>;
}

/// A handle to a remote client of the job runtime.
///
/// Fetching accumulators through a remote client is not supported, so the handle is only
/// used to describe itself in logs.
pub trait JobClient: fmt::Debug + Send + Sync {
    fn describe(&self) -> String;
}

/// The upstream target configured for an accumulator cache.
#[derive(Clone, Debug)]
pub enum Backend {
    Local(Arc<dyn JobRuntime>),
    Remote(Arc<dyn JobClient>),
}

impl Backend {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Remote(_) => "remote",
        }
    }

    /// Requests the accumulator results of `job_id`, bounded by `timeout`.
    ///
    /// Every result of the round trip, including an elapsed timeout, is mapped to a
    /// [`FetchOutcome`]. Remote clients always yield [`FetchOutcome::Unsupported`] without
    /// issuing a request.
    pub async fn fetch(&self, job_id: &JobId, timeout: Duration) -> FetchOutcome {
        match self {
            Self::Local(runtime) => fetch_local(runtime.as_ref(), job_id, timeout).await,
            Self::Remote(client) => {
                tracing::debug!(
                    job_id = %job_id,
                    client = %client.describe(),
                    "Fetching accumulators through a remote client is not supported"
                );
                FetchOutcome::Unsupported
            }
        }
    }
}

async fn fetch_local(
    runtime: &dyn JobRuntime,
    job_id: &JobId,
    timeout: Duration,
) -> FetchOutcome {
    let start = Instant::now();
    let request = runtime.request_accumulator_results(job_id);

    let outcome = match tokio::time::timeout(timeout, request).await {
        Err(_) => FetchOutcome::TransientFailure(FetchError::Timeout(timeout)),
        Ok(Err(e)) => FetchOutcome::TransientFailure(e),
        Ok(Ok(AccumulatorResponse::Found(results))) => FetchOutcome::Success(results),
        Ok(Ok(AccumulatorResponse::NotFound)) => FetchOutcome::NotFound,
    };

    metric!(
        timer("fetch.duration") = start.elapsed(),
        "status" => outcome.status(),
    );

    outcome
}
