use std::collections::HashMap;
use std::fmt;

use crate::serialized::AccumulatorValue;

/// Identifier of the job whose accumulators are being tracked.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The complete set of accumulators as of the most recent successful fetch.
///
/// An accumulator that was published without a value maps to `None`.
pub type Snapshot = HashMap<String, Option<AccumulatorValue>>;
