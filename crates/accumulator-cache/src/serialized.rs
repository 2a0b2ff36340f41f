//! Opaque serialized accumulator payloads and their decoding.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// A decoded accumulator value.
///
/// The concrete type of an accumulator is only known to the job that publishes it, so values
/// are kept dynamically typed.
pub type AccumulatorValue = serde_json::Value;

/// An error that happens when an accumulator payload cannot be decoded.
///
/// Clones share the underlying error.
#[derive(Clone, Debug, Error)]
#[error("failed to decode accumulator value")]
pub struct DecodeError(#[source] Arc<serde_json::Error>);

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self(Arc::new(err))
    }
}

/// An accumulator value as it was serialized by the job runtime.
#[derive(Clone, PartialEq, Eq)]
pub struct SerializedValue(Vec<u8>);

impl SerializedValue {
    /// Wraps raw bytes produced by the job runtime.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Serializes `value` into the payload format understood by
    /// [`deserialize_value`](Self::deserialize_value).
    pub fn from_value<T: Serialize + ?Sized>(value: &T) -> Result<Self, DecodeError> {
        Ok(Self(serde_json::to_vec(value)?))
    }

    /// Decodes the payload into a typed value.
    pub fn deserialize_value<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        Ok(serde_json::from_slice(&self.0)?)
    }
}

impl fmt::Debug for SerializedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SerializedValue")
            .field(&format_args!("{} bytes", self.0.len()))
            .finish()
    }
}
