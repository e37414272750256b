//! Payload and cache error types.

use pulse_core::PayloadId;
use thiserror::Error;

use crate::storage::StorageError;

/// Failure encoding, decoding or persisting a single payload record.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to encode payload {id}: {source}")]
    Encode {
        id: PayloadId,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode payload record {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The record decoded but contradicts itself or its storage key.
    #[error("inconsistent payload record {key}: {detail}")]
    Inconsistent { key: String, detail: String },

    #[error("payload record not found: {0}")]
    Missing(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PayloadError {
    /// True when the record exists but can never be turned back into a payload.
    pub fn is_corrupt_record(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::Inconsistent { .. })
    }
}

/// Payload cache error.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A previous holder of the cache lock panicked mid-operation.
    #[error("payload cache lock poisoned")]
    Poisoned,
}
