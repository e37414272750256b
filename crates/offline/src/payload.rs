//! Retained telemetry payloads and their durable record encoding.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pulse_core::{OutboundRequest, PayloadCategory, PayloadId};

use crate::error::PayloadError;
use crate::storage::PayloadStorage;

/// One outbound telemetry item waiting to be (re)delivered.
///
/// Everything except the attempt counter is fixed at construction. The
/// counter only moves through [`Payload::serialize`], so every persistence
/// event is counted, including the first enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    id: PayloadId,
    category: PayloadCategory,
    request: OutboundRequest,
    created_at: DateTime<Utc>,
    attempts: u32,
}

/// Durable record layout (encoding side).
#[derive(Serialize)]
struct PayloadRecordRef<'a> {
    id: &'a PayloadId,
    url: &'a str,
    #[serde(rename = "type")]
    category: PayloadCategory,
    data: &'a OutboundRequest,
    #[serde(rename = "createdDate")]
    created_at: DateTime<Utc>,
    #[serde(rename = "payloadAttempts")]
    attempts: u32,
}

/// Durable record layout (decoding side).
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PayloadRecord {
    id: PayloadId,
    url: String,
    #[serde(rename = "type")]
    category: PayloadCategory,
    data: OutboundRequest,
    #[serde(rename = "createdDate")]
    created_at: DateTime<Utc>,
    #[serde(rename = "payloadAttempts")]
    attempts: u32,
}

impl Payload {
    /// Create a payload for `request` with an explicit category.
    pub fn new(request: OutboundRequest, category: PayloadCategory) -> Self {
        Self::new_at(request, category, Utc::now())
    }

    /// Create a payload with an explicit creation timestamp.
    ///
    /// Used when the request was produced earlier than it is cached (legacy
    /// buffers, replays). The timestamp is fixed for the payload's lifetime.
    pub fn new_at(
        request: OutboundRequest,
        category: PayloadCategory,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PayloadId::generate(category),
            category,
            request,
            created_at,
            attempts: 0,
        }
    }

    /// Create a payload, classifying it from the request URL.
    pub fn from_request(request: OutboundRequest) -> Self {
        Self::from_request_at(request, Utc::now())
    }

    pub fn from_request_at(request: OutboundRequest, created_at: DateTime<Utc>) -> Self {
        let category = request.inferred_category();
        Self::new_at(request, category, created_at)
    }

    pub fn id(&self) -> &PayloadId {
        &self.id
    }

    pub fn category(&self) -> PayloadCategory {
        self.category
    }

    pub fn request(&self) -> &OutboundRequest {
        &self.request
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of times this payload has been persisted.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// True once the payload has been persisted `max_attempts` times.
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.attempts >= max_attempts
    }

    /// True when the payload is strictly older than `expiry` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, expiry: Duration) -> bool {
        let age_ms = (now - self.created_at).num_milliseconds();
        let expiry_ms = i64::try_from(expiry.as_millis()).unwrap_or(i64::MAX);
        age_ms > expiry_ms
    }

    /// Encode the current state as a durable record.
    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        let record = PayloadRecordRef {
            id: &self.id,
            url: &self.request.url,
            category: self.category,
            data: &self.request,
            created_at: self.created_at,
            attempts: self.attempts,
        };
        serde_json::to_vec(&record).map_err(|source| PayloadError::Encode {
            id: self.id.clone(),
            source,
        })
    }

    /// Decode a durable record read from `key`.
    pub fn decode(key: &str, bytes: &[u8]) -> Result<Self, PayloadError> {
        let record: PayloadRecord =
            serde_json::from_slice(bytes).map_err(|source| PayloadError::Decode {
                key: key.to_string(),
                source,
            })?;

        let inconsistent = |detail: String| PayloadError::Inconsistent {
            key: key.to_string(),
            detail,
        };

        if record.id.as_str() != key {
            return Err(inconsistent(format!("record id {} stored under another key", record.id)));
        }
        if record.id.category() != record.category {
            return Err(inconsistent(format!(
                "id prefix {} disagrees with type {}",
                record.id.category(),
                record.category
            )));
        }
        if record.url != record.data.url {
            return Err(inconsistent("url disagrees with request url".to_string()));
        }

        Ok(Self {
            id: record.id,
            category: record.category,
            request: record.data,
            created_at: record.created_at,
            attempts: record.attempts,
        })
    }

    /// Count one more attempt and persist the record under the payload id.
    ///
    /// The counter is bumped before encoding and stays bumped if the write
    /// fails. Returns the number of bytes written.
    pub fn serialize<S>(&mut self, storage: &S) -> Result<u64, PayloadError>
    where
        S: PayloadStorage + ?Sized,
    {
        self.attempts = self.attempts.saturating_add(1);
        let bytes = self.encode()?;
        storage.write(self.id.as_str(), &bytes)?;
        Ok(bytes.len() as u64)
    }

    /// Load the record stored under `key`.
    pub fn deserialize<S>(storage: &S, key: &str) -> Result<Self, PayloadError>
    where
        S: PayloadStorage + ?Sized,
    {
        let bytes = storage
            .read(key)?
            .ok_or_else(|| PayloadError::Missing(key.to_string()))?;
        Self::decode(key, &bytes)
    }

    /// Remove the durable record. Returns whether a record was removed;
    /// an already-absent record is not an error.
    pub fn delete<S>(&self, storage: &S) -> Result<bool, PayloadError>
    where
        S: PayloadStorage + ?Sized,
    {
        Ok(storage.remove(self.id.as_str())?)
    }
}
