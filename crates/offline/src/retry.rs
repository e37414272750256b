//! Single-step delivery driver.
//!
//! The uploader itself lives outside this crate. It plugs in through
//! [`PayloadSender`]; [`PayloadCache::retry_next`] runs one pick → send →
//! acknowledge cycle. Scheduling and backoff between cycles are the
//! caller's business.

use pulse_core::{OutboundRequest, PayloadId};
use thiserror::Error;
use tracing::debug;

use crate::cache::PayloadCache;
use crate::error::CacheError;
use crate::storage::PayloadStorage;

/// Delivery failure reported by a sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Worth retrying later (offline, timeout, 5xx).
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// The collector will never accept this payload (4xx).
    #[error("payload rejected by collector: {0}")]
    Rejected(String),
}

/// Delivers one outbound request.
pub trait PayloadSender {
    fn send(&self, request: &OutboundRequest) -> Result<(), SendError>;
}

impl<F> PayloadSender for F
where
    F: Fn(&OutboundRequest) -> Result<(), SendError>,
{
    fn send(&self, request: &OutboundRequest) -> Result<(), SendError> {
        self(request)
    }
}

/// What one retry cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Nothing retryable in the cache.
    Idle,
    /// Sent and removed.
    Delivered(PayloadId),
    /// Send failed transiently; re-saved with one more attempt.
    Deferred { id: PayloadId, attempts: u32 },
    /// Rejected permanently; removed without delivery.
    Dropped(PayloadId),
    /// Send failed transiently, but the record was evicted or deleted while
    /// the send ran; it is not brought back.
    Evicted(PayloadId),
}

impl<S: PayloadStorage> PayloadCache<S> {
    /// Pick the next payload, hand it to `sender`, and record the outcome.
    ///
    /// The cache lock is not held while `sender` runs. The payload is claimed
    /// for the duration of the send, so concurrent callers (and `pick_next`)
    /// never receive it twice.
    pub fn retry_next<P>(&self, sender: &P) -> Result<RetryOutcome, CacheError>
    where
        P: PayloadSender + ?Sized,
    {
        let Some(mut claim) = self.claim_next()? else {
            return Ok(RetryOutcome::Idle);
        };
        let id = claim.payload().id().clone();

        match sender.send(claim.payload().request()) {
            Ok(()) => {
                claim.delete()?;
                Ok(RetryOutcome::Delivered(id))
            }
            Err(SendError::Rejected(reason)) => {
                debug!(id = %id, reason = %reason, "dropping rejected payload");
                claim.delete()?;
                Ok(RetryOutcome::Dropped(id))
            }
            Err(SendError::Transient(reason)) => {
                if !claim.resave()? {
                    debug!(id = %id, reason = %reason, "payload removed during delivery");
                    return Ok(RetryOutcome::Evicted(id));
                }
                debug!(id = %id, reason = %reason, "deferring payload");
                Ok(RetryOutcome::Deferred {
                    id,
                    attempts: claim.payload().attempts(),
                })
            }
        }
    }
}
