//! Bounded, priority-ordered payload cache.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use pulse_core::{PayloadCategory, PayloadId};

use crate::config::CacheConfig;
use crate::error::{CacheError, PayloadError};
use crate::payload::Payload;
use crate::storage::{FsStorage, PayloadStorage};

/// Retry order: analytics first, then errors, then captured requests.
const PICK_ORDER: [PayloadCategory; 3] = [
    PayloadCategory::Analytics,
    PayloadCategory::Error,
    PayloadCategory::Wcd,
];

/// Eviction order among live payloads: errors are kept longest.
const EVICTION_ORDER: [PayloadCategory; 3] = [
    PayloadCategory::Analytics,
    PayloadCategory::Wcd,
    PayloadCategory::Error,
];

/// Durable retry queue for telemetry payloads.
///
/// Every operation holds an internal lock for its whole
/// list → read → decide → mutate sequence, so a single cache can be shared
/// across threads (e.g. behind an `Arc`). Only one cache instance should own
/// a given storage location.
#[derive(Debug)]
pub struct PayloadCache<S: PayloadStorage = FsStorage> {
    state: Mutex<CacheState<S>>,
    config: CacheConfig,
}

#[derive(Debug)]
struct CacheState<S> {
    storage: S,
    /// Payloads claimed by a running delivery; hidden from pickers.
    in_flight: HashSet<PayloadId>,
}

/// A payload claimed for delivery.
///
/// While the claim lives, `pick_next` and other claims skip the payload.
/// Dropping the claim releases it.
#[derive(Debug)]
pub(crate) struct Claim<'a, S: PayloadStorage> {
    cache: &'a PayloadCache<S>,
    payload: Payload,
}

/// Snapshot of the cache contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Stored records, including corrupt ones.
    pub records: usize,
    pub total_bytes: u64,
    pub analytics: usize,
    pub wcd: usize,
    pub errors: usize,
    /// Payloads `pick_next` could still return.
    pub retryable: usize,
    /// Payloads at or over the attempt ceiling.
    pub exhausted: usize,
    /// Payloads past their expiry.
    pub expired: usize,
    /// Records that cannot be decoded.
    pub corrupt: usize,
}

/// Result of a full storage scan.
#[derive(Debug, Default)]
struct Scan {
    payloads: Vec<Payload>,
    corrupt: Vec<String>,
}

impl PayloadCache<FsStorage> {
    /// Open a filesystem-backed cache rooted at `config.directory`.
    pub fn open(config: CacheConfig) -> Self {
        let storage = FsStorage::new(&config.directory);
        Self::with_config(storage, config)
    }
}

impl<S: PayloadStorage> PayloadCache<S> {
    /// Create a cache with the given budget. Both limits are clamped silently.
    pub fn new(storage: S, memory_limit_bytes: u64, expiry: Duration) -> Self {
        let config = CacheConfig::default()
            .with_memory_limit(memory_limit_bytes)
            .with_expiry(expiry);
        Self::with_config(storage, config)
    }

    pub fn with_config(storage: S, config: CacheConfig) -> Self {
        let clamped = config.clone().clamped();
        if clamped != config {
            debug!(
                requested_memory_limit = config.memory_limit_bytes,
                memory_limit = clamped.memory_limit_bytes,
                requested_expiry_ms = config.expiry.as_millis() as u64,
                expiry_ms = clamped.expiry.as_millis() as u64,
                max_attempts = clamped.max_attempts,
                "payload cache limits clamped"
            );
        }
        Self {
            state: Mutex::new(CacheState {
                storage,
                in_flight: HashSet::new(),
            }),
            config: clamped,
        }
    }

    pub fn memory_limit_bytes(&self) -> u64 {
        self.config.memory_limit_bytes
    }

    pub fn expiry(&self) -> Duration {
        self.config.expiry
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Persist `payload` (counting one more attempt), then evict until the
    /// store is back within its memory budget.
    pub fn save(&self, payload: &mut Payload) -> Result<(), CacheError> {
        let state = self.lock()?;
        self.store(&state.storage, payload)
    }

    /// The single best payload to retry now, if any.
    ///
    /// Exhausted and expired payloads are skipped; the rest are ordered by
    /// category (Analytics, Error, WCD) and then oldest first. The payload
    /// stays stored until [`PayloadCache::delete`] is called. Payloads being
    /// delivered by [`PayloadCache::retry_next`] are not offered.
    pub fn pick_next(&self) -> Result<Option<Payload>, CacheError> {
        let state = self.lock()?;
        let scan = scan(&state.storage)?;
        let next =
            select_next(&scan.payloads, &state.in_flight, Utc::now(), &self.config).cloned();
        if let Some(payload) = &next {
            debug!(id = %payload.id(), attempts = payload.attempts(), "picked payload for retry");
        }
        Ok(next)
    }

    /// Like [`PayloadCache::pick_next`], but marks the payload in flight
    /// until the returned claim is dropped.
    pub(crate) fn claim_next(&self) -> Result<Option<Claim<'_, S>>, CacheError> {
        let mut state = self.lock()?;
        let scan = scan(&state.storage)?;
        let Some(payload) =
            select_next(&scan.payloads, &state.in_flight, Utc::now(), &self.config).cloned()
        else {
            return Ok(None);
        };
        state.in_flight.insert(payload.id().clone());
        debug!(id = %payload.id(), attempts = payload.attempts(), "claimed payload for delivery");
        Ok(Some(Claim {
            cache: self,
            payload,
        }))
    }

    /// Remove a payload's record. Removing an absent record succeeds.
    pub fn delete(&self, payload: &Payload) -> Result<(), CacheError> {
        let state = self.lock()?;
        if payload.delete(&state.storage)? {
            debug!(id = %payload.id(), "payload deleted");
        }
        Ok(())
    }

    /// Number of stored records (corrupt records included).
    pub fn len(&self) -> Result<usize, CacheError> {
        let state = self.lock()?;
        Ok(state.storage.keys()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }

    /// Total stored bytes.
    pub fn total_size(&self) -> Result<u64, CacheError> {
        let state = self.lock()?;
        Ok(state.storage.total_size()?)
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let state = self.lock()?;
        let total_bytes = state.storage.total_size()?;
        let scan = scan(&state.storage)?;
        let now = Utc::now();

        let mut stats = CacheStats {
            records: scan.payloads.len() + scan.corrupt.len(),
            total_bytes,
            corrupt: scan.corrupt.len(),
            ..CacheStats::default()
        };

        for payload in &scan.payloads {
            match payload.category() {
                PayloadCategory::Analytics => stats.analytics += 1,
                PayloadCategory::Wcd => stats.wcd += 1,
                PayloadCategory::Error => stats.errors += 1,
            }
            let exhausted = payload.is_exhausted(self.max_attempts());
            let expired = payload.is_expired(now, self.expiry());
            if exhausted {
                stats.exhausted += 1;
            }
            if expired {
                stats.expired += 1;
            }
            if !exhausted && !expired {
                stats.retryable += 1;
            }
        }

        Ok(stats)
    }

    /// Delete every record that cannot be decoded. Returns how many were removed.
    pub fn purge_corrupt(&self) -> Result<usize, CacheError> {
        let state = self.lock()?;
        let scan = scan(&state.storage)?;
        remove_corrupt(&state.storage, &scan.corrupt)
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheState<S>>, CacheError> {
        self.state.lock().map_err(|_| CacheError::Poisoned)
    }

    /// Serialize `payload` and evict back under budget. Caller holds the lock.
    fn store(&self, storage: &S, payload: &mut Payload) -> Result<(), CacheError> {
        let written = payload.serialize(storage)?;
        debug!(
            id = %payload.id(),
            attempts = payload.attempts(),
            bytes = written,
            body_bytes = payload.request().body_len(),
            "payload saved"
        );
        self.clear_cache(storage, Utc::now())?;
        Ok(())
    }

    /// Evict until the total stored size fits the budget or nothing is removable.
    ///
    /// Returns the number of records removed.
    fn clear_cache(&self, storage: &S, now: DateTime<Utc>) -> Result<usize, CacheError> {
        let limit = self.memory_limit_bytes();
        let mut evicted = 0usize;

        loop {
            let total = storage.total_size()?;
            if total <= limit {
                break;
            }

            let scan = scan(storage)?;
            if !scan.corrupt.is_empty() {
                let removed = remove_corrupt(storage, &scan.corrupt)?;
                if removed > 0 {
                    evicted += removed;
                    continue;
                }
            }

            let Some(candidate) = select_removable(&scan.payloads, now, &self.config) else {
                debug!(total, limit, "payload cache over budget with nothing left to evict");
                break;
            };

            if !candidate.delete(storage)? {
                break;
            }
            evicted += 1;
            debug!(
                id = %candidate.id(),
                attempts = candidate.attempts(),
                created_at = %candidate.created_at(),
                total,
                limit,
                "evicted payload"
            );
        }

        Ok(evicted)
    }
}

impl<S: PayloadStorage> Claim<'_, S> {
    pub(crate) fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Remove the claimed payload's record.
    pub(crate) fn delete(&self) -> Result<(), CacheError> {
        self.cache.delete(&self.payload)
    }

    /// Save the claimed payload again (one more attempt), unless its record
    /// was removed while it was in flight. Returns whether it was saved.
    pub(crate) fn resave(&mut self) -> Result<bool, CacheError> {
        let cache = self.cache;
        let state = cache.lock()?;
        if !state.storage.exists(self.payload.id().as_str())? {
            return Ok(false);
        }
        cache.store(&state.storage, &mut self.payload)?;
        Ok(true)
    }
}

impl<S: PayloadStorage> Drop for Claim<'_, S> {
    fn drop(&mut self) {
        // Releasing never fails; a poisoned lock still holds a usable set.
        let mut state = self.cache.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.in_flight.remove(self.payload.id());
    }
}

/// Load every record. Unreadable records are reported separately instead of
/// failing the scan; storage errors abort it.
fn scan<S: PayloadStorage + ?Sized>(storage: &S) -> Result<Scan, CacheError> {
    let mut result = Scan::default();
    for key in storage.keys()? {
        match Payload::deserialize(storage, &key) {
            Ok(payload) => result.payloads.push(payload),
            Err(PayloadError::Missing(_)) => continue,
            Err(e) if e.is_corrupt_record() => {
                warn!(key = %key, error = %e, "skipping unreadable payload record");
                result.corrupt.push(key);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(result)
}

fn remove_corrupt<S: PayloadStorage + ?Sized>(
    storage: &S,
    keys: &[String],
) -> Result<usize, CacheError> {
    let mut removed = 0usize;
    for key in keys {
        if storage.remove(key)? {
            warn!(key = %key, "removed unreadable payload record");
            removed += 1;
        }
    }
    Ok(removed)
}

/// Oldest payload by creation time; ties broken by id for a stable order.
fn oldest<'a>(payloads: impl Iterator<Item = &'a Payload>) -> Option<&'a Payload> {
    payloads.min_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(b.id()))
    })
}

/// Pick-next policy over a scanned set.
fn select_next<'a>(
    payloads: &'a [Payload],
    in_flight: &HashSet<PayloadId>,
    now: DateTime<Utc>,
    config: &CacheConfig,
) -> Option<&'a Payload> {
    let retryable = |p: &Payload| {
        !in_flight.contains(p.id())
            && !p.is_exhausted(config.max_attempts)
            && !p.is_expired(now, config.expiry)
    };

    PICK_ORDER.iter().find_map(|category| {
        oldest(
            payloads
                .iter()
                .filter(|p| p.category() == *category && retryable(*p)),
        )
    })
}

/// Eviction policy over a scanned set: exhausted, expired, then by category.
fn select_removable<'a>(
    payloads: &'a [Payload],
    now: DateTime<Utc>,
    config: &CacheConfig,
) -> Option<&'a Payload> {
    if let Some(p) = oldest(payloads.iter().filter(|p| p.is_exhausted(config.max_attempts))) {
        return Some(p);
    }
    if let Some(p) = oldest(payloads.iter().filter(|p| p.is_expired(now, config.expiry))) {
        return Some(p);
    }
    EVICTION_ORDER
        .iter()
        .find_map(|category| oldest(payloads.iter().filter(|p| p.category() == *category)))
}
