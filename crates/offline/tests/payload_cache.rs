//! End-to-end cache behavior against real storage adapters.

use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use proptest::prelude::*;

use pulse_core::{HttpMethod, OutboundRequest, PayloadCategory};
use pulse_offline::storage::StorageOp;
use pulse_offline::{
    CacheConfig, CacheError, FsStorage, InMemoryStorage, Payload, PayloadCache, PayloadError,
    PayloadStorage, RetryOutcome, SendError, StorageError, migrate_legacy_requests,
};

const ANALYTICS_URL: &str = "https://collector.example/tracking.rcv";
const WCD_URL: &str = "https://collector.example/wcd.rcb";
const ERROR_URL: &str = "https://collector.example/err.rcv";

fn url_for(category: PayloadCategory) -> &'static str {
    match category {
        PayloadCategory::Analytics => ANALYTICS_URL,
        PayloadCategory::Wcd => WCD_URL,
        PayloadCategory::Error => ERROR_URL,
    }
}

fn payload_with_body(url: &str, body_len: usize, created_at: DateTime<Utc>) -> Payload {
    let request = OutboundRequest::new(HttpMethod::Post, url).with_body(vec![b'x'; body_len]);
    Payload::from_request_at(request, created_at)
}

/// A payload whose encoded record lands within four bytes below `target`.
fn sized_payload(url: &str, target: usize, created_at: DateTime<Utc>) -> Payload {
    let mut body_len = (target * 3 / 4).saturating_sub(400);
    let mut best = payload_with_body(url, 0, created_at);
    loop {
        let candidate = payload_with_body(url, body_len, created_at);
        if candidate.encode().unwrap().len() > target {
            return best;
        }
        best = candidate;
        body_len += 1;
    }
}

fn ago(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    now - chrono::Duration::minutes(minutes)
}

/// Storage that records the order in which keys are removed.
#[derive(Debug, Default)]
struct RecordingStorage {
    inner: InMemoryStorage,
    removed: Mutex<Vec<String>>,
}

impl RecordingStorage {
    fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

impl PayloadStorage for RecordingStorage {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.inner.write(key, bytes)
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.read(key)
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key)
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let removed = self.inner.remove(key)?;
        if removed {
            self.removed.lock().unwrap().push(key.to_string());
        }
        Ok(removed)
    }

    fn size_of(&self, key: &str) -> Result<Option<u64>, StorageError> {
        self.inner.size_of(key)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.inner.keys()
    }
}

/// Storage whose writes or listings can be switched to fail.
#[derive(Debug, Default)]
struct FailingStorage {
    inner: InMemoryStorage,
    fail_writes: AtomicBool,
    fail_listing: AtomicBool,
}

impl FailingStorage {
    const DIR: &'static str = "/var/cache/pulse-offline";

    fn fail(op: StorageOp) -> StorageError {
        StorageError::io(op, Self::DIR, io::Error::other("device unavailable"))
    }
}

impl PayloadStorage for FailingStorage {
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::fail(StorageOp::Write));
        }
        self.inner.write(key, bytes)
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.read(key)
    }

    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.exists(key)
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.inner.remove(key)
    }

    fn size_of(&self, key: &str) -> Result<Option<u64>, StorageError> {
        self.inner.size_of(key)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Self::fail(StorageOp::List));
        }
        self.inner.keys()
    }
}

#[test]
fn oldest_analytics_payload_is_evicted_when_budget_is_exceeded() {
    pulse_observability::init_for_tests();

    let dir = tempfile::tempdir().unwrap();
    let cache = PayloadCache::new(
        FsStorage::new(dir.path()),
        10_000,
        Duration::from_secs(24 * 60 * 60),
    );
    let now = Utc::now();

    let mut first = sized_payload(ANALYTICS_URL, 4_000, ago(now, 3));
    let mut second = sized_payload(ANALYTICS_URL, 4_000, ago(now, 2));
    let mut third = sized_payload(ANALYTICS_URL, 4_000, ago(now, 1));

    cache.save(&mut first).unwrap();
    cache.save(&mut second).unwrap();
    assert_eq!(cache.len().unwrap(), 2);

    cache.save(&mut third).unwrap();

    assert_eq!(cache.len().unwrap(), 2);
    assert!(cache.total_size().unwrap() <= 10_000);
    assert!(!dir.path().join(format!("{}.json", first.id())).exists());
    assert!(dir.path().join(format!("{}.json", second.id())).exists());
    assert!(dir.path().join(format!("{}.json", third.id())).exists());
}

#[test]
fn eviction_walks_exhausted_expired_then_categories() {
    pulse_observability::init_for_tests();

    let storage = Arc::new(RecordingStorage::default());
    let now = Utc::now();

    let mut exhausted = sized_payload(ERROR_URL, 2_450, ago(now, 5));
    for _ in 0..3 {
        exhausted.serialize(&*storage).unwrap();
    }
    let mut expired = sized_payload(WCD_URL, 2_450, ago(now, 120));
    let mut analytics = sized_payload(ANALYTICS_URL, 2_450, ago(now, 10));
    let mut wcd = sized_payload(WCD_URL, 2_450, ago(now, 20));
    let mut error = sized_payload(ERROR_URL, 2_450, ago(now, 30));
    for payload in [&mut expired, &mut analytics, &mut wcd, &mut error] {
        payload.serialize(&*storage).unwrap();
    }

    let config = CacheConfig::default()
        .with_memory_limit(5 * 1024)
        .with_expiry(Duration::from_secs(60 * 60))
        .with_max_attempts(3);
    let cache = PayloadCache::with_config(Arc::clone(&storage), config);

    let mut newest = sized_payload(ERROR_URL, 2_450, now);
    cache.save(&mut newest).unwrap();
    assert_eq!(cache.len().unwrap(), 2);

    let mut latest = sized_payload(ERROR_URL, 2_450, now + chrono::Duration::seconds(1));
    cache.save(&mut latest).unwrap();

    let expected: Vec<String> = [&exhausted, &expired, &analytics, &wcd, &error]
        .iter()
        .map(|p| p.id().to_string())
        .collect();
    assert_eq!(storage.removed(), expected);
    assert!(cache.total_size().unwrap() <= 5 * 1024);
}

#[test]
fn records_survive_reopening_the_cache() {
    pulse_observability::init_for_tests();

    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::default().with_directory(dir.path());

    let mut payload = Payload::from_request(
        OutboundRequest::new(HttpMethod::Post, WCD_URL).with_body(b"{\"frames\":[]}".to_vec()),
    );
    {
        let cache = PayloadCache::open(config.clone());
        cache.save(&mut payload).unwrap();
    }

    let reopened = PayloadCache::open(config);
    let picked = reopened.pick_next().unwrap().unwrap();
    assert_eq!(picked, payload);
    assert_eq!(picked.category(), PayloadCategory::Wcd);
    assert_eq!(picked.attempts(), 1);
}

#[test]
fn corrupt_files_are_evicted_before_valid_payloads() {
    pulse_observability::init_for_tests();

    let dir = tempfile::tempdir().unwrap();
    let junk = dir.path().join("ANALYTICS_broken.json");
    fs::write(&junk, vec![b'{'; 6_000]).unwrap();

    let cache = PayloadCache::new(
        FsStorage::new(dir.path()),
        5 * 1024,
        Duration::from_secs(60 * 60),
    );
    assert_eq!(cache.stats().unwrap().corrupt, 1);
    assert_eq!(cache.pick_next().unwrap(), None);

    let mut payload = Payload::from_request(OutboundRequest::new(HttpMethod::Post, ERROR_URL));
    cache.save(&mut payload).unwrap();

    assert!(!junk.exists());
    assert_eq!(cache.len().unwrap(), 1);
    assert_eq!(cache.pick_next().unwrap().as_ref().map(Payload::id), Some(payload.id()));
}

#[test]
fn foreign_files_in_the_directory_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("notes.txt"), b"not a record").unwrap();

    let cache = PayloadCache::new(
        FsStorage::new(dir.path()),
        5 * 1024,
        Duration::from_secs(60 * 60),
    );
    assert!(cache.is_empty().unwrap());
    assert_eq!(cache.total_size().unwrap(), 0);
    assert!(dir.path().join("notes.txt").exists());
}

#[test]
fn concurrent_savers_stay_within_budget() {
    pulse_observability::init_for_tests();

    let limit = 8 * 1024;
    let cache = Arc::new(PayloadCache::new(
        InMemoryStorage::new(),
        limit,
        Duration::from_secs(60 * 60),
    ));

    let handles: Vec<_> = PayloadCategory::ALL
        .iter()
        .copied()
        .chain([PayloadCategory::Analytics])
        .map(|category| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for _ in 0..25 {
                    let mut payload = payload_with_body(url_for(category), 700, Utc::now());
                    cache.save(&mut payload).unwrap();
                    assert!(cache.total_size().unwrap() <= limit);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(!cache.is_empty().unwrap());
    assert!(cache.total_size().unwrap() <= limit);
}

#[test]
fn drains_a_migrated_buffer_through_the_retry_driver() {
    pulse_observability::init_for_tests();

    let dir = tempfile::tempdir().unwrap();
    let legacy = dir.path().join("failed-requests");
    let lines: Vec<String> = [ERROR_URL, ANALYTICS_URL, WCD_URL]
        .iter()
        .map(|url| serde_json::to_string(&OutboundRequest::new(HttpMethod::Post, *url)).unwrap())
        .collect();
    fs::write(&legacy, lines.join("\n")).unwrap();

    let cache = PayloadCache::open(CacheConfig::default().with_directory(dir.path().join("cache")));
    let report = migrate_legacy_requests(&legacy, &cache).unwrap();
    assert_eq!(report.migrated, 3);

    let delivered = Mutex::new(Vec::new());
    let sender = |request: &OutboundRequest| -> Result<(), SendError> {
        delivered.lock().unwrap().push(request.url.clone());
        Ok(())
    };
    while cache.retry_next(&sender).unwrap() != RetryOutcome::Idle {}

    assert_eq!(
        delivered.into_inner().unwrap(),
        vec![ANALYTICS_URL.to_string(), ERROR_URL.to_string(), WCD_URL.to_string()]
    );
    assert!(cache.is_empty().unwrap());
}

#[test]
fn failed_write_surfaces_from_save() {
    pulse_observability::init_for_tests();

    let storage = Arc::new(FailingStorage::default());
    let cache = PayloadCache::new(Arc::clone(&storage), 5 * 1024, Duration::from_secs(60 * 60));
    storage.fail_writes.store(true, Ordering::SeqCst);

    let mut payload = Payload::from_request(OutboundRequest::new(HttpMethod::Post, ERROR_URL));
    let err = cache.save(&mut payload).unwrap_err();

    match &err {
        CacheError::Payload(PayloadError::Storage(StorageError::Io { op, path, .. })) => {
            assert_eq!(*op, StorageOp::Write);
            assert_eq!(path.to_str(), Some(FailingStorage::DIR));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains(FailingStorage::DIR));
    assert!(cache.is_empty().unwrap());
}

#[test]
fn failed_listing_aborts_eviction_and_pick() {
    pulse_observability::init_for_tests();

    let storage = Arc::new(FailingStorage::default());
    let cache = PayloadCache::new(Arc::clone(&storage), 5 * 1024, Duration::from_secs(60 * 60));
    let mut kept = payload_with_body(ANALYTICS_URL, 3_000, ago(Utc::now(), 1));
    cache.save(&mut kept).unwrap();

    storage.fail_listing.store(true, Ordering::SeqCst);
    let mut overflow = payload_with_body(ANALYTICS_URL, 3_000, Utc::now());
    let err = cache.save(&mut overflow).unwrap_err();
    assert!(matches!(
        err,
        CacheError::Storage(StorageError::Io { op: StorageOp::List, .. })
    ));

    let err = cache.pick_next().unwrap_err();
    assert!(matches!(
        err,
        CacheError::Storage(StorageError::Io { op: StorageOp::List, .. })
    ));

    // Nothing was evicted: both records are still stored, over budget.
    storage.fail_listing.store(false, Ordering::SeqCst);
    assert_eq!(cache.len().unwrap(), 2);
    assert!(cache.total_size().unwrap() > 5 * 1024);
}

#[test]
fn unwritable_directory_surfaces_from_save() {
    let root = tempfile::tempdir().unwrap();
    let blocker = root.path().join("blocker");
    fs::write(&blocker, b"not a directory").unwrap();

    let cache = PayloadCache::open(CacheConfig::default().with_directory(&blocker));
    let mut payload = Payload::from_request(OutboundRequest::new(HttpMethod::Post, WCD_URL));
    let err = cache.save(&mut payload).unwrap_err();

    match err {
        CacheError::Payload(PayloadError::Storage(StorageError::Io { op, path, .. })) => {
            assert_eq!(op, StorageOp::CreateDir);
            assert_eq!(path, blocker);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

fn category_strategy() -> impl Strategy<Value = PayloadCategory> {
    prop_oneof![
        Just(PayloadCategory::Analytics),
        Just(PayloadCategory::Wcd),
        Just(PayloadCategory::Error),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn total_size_never_exceeds_budget(
        limit in 5_120u64..20_000,
        saves in prop::collection::vec((category_strategy(), 0usize..4_000, 0i64..240), 1..30),
    ) {
        let cache = PayloadCache::new(InMemoryStorage::new(), limit, Duration::from_secs(60 * 60));
        let now = Utc::now();

        for (category, body_len, age_minutes) in saves {
            let mut payload = payload_with_body(url_for(category), body_len, ago(now, age_minutes));
            cache.save(&mut payload).unwrap();
            prop_assert!(cache.total_size().unwrap() <= limit);
        }
    }
}
