use std::time::Duration;

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use pulse_core::{HttpMethod, OutboundRequest, PayloadCategory};
use pulse_offline::{FsStorage, InMemoryStorage, Payload, PayloadCache, PayloadStorage};

const EXPIRY: Duration = Duration::from_secs(60 * 60);

fn request(category: PayloadCategory, body_len: usize) -> OutboundRequest {
    let url = match category {
        PayloadCategory::Analytics => "https://collector.example/tracking.rcv",
        PayloadCategory::Wcd => "https://collector.example/wcd.rcb",
        PayloadCategory::Error => "https://collector.example/err.rcv",
    };
    OutboundRequest::new(HttpMethod::Post, url).with_body(vec![b'x'; body_len])
}

fn fill<S: PayloadStorage>(cache: &PayloadCache<S>, count: usize) {
    let now = Utc::now();
    for i in 0..count {
        let category = PayloadCategory::ALL[i % PayloadCategory::ALL.len()];
        let created_at = now - chrono::Duration::seconds(i as i64);
        let mut payload = Payload::new_at(request(category, 512), category, created_at);
        cache.save(&mut payload).expect("fill cache");
    }
}

/// Pick-next cost grows with the number of stored records.
fn bench_pick_next(c: &mut Criterion) {
    let mut group = c.benchmark_group("pick_next");

    for count in [10usize, 100, 500] {
        group.throughput(Throughput::Elements(count as u64));

        let cache = PayloadCache::new(InMemoryStorage::new(), 300 * 1024 * 1024, EXPIRY);
        fill(&cache, count);
        group.bench_with_input(BenchmarkId::new("in_memory", count), &count, |b, _| {
            b.iter(|| black_box(cache.pick_next()));
        });

        let dir = tempfile::tempdir().expect("bench directory");
        let cache = PayloadCache::new(FsStorage::new(dir.path()), 300 * 1024 * 1024, EXPIRY);
        fill(&cache, count);
        group.bench_with_input(BenchmarkId::new("fs", count), &count, |b, _| {
            b.iter(|| black_box(cache.pick_next()));
        });
    }

    group.finish();
}

/// Save with the store already at its budget, so every call evicts.
fn bench_save_under_pressure(c: &mut Criterion) {
    let mut group = c.benchmark_group("save_under_pressure");

    for limit in [16 * 1024u64, 256 * 1024] {
        let cache = PayloadCache::new(InMemoryStorage::new(), limit, EXPIRY);
        fill(&cache, (limit / 512) as usize);

        group.bench_with_input(BenchmarkId::new("in_memory", limit), &limit, |b, _| {
            b.iter(|| {
                let mut payload = Payload::from_request(request(PayloadCategory::Error, 512));
                black_box(cache.save(&mut payload))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pick_next, bench_save_under_pressure);
criterion_main!(benches);
