//! Benchmarks for retention scoring, prefetch ranking and compression.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use smart_cache_tier::cache::analytics::{AccessRecorder, AccessType};
use smart_cache_tier::cache::compressor::Compressor;
use smart_cache_tier::cache::entry::{CacheEntry, Priority, Tier};
use smart_cache_tier::cache::evictor::Evictor;
use smart_cache_tier::cache::prefetcher::Prefetcher;
use smart_cache_tier::config::{CompressionConfig, EvictionConfig, PrefetchConfig};

fn bench_eviction_scoring(c: &mut Criterion) {
    let evictor = Evictor::new(EvictionConfig::default());
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
    let priorities = [Priority::High, Priority::Medium, Priority::Low];

    // Create 10,000 entries of varying age, popularity and priority.
    let entries: Vec<CacheEntry> = (0..10_000)
        .filter_map(|i| {
            let created = start + chrono::Duration::minutes(i as i64);
            let mut entry = CacheEntry::new(
                format!("entry-{i}"),
                vec![0u8; 64].into(),
                Tier::Ephemeral,
                created,
                Duration::from_secs(86_400),
            )?
            .with_priority(priorities[i % 3]);
            entry.access_count = (i % 97) as u64;
            Some(entry)
        })
        .collect();
    let now = start + chrono::Duration::days(12);

    c.bench_function("eviction_select_2500_from_10k", |b| {
        b.iter(|| {
            let victims = evictor.select_victims(black_box(entries.iter()), 2_500, now);
            black_box(victims);
        })
    });
}

fn bench_prefetch_ranking(c: &mut Criterion) {
    let prefetcher = Prefetcher::new(PrefetchConfig::default());
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

    let mut recorder = AccessRecorder::new(30);
    for i in 0..5_000u32 {
        let key = if i % 4 == 0 {
            format!("/static/asset-{i}.css")
        } else {
            format!("/page/{i}")
        };
        for hit in 0..(i % 40) {
            let at = start + chrono::Duration::hours(((i + hit) % 24) as i64);
            recorder.record(&key, AccessType::View, at);
        }
    }
    let now = start + chrono::Duration::days(1) + chrono::Duration::hours(9);

    c.bench_function("prefetch_rank_5k_resources", |b| {
        b.iter(|| {
            let ranked = prefetcher.rank(black_box(recorder.iter()), None, now);
            black_box(ranked);
        })
    });
}

fn bench_compression(c: &mut Criterion) {
    let compressor = Compressor::new(CompressionConfig::default());

    // A serialized record of roughly 70KB.
    let data = serde_json::to_vec(&vec!["timetable"; 6_000]).unwrap_or_default();

    c.bench_function("zstd_encode_record", |b| {
        b.iter(|| {
            let encoded = compressor.encode(black_box(&data));
            black_box(encoded);
        })
    });
}

criterion_group!(
    benches,
    bench_eviction_scoring,
    bench_compression,
    bench_prefetch_ranking,
);
criterion_main!(benches);
