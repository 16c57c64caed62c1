//! Integration tests for the storage adapter surface of the cache engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use smart_cache_tier::cache::clock::ManualClock;
use smart_cache_tier::cache::engine::{CacheEngine, ResponseOptions, Visibility};
use smart_cache_tier::cache::entry::{CacheEntry, GetOptions, Payload, SetOptions, Tier};
use smart_cache_tier::config::Config;
use smart_cache_tier::storage::durable::{DurableStore, MemoryStringStorage, StringStorage};
use smart_cache_tier::storage::ephemeral::EphemeralStore;
use smart_cache_tier::storage::{QuotaState, StoreError, TierStore};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn setup() -> (Arc<ManualClock>, CacheEngine) {
    let clock = Arc::new(ManualClock::new(start()));
    let engine = CacheEngine::in_memory(Config::default(), clock.clone());
    (clock, engine)
}

/// Reads the value, then suspends once before returning it.
struct SlowReads(MemoryStringStorage);

#[async_trait]
impl StringStorage for SlowReads {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self.0.get_item(key).await;
        tokio::task::yield_now().await;
        value
    }
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.0.set_item(key, value).await
    }
    async fn replace_item(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        self.0.replace_item(key, expected, value).await
    }
    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.0.remove_item(key).await
    }
    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.0.keys().await
    }
}

fn slow_page_engine() -> CacheEngine {
    let storage = Arc::new(SlowReads(MemoryStringStorage::unbounded()));
    CacheEngine::new(Config::default(), Arc::new(ManualClock::new(start())))
        .with_store(Arc::new(DurableStore::page("sc_page_", storage)))
}

/// A tier whose backend is missing from the environment.
struct UnavailableStore(Tier);

#[async_trait]
impl TierStore for UnavailableStore {
    fn tier(&self) -> Tier {
        self.0
    }
    async fn put(&self, _: CacheEntry) -> Result<(), StoreError> {
        Err(StoreError::Unavailable(self.0))
    }
    async fn touch(&self, _: &str, _: u64) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable(self.0))
    }
    async fn load(&self, _: &str) -> Result<Option<CacheEntry>, StoreError> {
        Err(StoreError::Unavailable(self.0))
    }
    async fn remove(&self, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable(self.0))
    }
    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Unavailable(self.0))
    }
    async fn entries(&self) -> Result<Vec<CacheEntry>, StoreError> {
        Err(StoreError::Unavailable(self.0))
    }
    async fn clear(&self) -> Result<usize, StoreError> {
        Err(StoreError::Unavailable(self.0))
    }
    async fn quota(&self) -> Result<Option<QuotaState>, StoreError> {
        Err(StoreError::Unavailable(self.0))
    }
}

#[tokio::test]
async fn test_roundtrip_in_every_tier() {
    let (_clock, engine) = setup();

    for tier in Tier::ALL {
        let key = format!("key-{tier}");
        let value = json!({"tier": tier.to_string(), "items": [1, 2, 3]});
        assert!(
            engine
                .set(&key, value.clone(), SetOptions::default().tier(tier))
                .await
        );
        assert_eq!(
            engine.get(&key, GetOptions::only(tier)).await,
            Some(Payload::Json(value))
        );
    }

    let bytes = vec![0u8, 159, 146, 150];
    let options = SetOptions::default().tier(Tier::TransactionalIndexed);
    assert!(engine.set("raw", bytes.clone(), options).await);
    assert_eq!(
        engine.get("raw", GetOptions::default()).await,
        Some(Payload::Bytes(bytes))
    );
}

#[tokio::test]
async fn test_lazy_expiry_scenario() {
    let (clock, engine) = setup();

    let options = SetOptions::default().ttl(Duration::from_millis(1000));
    assert!(engine.set("x", json!({"v": 1}), options).await);

    clock.advance(chrono::Duration::milliseconds(10));
    assert_eq!(
        engine.get("x", GetOptions::default()).await,
        Some(Payload::Json(json!({"v": 1})))
    );

    // No sweep has run; the read itself must see the entry as stale.
    clock.advance(chrono::Duration::milliseconds(1090));
    assert_eq!(engine.get("x", GetOptions::default()).await, None);
    assert!(!engine.has("x", None).await);

    let stats = engine.get_stats().await;
    assert_eq!(stats.per_tier[&Tier::Ephemeral].entry_count, 0);
    assert_eq!(stats.counters.expirations, 1);
}

#[tokio::test]
async fn test_expired_entries_in_durable_tier() {
    let (clock, engine) = setup();

    let options = SetOptions::default()
        .tier(Tier::DurableSessionScoped)
        .ttl(Duration::from_secs(60));
    engine.set("timetable", json!("week 12"), options).await;

    clock.advance(chrono::Duration::seconds(61));
    assert!(!engine.has("timetable", Some(Tier::DurableSessionScoped)).await);
    assert!(engine.get("timetable", GetOptions::default()).await.is_none());
}

#[tokio::test]
async fn test_corrupted_record_is_a_miss_and_repaired() {
    let clock = Arc::new(ManualClock::new(start()));
    let storage = Arc::new(MemoryStringStorage::unbounded());
    let engine = CacheEngine::new(Config::default(), clock)
        .with_store(Arc::new(DurableStore::page("sc_page_", storage.clone())));

    storage.set_item("sc_page_news", "{not json").await.unwrap();
    storage.set_item("unrelated", "kept").await.unwrap();

    assert!(engine.get("news", GetOptions::default()).await.is_none());
    assert!(storage.get_item("sc_page_news").await.unwrap().is_none());
    assert_eq!(
        storage.get_item("unrelated").await.unwrap().as_deref(),
        Some("kept")
    );

    let stats = engine.get_stats().await;
    assert_eq!(stats.counters.corrupted_repairs, 1);
    assert_eq!(stats.counters.misses, 1);
}

#[tokio::test]
async fn test_unavailable_tier_degrades() {
    let clock = Arc::new(ManualClock::new(start()));
    let engine = CacheEngine::new(Config::default(), clock)
        .with_store(Arc::new(UnavailableStore(Tier::Ephemeral)))
        .with_store(Arc::new(DurableStore::page(
            "sc_page_",
            Arc::new(MemoryStringStorage::unbounded()),
        )));

    assert!(engine.set("menu", json!("pasta"), SetOptions::default()).await);
    assert_eq!(
        engine.get("menu", GetOptions::default()).await,
        Some(Payload::Json(json!("pasta")))
    );

    // Nothing slower than the page tier is attached.
    let only_broken = CacheEngine::new(Config::default(), Arc::new(ManualClock::new(start())))
        .with_store(Arc::new(UnavailableStore(Tier::Ephemeral)));
    assert!(!only_broken.set("menu", json!("pasta"), SetOptions::default()).await);
    assert!(only_broken.get("menu", GetOptions::default()).await.is_none());
    let report = only_broken.sweep_expired().await;
    assert_eq!(report.failed, vec![Tier::Ephemeral]);
}

#[tokio::test]
async fn test_read_does_not_undo_concurrent_write() {
    let engine = slow_page_engine();
    let page = || SetOptions::default().tier(Tier::DurablePageScoped);
    assert!(engine.set("k", json!("v1"), page()).await);

    let (read, written) = tokio::join!(
        engine.get("k", GetOptions::default()),
        engine.set("k", json!("v2"), page())
    );
    assert_eq!(read, Some(Payload::Json(json!("v1"))));
    assert!(written);

    assert_eq!(
        engine.get("k", GetOptions::default()).await,
        Some(Payload::Json(json!("v2")))
    );
}

#[tokio::test]
async fn test_read_does_not_undo_concurrent_delete() {
    let engine = slow_page_engine();
    let options = SetOptions::default().tier(Tier::DurablePageScoped);
    assert!(engine.set("k", json!("v1"), options).await);

    let (read, ()) = tokio::join!(
        engine.get("k", GetOptions::default()),
        engine.delete("k", None)
    );
    assert_eq!(read, Some(Payload::Json(json!("v1"))));
    assert!(!engine.has("k", None).await);
}

#[tokio::test]
async fn test_reads_count_accesses_in_durable_tier() {
    let storage = Arc::new(SlowReads(MemoryStringStorage::unbounded()));
    let engine = CacheEngine::new(Config::default(), Arc::new(ManualClock::new(start())))
        .with_store(Arc::new(DurableStore::page("sc_page_", storage.clone())));
    let inspect = DurableStore::page("sc_page_", storage);

    let options = SetOptions::default().tier(Tier::DurablePageScoped);
    engine.set("menu", json!("soup"), options).await;
    for _ in 0..3 {
        engine.get("menu", GetOptions::default()).await;
    }

    assert_eq!(inspect.load("menu").await.unwrap().unwrap().access_count, 3);
    assert_eq!(engine.get_stats().await.counters.hits, 3);
}

#[tokio::test]
async fn test_fallback_order_decides_between_tiers() {
    let (_clock, engine) = setup();

    engine
        .set("k", json!("fast"), SetOptions::default().tier(Tier::Ephemeral))
        .await;
    engine
        .set(
            "k",
            json!("slow"),
            SetOptions::default().tier(Tier::TransactionalIndexed),
        )
        .await;

    assert_eq!(
        engine.get("k", GetOptions::default()).await,
        Some(Payload::Json(json!("fast")))
    );
    let reversed = GetOptions::order([Tier::TransactionalIndexed, Tier::Ephemeral]);
    assert_eq!(
        engine.get("k", reversed).await,
        Some(Payload::Json(json!("slow")))
    );
}

#[tokio::test]
async fn test_delete_and_clear() {
    let (_clock, engine) = setup();

    for tier in Tier::ALL {
        engine.set("shared", json!(1), SetOptions::default().tier(tier)).await;
    }
    engine.delete("shared", Some(Tier::Ephemeral)).await;
    assert!(!engine.has("shared", Some(Tier::Ephemeral)).await);
    assert!(engine.has("shared", Some(Tier::DurablePageScoped)).await);

    engine.delete("shared", None).await;
    assert!(!engine.has("shared", None).await);

    engine.set("a", json!(1), SetOptions::default()).await;
    engine
        .set("b", json!(2), SetOptions::default().tier(Tier::DurablePageScoped))
        .await;
    engine.clear(Some(Tier::Ephemeral)).await;
    assert!(!engine.has("a", None).await);
    assert!(engine.has("b", None).await);

    engine.clear(None).await;
    let stats = engine.get_stats().await;
    assert!(stats.per_tier.values().all(|t| t.entry_count == 0));
}

#[tokio::test]
async fn test_invalidate_tag_across_tiers() {
    let (_clock, engine) = setup();

    let tagged = |tier| SetOptions::default().tier(tier).tag("timetable");
    engine.set("mon", json!("maths"), tagged(Tier::Ephemeral)).await;
    engine
        .set("tue", json!("art"), tagged(Tier::DurableSessionScoped))
        .await;
    engine.set("menu", json!("soup"), SetOptions::default()).await;

    assert_eq!(engine.invalidate_tag("timetable").await, 2);
    assert!(!engine.has("mon", None).await);
    assert!(!engine.has("tue", None).await);
    assert!(engine.has("menu", None).await);
    assert_eq!(engine.invalidate_tag("timetable").await, 0);
}

#[tokio::test]
async fn test_named_responses() {
    let (clock, engine) = setup();

    let options = ResponseOptions {
        tags: vec!["events".into()],
        ..Default::default()
    };
    assert!(
        engine
            .cache_named_response("/api/events", json!([{"id": 1}]), options)
            .await
    );
    assert_eq!(
        engine.get_cached_named_response("/api/events").await,
        Some(Payload::Json(json!([{"id": 1}])))
    );

    // Default response TTL is five minutes.
    clock.advance(chrono::Duration::minutes(5) + chrono::Duration::seconds(1));
    assert!(engine.get_cached_named_response("/api/events").await.is_none());
}

#[tokio::test]
async fn test_hidden_host_triggers_sweep() {
    let (clock, engine) = setup();

    let short = || SetOptions::default().ttl(Duration::from_secs(1));
    engine.set("a", json!(1), short().tier(Tier::Ephemeral)).await;
    engine.set("b", json!(2), short().tier(Tier::TransactionalIndexed)).await;
    engine.set("c", json!(3), SetOptions::default()).await;

    clock.advance(chrono::Duration::seconds(2));
    assert!(engine.on_visibility_change(Visibility::Visible).await.is_none());

    let report = engine
        .on_visibility_change(Visibility::Hidden)
        .await
        .unwrap();
    assert_eq!(report.total_removed(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(engine.get_stats().await.per_tier[&Tier::Ephemeral].entry_count, 1);
}

#[tokio::test]
async fn test_stats_report_usage_and_capacity() {
    let clock = Arc::new(ManualClock::new(start()));
    let engine = CacheEngine::new(Config::default(), clock)
        .with_store(Arc::new(EphemeralStore::new(10, 10_000)))
        .with_store(Arc::new(DurableStore::page(
            "sc_page_",
            Arc::new(MemoryStringStorage::unbounded()),
        )));

    engine.set("a", json!("x"), SetOptions::default()).await;
    engine
        .set("b", json!("y"), SetOptions::default().tier(Tier::DurablePageScoped))
        .await;

    let stats = engine.get_stats().await;
    assert_eq!(stats.per_tier[&Tier::Ephemeral].capacity_bytes, Some(10_000));
    assert_eq!(stats.per_tier[&Tier::DurablePageScoped].capacity_bytes, None);
    assert_eq!(stats.per_tier[&Tier::DurablePageScoped].entry_count, 1);
    assert!(stats.per_tier[&Tier::DurablePageScoped].used_bytes > 0);
    assert_eq!(stats.estimated_capacity_bytes, 10_000);
    assert_eq!(stats.counters.sets, 2);
}
